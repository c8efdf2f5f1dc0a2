use std::sync::{Arc, Mutex};

use super::context::SimContext;
use super::pcb::{DeferredOps, Pcb, State};
use super::scheduler::Scheduler;
use super::stats::CoreStats;
use super::Pid;

/// One simulated core: a scheduling policy, its ready queue, performance
/// counters, and a running-pid slot per worker for status display.
pub struct Core {
    index: usize,
    scheduler: Mutex<Box<dyn Scheduler>>,
    stats: CoreStats,
    running: Mutex<Vec<Option<Pid>>>,
}

impl Core {
    pub fn new(index: usize, scheduler: Box<dyn Scheduler>, num_workers: usize) -> Core {
        Core {
            index,
            scheduler: Mutex::new(scheduler),
            stats: CoreStats::new(),
            running: Mutex::new(vec![None; num_workers]),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn scheduler(&self) -> &Mutex<Box<dyn Scheduler>> {
        &self.scheduler
    }

    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    pub fn policy_name(&self) -> &'static str {
        self.scheduler.lock().unwrap().name()
    }

    pub fn ready_count(&self) -> usize {
        self.scheduler.lock().unwrap().ready_count()
    }

    /// The pid each worker slot is currently running, if any.
    pub fn running_pids(&self) -> Vec<Option<Pid>> {
        self.running.lock().unwrap().clone()
    }

    fn set_running(&self, slot: usize, pid: Option<Pid>) {
        self.running.lock().unwrap()[slot] = pid;
    }
}

/// One hardware thread of a core. Each barrier cycle it performs exactly
/// one unit of work: advance the held process one cycle, then consult the
/// policy about preemption.
pub struct Worker {
    ctx: Arc<SimContext>,
    core_id: usize,
    slot: usize,
    current: Option<Arc<Mutex<Pcb>>>,
    current_pid: Option<Pid>,
    /// Consecutive cycles the current process has held this worker.
    counter: u32,
}

impl Worker {
    pub fn new(ctx: Arc<SimContext>, core_id: usize, slot: usize) -> Worker {
        Worker {
            ctx,
            core_id,
            slot,
            current: None,
            current_pid: None,
            counter: 0,
        }
    }

    pub fn unit_of_work(&mut self) {
        let ctx = self.ctx.clone();
        let core = &ctx.cores()[self.core_id];
        core.stats().increment_total_cycles();

        let needs_dispatch = match &self.current {
            None => core.ready_count() > 0,
            Some(pcb) => pcb.lock().unwrap().state() != State::Run,
        };
        if needs_dispatch {
            self.dispatch();
        }

        if let Some(pcb) = self.current.clone() {
            let (state_after, deferred) = {
                let mut pcb = pcb.lock().unwrap();
                let deferred = if pcb.state() == State::Run {
                    let deferred = pcb.progress_one_cycle(&ctx);
                    core.stats().increment_utilized_cycles();
                    deferred
                } else {
                    DeferredOps::default()
                };
                (pcb.state(), deferred)
            };
            ctx.run_deferred(deferred);
            self.counter += 1;

            let preempt = core.scheduler().lock().unwrap().should_preempt(self.counter);
            if preempt || state_after != State::Run {
                self.dispatch();
            }
        }

        core.set_running(self.slot, self.current_pid);
    }

    /// Returns a preempted-but-runnable process to the queue, then pulls
    /// the next ready process. Entries whose pid has left the process table
    /// or the READY state since enqueue are dropped on the floor.
    fn dispatch(&mut self) {
        self.counter = 0;
        let core = &self.ctx.cores()[self.core_id];

        if let Some(pcb) = self.current.take() {
            let mut pcb = pcb.lock().unwrap();
            if pcb.state() == State::Run {
                pcb.set_state(State::Ready);
                let entry = pcb.ready_entry();
                drop(pcb);
                core.scheduler().lock().unwrap().add(entry);
            }
        }
        self.current_pid = None;

        loop {
            let entry = match core.scheduler().lock().unwrap().remove() {
                Some(entry) => entry,
                None => return,
            };
            if let Some(pcb) = self.ctx.lookup(entry.pid) {
                let mut guard = pcb.lock().unwrap();
                if guard.state() == State::Ready {
                    guard.set_state(State::Run);
                    drop(guard);
                    self.current = Some(pcb);
                    self.current_pid = Some(entry.pid);
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    fn current_pid(&self) -> Option<Pid> {
        self.current_pid
    }
}

/// The I/O device model: one barrier participant that advances every
/// process sleeping on the I/O wait list by one cycle.
pub struct IoUnit {
    ctx: Arc<SimContext>,
}

impl IoUnit {
    pub fn new(ctx: Arc<SimContext>) -> IoUnit {
        IoUnit { ctx }
    }

    pub fn unit_of_work(&self) {
        for pid in self.ctx.io_wait_snapshot() {
            if let Some(pcb) = self.ctx.lookup(pid) {
                let deferred = {
                    let mut pcb = pcb.lock().unwrap();
                    if pcb.state() == State::Wait {
                        pcb.progress_one_cycle(&self.ctx)
                    } else {
                        DeferredOps::default()
                    }
                };
                self.ctx.run_deferred(deferred);
            }
        }
    }
}
