use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{SimError, SimResult};

use super::barrier::CycleBarrier;
use super::context::{SimConfig, SimContext, StateCounts};
use super::pcb::Priority;
use super::processor::{IoUnit, Worker};
use super::template::Template;
use super::Pid;

/// A point-in-time view of the whole simulation, for status reports and
/// interactive inspection.
#[derive(Debug, Clone)]
pub struct KernelSnapshot {
    pub elapsed_cycles: u64,
    pub elapsed_wall: Duration,
    pub state_counts: StateCounts,
    pub io_waiting: usize,
    pub resource_waiting: usize,
    pub critical_waiting: usize,
    pub terminated: u64,
    pub cores: Vec<CoreSnapshot>,
    pub running: Vec<RunningProcess>,
}

#[derive(Debug, Clone)]
pub struct CoreSnapshot {
    pub index: usize,
    pub policy: &'static str,
    pub utilization: f64,
    pub throughput: f64,
    pub completed: u64,
    pub avg_turnaround: Duration,
    pub avg_waiting: Duration,
    /// The pid each worker slot is running, `None` for idle slots.
    pub worker_pids: Vec<Option<Pid>>,
}

#[derive(Debug, Clone)]
pub struct RunningProcess {
    pub pid: Pid,
    pub priority: Priority,
    pub template: String,
}

/// A clonable handle onto the kernel clock. `run` borrows the kernel for
/// its whole duration, so suspension is controlled from other threads
/// through this handle instead.
#[derive(Clone)]
pub struct PauseHandle {
    paused: Arc<AtomicBool>,
}

impl PauseHandle {
    /// Suspends the clock after the current cycle; `resume` restarts it.
    pub fn halt(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// The cycle-driven kernel. Owns the shared context and the barrier, and
/// drives the global clock: each iteration retries parked resource
/// requests, releases the workers and the I/O unit for one cycle, then
/// handles interrupts and reporting before the next tick.
pub struct Kernel {
    ctx: Arc<SimContext>,
    barrier: Arc<CycleBarrier>,
    paused: Arc<AtomicBool>,
    elapsed_cycles: u64,
    max_cycles: Option<u64>,
    started_at: Option<Instant>,
}

impl Kernel {
    pub fn new(config: SimConfig, templates: Vec<Template>) -> Kernel {
        let participants = config.core_policies.len() * config.workers_per_core + 1;
        Kernel {
            ctx: Arc::new(SimContext::new(config, templates)),
            barrier: Arc::new(CycleBarrier::new(participants)),
            paused: Arc::new(AtomicBool::new(false)),
            elapsed_cycles: 0,
            max_cycles: None,
            started_at: None,
        }
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn elapsed_cycles(&self) -> u64 {
        self.elapsed_cycles
    }

    /// Stop after this many cycles even if processes remain.
    pub fn set_cycle_limit(&mut self, limit: Option<u64>) {
        self.max_cycles = limit;
    }

    /// Admits `counts[i]` processes of template `i`.
    pub fn boot(&mut self, counts: &[usize]) -> SimResult<()> {
        let num_templates = self.ctx.templates().len();
        if counts.len() != num_templates {
            return Err(SimError::WorkloadMismatch {
                given: counts.len(),
                loaded: num_templates,
            });
        }
        for (index, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                let pid = self.ctx.create_process(index);
                tracing::debug!(pid, template = %self.ctx.templates()[index].name, "process admitted");
            }
        }
        Ok(())
    }

    /// Handle for halting and resuming the clock, including while `run`
    /// holds the kernel.
    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle {
            paused: self.paused.clone(),
        }
    }

    /// Suspends the clock after the current cycle; `resume` restarts it.
    pub fn halt(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Runs the simulation until the process table empties or the cycle
    /// limit is reached.
    pub fn run(&mut self) {
        let threads = self.spawn_units();
        self.started_at = Some(Instant::now());
        for core in self.ctx.cores() {
            core.stats().start();
        }
        tracing::info!(
            cores = self.ctx.cores().len(),
            workers_per_core = self.ctx.config().workers_per_core,
            processes = self.ctx.process_count(),
            "kernel started"
        );

        while self.ctx.process_count() > 0
            && self.max_cycles.map_or(true, |limit| self.elapsed_cycles < limit)
        {
            if self.paused.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            self.ctx.retry_resource_requests();
            self.barrier.run_cycle();
            self.elapsed_cycles += 1;

            self.maybe_interrupt();
            if self.elapsed_cycles % self.ctx.config().status_report_interval == 0 {
                self.report_status();
            }

            let delay = self.ctx.config().cycle_delay;
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        for core in self.ctx.cores() {
            core.stats().stop();
        }
        self.barrier.shutdown();
        for thread in threads {
            let _ = thread.join();
        }
        self.report_final();
    }

    fn spawn_units(&self) -> Vec<JoinHandle<()>> {
        let mut threads = Vec::new();
        for core_id in 0..self.ctx.cores().len() {
            for slot in 0..self.ctx.config().workers_per_core {
                let mut worker = Worker::new(self.ctx.clone(), core_id, slot);
                let barrier = self.barrier.clone();
                threads.push(thread::spawn(move || {
                    let mut seen = 0;
                    while let Some(cycle) = barrier.await_cycle(seen) {
                        worker.unit_of_work();
                        barrier.complete();
                        seen = cycle;
                    }
                }));
            }
        }

        let io_unit = IoUnit::new(self.ctx.clone());
        let barrier = self.barrier.clone();
        threads.push(thread::spawn(move || {
            let mut seen = 0;
            while let Some(cycle) = barrier.await_cycle(seen) {
                io_unit.unit_of_work();
                barrier.complete();
                seen = cycle;
            }
        }));
        threads
    }

    // A 1-in-N chance per cycle that a device interrupt steals one cycle's
    // worth of wall time from the clock.
    fn maybe_interrupt(&self) {
        let bound = self.ctx.config().io_interrupt_chance_bound;
        if self.ctx.with_rng(|rng| rng.gen_range(0..bound)) == 0 {
            tracing::debug!(cycle = self.elapsed_cycles, "I/O interrupt");
            let delay = self.ctx.config().cycle_delay;
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        let cores = self
            .ctx
            .cores()
            .iter()
            .map(|core| CoreSnapshot {
                index: core.index(),
                policy: core.policy_name(),
                utilization: core.stats().utilization(),
                throughput: core.stats().throughput(),
                completed: core.stats().completed_processes(),
                avg_turnaround: core.stats().avg_turnaround(),
                avg_waiting: core.stats().avg_waiting(),
                worker_pids: core.running_pids(),
            })
            .collect();
        let running = self
            .ctx
            .running_processes()
            .into_iter()
            .map(|(pid, priority, template)| RunningProcess { pid, priority, template })
            .collect();

        KernelSnapshot {
            elapsed_cycles: self.elapsed_cycles,
            elapsed_wall: self.started_at.map_or(Duration::ZERO, |t| t.elapsed()),
            state_counts: self.ctx.state_counts(),
            io_waiting: self.ctx.io_wait_count(),
            resource_waiting: self.ctx.resource_wait_count(),
            critical_waiting: self.ctx.critical_wait_count(),
            terminated: self.ctx.terminated_count(),
            cores,
            running,
        }
    }

    fn report_status(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            cycle = snapshot.elapsed_cycles,
            live = self.ctx.process_count(),
            ready = snapshot.state_counts.ready,
            running = snapshot.state_counts.run,
            waiting = snapshot.state_counts.wait,
            io_waiting = snapshot.io_waiting,
            resource_waiting = snapshot.resource_waiting,
            critical_waiting = snapshot.critical_waiting,
            terminated = snapshot.terminated,
            "status"
        );
        for process in &snapshot.running {
            tracing::debug!(
                pid = process.pid,
                priority = ?process.priority,
                template = %process.template,
                "running"
            );
        }
    }

    fn report_final(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            cycles = snapshot.elapsed_cycles,
            wall = ?snapshot.elapsed_wall,
            terminated = snapshot.terminated,
            remaining = self.ctx.process_count(),
            "kernel stopped"
        );
        for core in &snapshot.cores {
            let utilization = format!("{:.1}%", core.utilization * 100.0);
            let throughput = format!("{:.2}/s", core.throughput);
            tracing::info!(
                core = core.index,
                policy = core.policy,
                utilization = %utilization,
                throughput = %throughput,
                completed = core.completed,
                avg_turnaround = ?core.avg_turnaround,
                avg_waiting = ?core.avg_waiting,
                "core statistics"
            );
        }
    }
}
