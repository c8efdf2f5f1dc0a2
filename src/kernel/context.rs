use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ipc::{IpcMode, MessagePasser, PipeManager};
use super::memory::{MemoryManager, PageId, Word};
use super::pcb::{DeferredOps, Pcb, Priority, State};
use super::process::Process;
use super::processor::Core;
use super::resource_manager::{ResourceManager, ResourceVector};
use super::scheduler::{ReadyEntry, SchedulerKind};
use super::semaphore::Semaphore;
use super::template::Template;
use super::{Pid, KERNEL_ID};

/// Tunable system parameters, fixed for the lifetime of a simulation.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Seed for the single simulation RNG.
    pub seed: u64,
    pub memory_capacity_mb: u64,
    pub page_size_mb: u64,
    pub num_resource_types: usize,
    pub units_per_resource_type: u32,
    /// One scheduling policy per core.
    pub core_policies: Vec<SchedulerKind>,
    pub workers_per_core: usize,
    /// A FORK cycle spawns a child with probability 1-in-N.
    pub fork_chance_bound: u32,
    /// An op-set boundary requests resources with probability 1-in-N.
    pub resource_request_chance_bound: u32,
    /// Each kernel cycle raises an I/O interrupt with probability 1-in-N.
    pub io_interrupt_chance_bound: u32,
    /// Wall-clock pause between kernel cycles.
    pub cycle_delay: Duration,
    /// Cycles between status reports.
    pub status_report_interval: u64,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            seed: 0,
            memory_capacity_mb: 1024,
            page_size_mb: 2,
            num_resource_types: 8,
            units_per_resource_type: 16,
            core_policies: vec![SchedulerKind::ShortestJobFirst, SchedulerKind::MultiLevelQueue],
            workers_per_core: 4,
            fork_chance_bound: 4,
            resource_request_chance_bound: 8,
            io_interrupt_chance_bound: 16,
            cycle_delay: Duration::ZERO,
            status_report_interval: 200,
        }
    }
}

/// Per-state process counts at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub new: usize,
    pub ready: usize,
    pub run: usize,
    pub wait: usize,
}

/// All shared kernel state: the process table, every subsystem, and the one
/// simulation RNG. Passed explicitly to everything that needs it; each
/// subsystem guards its own lock, no subsystem lock is ever held across a
/// call back into a PCB, and no PCB is ever locked while another PCB's
/// lock is held (cross-PCB work travels through `DeferredOps`).
pub struct SimContext {
    config: SimConfig,
    templates: Vec<Arc<Template>>,
    processes: Mutex<HashMap<Pid, Arc<Mutex<Pcb>>>>,
    terminated: AtomicU64,
    waiting_on_io: Mutex<HashSet<Pid>>,
    waiting_on_resources: Mutex<HashMap<Pid, ResourceVector>>,
    semaphores: Vec<Semaphore>,
    resources: Mutex<ResourceManager>,
    memory: Mutex<MemoryManager>,
    message_passer: MessagePasser,
    pipe_manager: PipeManager,
    cores: Vec<Core>,
    next_pid: AtomicU32,
    rng: Mutex<StdRng>,
}

impl SimContext {
    pub fn new(config: SimConfig, mut templates: Vec<Template>) -> SimContext {
        for (index, template) in templates.iter_mut().enumerate() {
            template.index = index;
        }
        let semaphores = templates.iter().map(|_| Semaphore::new()).collect();
        let capacity = ResourceVector::uniform(config.num_resource_types, config.units_per_resource_type);
        let cores = config
            .core_policies
            .iter()
            .enumerate()
            .map(|(index, kind)| Core::new(index, kind.create(), config.workers_per_core))
            .collect();

        SimContext {
            templates: templates.into_iter().map(Arc::new).collect(),
            processes: Mutex::new(HashMap::new()),
            terminated: AtomicU64::new(0),
            waiting_on_io: Mutex::new(HashSet::new()),
            waiting_on_resources: Mutex::new(HashMap::new()),
            semaphores,
            resources: Mutex::new(ResourceManager::new(capacity)),
            memory: Mutex::new(MemoryManager::new(config.memory_capacity_mb, config.page_size_mb)),
            message_passer: MessagePasser::new(),
            pipe_manager: PipeManager::new(),
            cores,
            next_pid: AtomicU32::new(KERNEL_ID + 1),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn templates(&self) -> &[Arc<Template>] {
        &self.templates
    }

    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        f(&mut self.rng.lock().unwrap())
    }

    // ---- process lifecycle ----

    /// Admits a fresh top-level process instantiated from a template. The
    /// IPC mode it will share with any forked descendants is drawn here.
    pub fn create_process(&self, template_index: usize) -> Pid {
        let template = self.templates[template_index].clone();
        let ipc_mode = self.with_rng(|rng| {
            if rng.gen_bool(0.5) {
                IpcMode::MessagePassing
            } else {
                IpcMode::OrdinaryPipe
            }
        });
        let process = self.with_rng(|rng| Process::instantiate(&template, rng));
        let (pid, deferred) = self.admit(template, KERNEL_ID, process, ipc_mode);
        self.run_deferred(deferred);
        pid
    }

    /// Admits a forked child. The child starts from an instruction stream
    /// cloned at the parent's fork point and inherits the parent's IPC mode.
    /// The caller holds the parent's PCB lock, so any follow-up work is
    /// handed back instead of applied here.
    pub(crate) fn create_child_process(
        &self,
        template: Arc<Template>,
        parent: Pid,
        process: Process,
        ipc_mode: IpcMode,
    ) -> (Pid, DeferredOps) {
        self.admit(template, parent, process, ipc_mode)
    }

    fn admit(
        &self,
        template: Arc<Template>,
        parent: Pid,
        process: Process,
        ipc_mode: IpcMode,
    ) -> (Pid, DeferredOps) {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let pcb = Pcb::new(self, pid, parent, template, process, ipc_mode);
        let pcb = Arc::new(Mutex::new(pcb));
        self.processes.lock().unwrap().insert(pid, pcb.clone());
        let deferred = pcb.lock().unwrap().start(self);
        (pid, deferred)
    }

    pub fn lookup(&self, pid: Pid) -> Option<Arc<Mutex<Pcb>>> {
        self.processes.lock().unwrap().get(&pid).cloned()
    }

    pub fn process_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn terminated_count(&self) -> u64 {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Final bookkeeping for a terminated process: drops every table entry
    /// that mentions it. Cascading to its children happens through the
    /// deferred work the PCB's `terminate` returned.
    pub(crate) fn exit(&self, pid: Pid, core: usize, turnaround: Duration, waiting: Duration) {
        self.processes.lock().unwrap().remove(&pid);
        self.waiting_on_io.lock().unwrap().remove(&pid);
        self.waiting_on_resources.lock().unwrap().remove(&pid);
        self.message_passer.remove_mailbox(pid);
        self.pipe_manager.remove_pipe(pid);
        self.terminated.fetch_add(1, Ordering::SeqCst);
        self.cores[core].stats().register_termination(turnaround, waiting);
    }

    /// Forcibly terminates a process and all of its descendants.
    pub fn terminate_process(&self, pid: Pid) {
        if let Some(pcb) = self.lookup(pid) {
            let deferred = pcb.lock().unwrap().terminate(self);
            self.run_deferred(deferred);
        }
    }

    /// Applies cross-PCB follow-up work with no PCB lock held: wakes
    /// waiters popped off a semaphore and force-terminates orphaned
    /// children. Each target is locked on its own, one at a time, so the
    /// parent→child and holder→waiter lock orders can never close a cycle.
    pub(crate) fn run_deferred(&self, ops: DeferredOps) {
        let DeferredOps { mut woken, mut orphans } = ops;
        loop {
            for pid in woken.drain(..) {
                if let Some(pcb) = self.lookup(pid) {
                    pcb.lock().unwrap().wakeup(self);
                }
            }
            let pid = match orphans.pop() {
                Some(pid) => pid,
                None => return,
            };
            if let Some(pcb) = self.lookup(pid) {
                let more = pcb.lock().unwrap().terminate(self);
                woken.extend(more.woken);
                orphans.extend(more.orphans);
            }
        }
    }

    // ---- scheduling ----

    pub(crate) fn request_cpu(&self, core: usize, entry: ReadyEntry) {
        self.cores[core].scheduler().lock().unwrap().add(entry);
    }

    // ---- I/O waits ----

    pub(crate) fn request_io(&self, pid: Pid) {
        self.waiting_on_io.lock().unwrap().insert(pid);
    }

    pub(crate) fn release_io(&self, pid: Pid) {
        self.waiting_on_io.lock().unwrap().remove(&pid);
    }

    pub fn io_wait_snapshot(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.waiting_on_io.lock().unwrap().iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn io_wait_count(&self) -> usize {
        self.waiting_on_io.lock().unwrap().len()
    }

    // ---- resources ----

    pub fn resources(&self) -> &Mutex<ResourceManager> {
        &self.resources
    }

    pub(crate) fn try_request_resources(&self, pid: Pid, request: &ResourceVector) -> bool {
        self.resources.lock().unwrap().request_resources(pid, request)
    }

    /// Records a denied request; it is retried once per kernel cycle until
    /// the banker grants it or the process is terminated.
    pub(crate) fn park_resource_request(&self, pid: Pid, request: ResourceVector) {
        self.waiting_on_resources.lock().unwrap().insert(pid, request);
    }

    pub fn resource_wait_count(&self) -> usize {
        self.waiting_on_resources.lock().unwrap().len()
    }

    /// Retries every parked resource request against the current supply.
    /// Granted processes re-enter their ready queue.
    pub fn retry_resource_requests(&self) {
        let pending: Vec<(Pid, ResourceVector)> = self
            .waiting_on_resources
            .lock()
            .unwrap()
            .iter()
            .map(|(pid, request)| (*pid, request.clone()))
            .collect();

        for (pid, request) in pending {
            if self.try_request_resources(pid, &request) {
                self.waiting_on_resources.lock().unwrap().remove(&pid);
                if let Some(pcb) = self.lookup(pid) {
                    pcb.lock().unwrap().acquired_resources(self, &request);
                }
            }
        }
    }

    pub(crate) fn remove_process_resources(&self, pid: Pid) {
        self.resources.lock().unwrap().remove_process(pid);
        self.waiting_on_resources.lock().unwrap().remove(&pid);
    }

    // ---- critical sections ----

    pub fn semaphore(&self, index: usize) -> &Semaphore {
        &self.semaphores[index]
    }

    pub fn critical_wait_count(&self) -> usize {
        self.semaphores.iter().map(Semaphore::waiting_count).sum()
    }

    /// Returns true when the section was entered immediately; otherwise the
    /// pid sleeps on the semaphore until a holder signals.
    pub(crate) fn request_critical_section(&self, pid: Pid, index: usize) -> bool {
        self.semaphores[index].wait(pid)
    }

    /// Signals the semaphore and returns the popped waiter, if any. The
    /// releasing PCB's lock is held here, so the wake itself is deferred
    /// to `run_deferred`.
    pub(crate) fn signal_semaphore(&self, index: usize) -> Option<Pid> {
        self.semaphores[index].signal()
    }

    pub(crate) fn remove_from_semaphore(&self, pid: Pid, index: usize) {
        self.semaphores[index].remove_from_queue(pid);
    }

    // ---- memory ----

    pub fn memory(&self) -> &Mutex<MemoryManager> {
        &self.memory
    }

    pub(crate) fn read_memory(&self, page: PageId, offset: u64) -> Word {
        self.memory.lock().unwrap().read(page, offset)
    }

    pub(crate) fn read_across_page_break(&self, page1: PageId, offset: u64, page2: PageId) -> Word {
        self.memory.lock().unwrap().read_across_page_break(page1, offset, page2)
    }

    pub(crate) fn release_page_table(&self, page_table: &[PageId]) {
        self.memory.lock().unwrap().release_memory(page_table);
    }

    // ---- IPC ----

    pub fn message_passer(&self) -> &MessagePasser {
        &self.message_passer
    }

    pub fn pipe_manager(&self) -> &PipeManager {
        &self.pipe_manager
    }

    // ---- status ----

    pub fn state_counts(&self) -> StateCounts {
        let processes: Vec<Arc<Mutex<Pcb>>> =
            self.processes.lock().unwrap().values().cloned().collect();
        let mut counts = StateCounts::default();
        for pcb in processes {
            match pcb.lock().unwrap().state() {
                State::New => counts.new += 1,
                State::Ready => counts.ready += 1,
                State::Run => counts.run += 1,
                State::Wait => counts.wait += 1,
                State::Exit => {}
            }
        }
        counts
    }

    /// The pid, priority, and template of every process currently in RUN.
    pub fn running_processes(&self) -> Vec<(Pid, Priority, String)> {
        let processes: Vec<Arc<Mutex<Pcb>>> =
            self.processes.lock().unwrap().values().cloned().collect();
        let mut running = Vec::new();
        for pcb in processes {
            let pcb = pcb.lock().unwrap();
            if pcb.state() == State::Run {
                running.push((pcb.pid(), pcb.priority(), pcb.template_name().to_string()));
            }
        }
        running.sort_by_key(|(pid, _, _)| *pid);
        running
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::pcb::State;
    use crate::kernel::template::{Operation, TemplateOpSet, TemplateSection};

    use super::*;

    fn calculate_template(name: &str, cycles: u32) -> Template {
        Template::new(
            name,
            4,
            vec![TemplateSection {
                critical: false,
                op_sets: vec![TemplateOpSet {
                    operation: Operation::Calculate,
                    min_cycles: cycles,
                    max_cycles: cycles + 1,
                }],
            }],
        )
    }

    fn single_core_context(templates: Vec<Template>) -> SimContext {
        let config = SimConfig {
            core_policies: vec![SchedulerKind::RoundRobin],
            memory_capacity_mb: 64,
            ..SimConfig::default()
        };
        SimContext::new(config, templates)
    }

    #[test]
    fn test_create_process_registers_every_subsystem() {
        let ctx = single_core_context(vec![calculate_template("busy", 50)]);
        let pid = ctx.create_process(0);

        assert_eq!(ctx.process_count(), 1);
        assert!(ctx.resources().lock().unwrap().need_of(pid).is_some());
        // 4 MB of address space on 2 MB pages binds two frames.
        assert_eq!(ctx.memory().lock().unwrap().free_frame_count(), 30);
        // The process handshook to READY and entered its core's queue.
        let pcb = ctx.lookup(pid).unwrap();
        assert_eq!(pcb.lock().unwrap().state(), State::Ready);
        assert_eq!(ctx.cores()[0].ready_count(), 1);
    }

    #[test]
    fn test_retry_grants_parked_request_and_readies_process() {
        let ctx = single_core_context(vec![calculate_template("busy", 50)]);
        let pid = ctx.create_process(0);
        let pcb = ctx.lookup(pid).unwrap();

        let request = ctx.resources().lock().unwrap().need_of(pid).unwrap().clone();
        pcb.lock().unwrap().set_state(State::Wait);
        ctx.park_resource_request(pid, request);
        assert_eq!(ctx.resource_wait_count(), 1);

        ctx.retry_resource_requests();
        assert_eq!(ctx.resource_wait_count(), 0);
        assert_eq!(pcb.lock().unwrap().state(), State::Ready);
        // Fully allocated, so nothing left to need.
        assert!(ctx.resources().lock().unwrap().need_of(pid).unwrap().is_zero());
    }

    #[test]
    fn test_exit_cascades_to_descendants() {
        let ctx = single_core_context(vec![calculate_template("busy", 50)]);
        let parent = ctx.create_process(0);
        let child = ctx.create_process(0);
        let grandchild = ctx.create_process(0);

        let parent_pcb = ctx.lookup(parent).unwrap();
        let child_pcb = ctx.lookup(child).unwrap();
        let grandchild_pcb = ctx.lookup(grandchild).unwrap();
        parent_pcb.lock().unwrap().add_child(child);
        child_pcb.lock().unwrap().add_child(grandchild);

        // One descendant runs, the other sleeps on a semaphore behind a
        // dummy holder; termination must reach both.
        child_pcb.lock().unwrap().set_state(State::Run);
        assert!(ctx.semaphore(0).wait(999));
        assert!(!ctx.semaphore(0).wait(grandchild));
        grandchild_pcb.lock().unwrap().set_state(State::Wait);

        ctx.terminate_process(parent);

        assert_eq!(child_pcb.lock().unwrap().state(), State::Exit);
        assert_eq!(grandchild_pcb.lock().unwrap().state(), State::Exit);
        assert_eq!(ctx.process_count(), 0);
        assert_eq!(ctx.terminated_count(), 3);
        assert_eq!(ctx.semaphore(0).waiting_count(), 0);

        // Every page came back and every resource unit was reclaimed.
        assert_eq!(ctx.memory().lock().unwrap().free_frame_count(), 32);
        let resources = ctx.resources().lock().unwrap();
        assert!(resources.conserved());
        assert!(resources.need_of(parent).is_none());
        assert!(resources.need_of(grandchild).is_none());
    }

    #[test]
    fn test_concurrent_cascade_and_semaphore_release_both_complete() {
        // A queued waiter whose child holds the critical section: one
        // thread force-terminates the waiter (cascading down to the
        // holder) while another terminates the holder (whose release
        // signals up to the waiter). Both must finish without the two
        // termination paths blocking on each other's PCB.
        let template = Template::new(
            "guarded",
            4,
            vec![TemplateSection {
                critical: true,
                op_sets: vec![TemplateOpSet {
                    operation: Operation::Calculate,
                    min_cycles: 50,
                    max_cycles: 51,
                }],
            }],
        );
        let ctx = Arc::new(single_core_context(vec![template]));

        let holder = ctx.create_process(0); // enters the section, READY
        let waiter = ctx.create_process(0); // queues behind it, WAIT
        ctx.lookup(waiter).unwrap().lock().unwrap().add_child(holder);

        let cascade = {
            let ctx = ctx.clone();
            std::thread::spawn(move || ctx.terminate_process(waiter))
        };
        let release = {
            let ctx = ctx.clone();
            std::thread::spawn(move || ctx.terminate_process(holder))
        };
        cascade.join().unwrap();
        release.join().unwrap();

        assert_eq!(ctx.process_count(), 0);
        assert_eq!(ctx.terminated_count(), 2);
        assert_eq!(ctx.semaphore(0).waiting_count(), 0);
        assert!(ctx.resources().lock().unwrap().conserved());
    }

    #[test]
    fn test_state_counts_cover_the_table() {
        let ctx = single_core_context(vec![calculate_template("busy", 50)]);
        let a = ctx.create_process(0);
        let b = ctx.create_process(0);
        ctx.create_process(0);

        ctx.lookup(a).unwrap().lock().unwrap().set_state(State::Run);
        ctx.lookup(b).unwrap().lock().unwrap().set_state(State::Wait);

        let counts = ctx.state_counts();
        assert_eq!(counts.run, 1);
        assert_eq!(counts.wait, 1);
        assert_eq!(counts.ready, 1);
        assert_eq!(ctx.running_processes().len(), 1);
        assert_eq!(ctx.running_processes()[0].0, a);
    }
}
