use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use super::context::SimContext;
use super::ipc::{IpcMode, Message, OrdinaryPipe};
use super::memory::{PageId, Word, WORD_SIZE_BYTES};
use super::process::{OperationSet, Process, Section};
use super::resource_manager::ResourceVector;
use super::scheduler::ReadyEntry;
use super::template::{Operation, Template};
use super::{Pid, KERNEL_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Ready,
    Run,
    Wait,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// The single simulated register. A value received over IPC has no logical
/// address of its own.
#[derive(Debug, Clone, Copy)]
struct Register {
    logical_address: Option<u64>,
    contents: Word,
}

/// Cross-PCB follow-up work produced while a PCB's lock is held. Locking
/// another PCB from under one can close a cycle (cascading termination
/// locks parent→child while a semaphore release locks holder→waiter), so
/// woken waiters and orphaned children are handed back to the caller,
/// which applies them via `SimContext::run_deferred` once the guard is
/// dropped.
#[derive(Debug, Default)]
pub(crate) struct DeferredOps {
    /// Semaphore waiters popped by a signal, awaiting `wakeup`.
    pub(crate) woken: Vec<Pid>,
    /// Children of a terminated process, awaiting forced termination.
    pub(crate) orphans: Vec<Pid>,
}

impl DeferredOps {
    pub(crate) fn merge(&mut self, other: DeferredOps) {
        self.woken.extend(other.woken);
        self.orphans.extend(other.orphans);
    }
}

/// Process control block: one process's identity, state, and every handle
/// it holds into the kernel subsystems. All transitions run under this
/// PCB's lock; subsystem locks are only taken transiently underneath it.
pub struct Pcb {
    pid: Pid,
    parent: Pid,
    children: HashSet<Pid>,
    template: Arc<Template>,
    process: Process,
    state: State,
    priority: Priority,
    core_id: usize,
    ipc_mode: IpcMode,
    pipe_from_parent: Option<Arc<OrdinaryPipe>>,
    pipes_to_children: HashMap<Pid, Arc<OrdinaryPipe>>,
    memory_required_bytes: u64,
    page_size_bytes: u64,
    page_table: Vec<PageId>,
    register: Option<Register>,
    last_page_accessed: Option<usize>,
    current_resources: ResourceVector,
    critical_secured: bool,
    current_section: Option<Section>,
    current_op_set: Option<OperationSet>,
    last_completed: Option<Operation>,
    created_at: Instant,
    wait_started_at: Option<Instant>,
    waiting_time: Duration,
    total_cycles_executed: u64,
}

impl Pcb {
    /// Registers a new process with every subsystem: a drawn core affinity
    /// and priority, a page table for the template's address space, and a
    /// drawn maximum resource demand declared to the banker. Scheduling
    /// starts separately via `start`.
    pub(crate) fn new(
        ctx: &SimContext,
        pid: Pid,
        parent: Pid,
        template: Arc<Template>,
        process: Process,
        ipc_mode: IpcMode,
    ) -> Pcb {
        let num_cores = ctx.cores().len();
        let core_id = ctx.with_rng(|rng| rng.gen_range(0..num_cores));
        let priority = ctx.with_rng(|rng| match rng.gen_range(0..3) {
            0 => Priority::High,
            1 => Priority::Medium,
            _ => Priority::Low,
        });

        let (page_table, page_size_bytes) = {
            let mut memory = ctx.memory().lock().unwrap();
            (memory.request_memory(template.memory_required_mb), memory.page_size_bytes())
        };

        let num_types = ctx.config().num_resource_types;
        let demand_bound = (ctx.config().units_per_resource_type / 4).max(1);
        let max_demand = ctx.with_rng(|rng| {
            ResourceVector::from_values((0..num_types).map(|_| rng.gen_range(0..demand_bound)).collect())
        });
        ctx.resources().lock().unwrap().add_process(pid, max_demand);

        let pipe_from_parent = match ipc_mode {
            IpcMode::OrdinaryPipe => Some(ctx.pipe_manager().create_pipe(parent, pid)),
            IpcMode::MessagePassing => None,
        };

        Pcb {
            pid,
            parent,
            children: HashSet::new(),
            memory_required_bytes: template.memory_required_mb * 1024 * 1024,
            template,
            process,
            state: State::New,
            priority,
            core_id,
            ipc_mode,
            pipe_from_parent,
            pipes_to_children: HashMap::new(),
            page_size_bytes,
            page_table,
            register: None,
            last_page_accessed: None,
            current_resources: ResourceVector::zeros(num_types),
            critical_secured: false,
            current_section: None,
            current_op_set: None,
            last_completed: None,
            created_at: Instant::now(),
            wait_started_at: None,
            waiting_time: Duration::ZERO,
            total_cycles_executed: 0,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Pid {
        self.parent
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    pub fn template_name(&self) -> &str {
        &self.template.name
    }

    pub fn total_cycles_executed(&self) -> u64 {
        self.total_cycles_executed
    }

    pub(crate) fn add_child(&mut self, pid: Pid) {
        self.children.insert(pid);
    }

    /// READY marks the start of a wait-for-CPU interval; RUN closes it.
    pub(crate) fn set_state(&mut self, state: State) {
        match state {
            State::Ready => {
                if self.state != State::Ready {
                    self.wait_started_at = Some(Instant::now());
                }
            }
            State::Run => {
                if let Some(started) = self.wait_started_at.take() {
                    self.waiting_time += started.elapsed();
                }
            }
            _ => {}
        }
        self.state = state;
    }

    pub(crate) fn ready_entry(&self) -> ReadyEntry {
        ReadyEntry {
            pid: self.pid,
            priority: self.priority,
            remaining_burst: self.remaining_calculate_cycles(),
        }
    }

    fn remaining_calculate_cycles(&self) -> u32 {
        match &self.current_op_set {
            Some(op_set) if op_set.operation == Operation::Calculate => op_set.cycles,
            _ => 0,
        }
    }

    /// Pulls the first operation set and performs its admission handshake.
    pub(crate) fn start(&mut self, ctx: &SimContext) -> DeferredOps {
        let mut ops = DeferredOps::default();
        self.advance_op_set(ctx, &mut ops);
        ops
    }

    /// Runs the current operation for one cycle. At a burst boundary the
    /// next operation set's admission handshake decides the new state. The
    /// returned follow-up work must be applied after this PCB's guard is
    /// dropped.
    pub(crate) fn progress_one_cycle(&mut self, ctx: &SimContext) -> DeferredOps {
        let mut ops = DeferredOps::default();
        if self.state == State::Exit {
            return ops;
        }
        let operation = match &mut self.current_op_set {
            Some(op_set) => {
                op_set.progress_one_cycle();
                op_set.operation
            }
            None => return ops,
        };
        self.total_cycles_executed += 1;

        match operation {
            Operation::Fork => self.maybe_fork(ctx, &mut ops),
            Operation::Calculate => {
                self.access_memory(ctx);
                self.exchange_ipc(ctx);
            }
            Operation::Io => {}
        }

        if self.current_op_set.as_ref().is_some_and(|op_set| op_set.cycles == 0) {
            self.last_completed = Some(operation);
            self.current_op_set = self.current_section.as_mut().and_then(|s| s.op_sets.pop_front());
            self.advance_op_set(ctx, &mut ops);
        }
        ops
    }

    // Boundary handling. With an operation set already in hand this is a
    // within-section boundary and only the admission handshake runs; with
    // none left the next section decides between the critical-section
    // protocol, a plain handshake, or termination.
    fn advance_op_set(&mut self, ctx: &SimContext, ops: &mut DeferredOps) {
        if self.current_op_set.is_some() {
            self.request_for_current_op(ctx);
            return;
        }
        loop {
            let was_critical = self.current_section.as_ref().is_some_and(|s| s.critical);
            let mut section = match self.process.next_section() {
                Some(section) => section,
                None => {
                    self.terminate_into(ctx, ops);
                    return;
                }
            };
            let op_set = match section.op_sets.pop_front() {
                Some(op_set) => op_set,
                None => continue,
            };
            let entering_critical = section.critical;
            self.current_section = Some(section);
            self.current_op_set = Some(op_set);

            if entering_critical && !self.critical_secured {
                self.release_io_if_needed(ctx);
                self.enter_critical_section(ctx);
            } else {
                if was_critical && !entering_critical {
                    self.leave_critical_section(ctx, ops);
                }
                self.request_for_current_op(ctx);
            }
            return;
        }
    }

    fn request_for_current_op(&mut self, ctx: &SimContext) {
        self.release_io_if_needed(ctx);
        self.request_resource(ctx);
    }

    fn release_io_if_needed(&mut self, ctx: &SimContext) {
        if self.last_completed == Some(Operation::Io) {
            ctx.release_io(self.pid);
        }
    }

    /// The admission handshake run at every operation-set boundary. An IO
    /// set sleeps on the I/O wait list. Anything else rolls for a resource
    /// request: granted or empty requests proceed straight to READY, denied
    /// ones park the process in WAIT for the kernel's per-cycle retry.
    fn request_resource(&mut self, ctx: &SimContext) {
        let operation = match &self.current_op_set {
            Some(op_set) => op_set.operation,
            None => return,
        };
        if operation == Operation::Io {
            self.set_state(State::Wait);
            ctx.request_io(self.pid);
            return;
        }

        match self.draw_resource_request(ctx) {
            Some(request) if !request.is_zero() => {
                if ctx.try_request_resources(self.pid, &request) {
                    self.acquired_resources(ctx, &request);
                } else {
                    self.set_state(State::Wait);
                    ctx.park_resource_request(self.pid, request);
                }
            }
            _ => {
                let empty = ResourceVector::zeros(ctx.config().num_resource_types);
                self.acquired_resources(ctx, &empty);
            }
        }
    }

    // 1-in-N roll; on a hit, a uniform draw per type up to the remaining
    // declared need.
    fn draw_resource_request(&self, ctx: &SimContext) -> Option<ResourceVector> {
        let bound = ctx.config().resource_request_chance_bound;
        if ctx.with_rng(|rng| rng.gen_range(0..bound)) != 0 {
            return None;
        }
        let need = ctx.resources().lock().unwrap().need_of(self.pid).cloned()?;
        let values = ctx.with_rng(|rng| {
            (0..need.len()).map(|i| rng.gen_range(0..=need.get(i))).collect()
        });
        Some(ResourceVector::from_values(values))
    }

    /// Takes ownership of a granted request and re-enters the ready queue.
    pub(crate) fn acquired_resources(&mut self, ctx: &SimContext, request: &ResourceVector) {
        self.current_resources = self.current_resources.add(request);
        self.set_state(State::Ready);
        ctx.request_cpu(self.core_id, self.ready_entry());
    }

    fn enter_critical_section(&mut self, ctx: &SimContext) {
        self.set_state(State::Wait);
        if ctx.request_critical_section(self.pid, self.template.index) {
            self.wakeup(ctx);
        }
    }

    /// Called with the semaphore held, immediately on an uncontended wait
    /// or later by the releasing process's signal. A concurrent forced
    /// termination may beat the signal to this PCB; an exited process
    /// stays exited.
    pub(crate) fn wakeup(&mut self, ctx: &SimContext) {
        if self.state == State::Exit {
            return;
        }
        self.critical_secured = true;
        self.request_resource(ctx);
    }

    fn leave_critical_section(&mut self, ctx: &SimContext, ops: &mut DeferredOps) {
        if self.critical_secured {
            self.critical_secured = false;
            if let Some(woken) = ctx.signal_semaphore(self.template.index) {
                ops.woken.push(woken);
            }
        }
    }

    fn maybe_fork(&mut self, ctx: &SimContext, ops: &mut DeferredOps) {
        let bound = ctx.config().fork_chance_bound;
        if ctx.with_rng(|rng| rng.gen_range(0..bound)) != 0 {
            return;
        }
        let section = match &self.current_section {
            Some(section) => section,
            None => return,
        };
        let child_process = Process::fork_from(&self.process, section);
        let (child, admitted) =
            ctx.create_child_process(self.template.clone(), self.pid, child_process, self.ipc_mode);
        ops.merge(admitted);
        // A child whose copied stream was empty exits during admission;
        // only a live child is recorded.
        if ctx.lookup(child).is_none() {
            return;
        }
        self.add_child(child);
        if self.ipc_mode == IpcMode::OrdinaryPipe {
            if let Some(pipe) = ctx.pipe_manager().retrieve_pipe(child) {
                self.pipes_to_children.insert(child, pipe);
            }
        }
    }

    // ---- memory ----

    fn access_memory(&mut self, ctx: &SimContext) {
        if let Some(address) = self.generate_logical_address(ctx) {
            let contents = self.read_from_memory(ctx, address);
            self.register = Some(Register {
                logical_address: Some(address),
                contents,
            });
        }
        // None: the register holds a reused IPC value with no address.
    }

    /// Locality model: once the register and a last-touched page exist,
    /// half of all accesses reuse the register's address, half of the rest
    /// stay within the last-touched page, and the remainder (and every
    /// access before any history exists) is uniform over the address space.
    fn generate_logical_address(&self, ctx: &SimContext) -> Option<u64> {
        let span = self.memory_required_bytes - WORD_SIZE_BYTES + 1;

        if let (Some(register), Some(last_page)) = (&self.register, self.last_page_accessed) {
            let (reuse, page_local) =
                ctx.with_rng(|rng| (rng.gen_bool(0.5), rng.gen_bool(0.5)));
            if reuse {
                return register.logical_address;
            }
            if page_local {
                let page_start = last_page as u64 * self.page_size_bytes;
                let final_page = last_page + 1 == self.page_table.len();
                let usable = if final_page {
                    // The final page may be partially used; keep the whole
                    // word inside the used bytes.
                    self.memory_required_bytes - page_start - WORD_SIZE_BYTES + 1
                } else {
                    self.page_size_bytes
                };
                let offset = ctx.with_rng(|rng| rng.gen_range(0..usable));
                return Some(page_start + offset);
            }
        }

        Some(ctx.with_rng(|rng| rng.gen_range(0..span)))
    }

    fn read_from_memory(&mut self, ctx: &SimContext, address: u64) -> Word {
        if let Some(register) = &self.register {
            if register.logical_address == Some(address) {
                return register.contents;
            }
        }
        let page_number = (address / self.page_size_bytes) as usize;
        let offset = address % self.page_size_bytes;
        let word = if offset > self.page_size_bytes - WORD_SIZE_BYTES {
            // The word runs past the page break into the next page.
            let page2 = self.page_table[page_number + 1];
            ctx.read_across_page_break(self.page_table[page_number], offset, page2)
        } else {
            ctx.read_memory(self.page_table[page_number], offset)
        };
        self.last_page_accessed = Some(page_number);
        word
    }

    // ---- IPC ----

    // Every CALCULATE cycle pushes the register's value to each live child
    // and pulls at most one value from the parent, by the family's mode.
    fn exchange_ipc(&mut self, ctx: &SimContext) {
        let outgoing = match &self.register {
            Some(register) => register.contents,
            None => return,
        };
        match self.ipc_mode {
            IpcMode::MessagePassing => {
                for &child in &self.children {
                    if ctx.lookup(child).is_some() {
                        ctx.message_passer().send(child, Message {
                            sender: self.pid,
                            contents: outgoing,
                        });
                    }
                }
                if let Some(message) = ctx.message_passer().receive(self.pid) {
                    if message.sender == self.parent {
                        self.register = Some(Register {
                            logical_address: None,
                            contents: message.contents,
                        });
                    }
                }
            }
            IpcMode::OrdinaryPipe => {
                for (&child, pipe) in &self.pipes_to_children {
                    if ctx.lookup(child).is_some() {
                        pipe.write(self.pid, outgoing);
                    }
                }
                if self.parent != KERNEL_ID {
                    if let Some(contents) =
                        self.pipe_from_parent.as_ref().and_then(|pipe| pipe.read(self.pid))
                    {
                        self.register = Some(Register {
                            logical_address: None,
                            contents,
                        });
                    }
                }
            }
        }
    }

    // ---- termination ----

    /// Moves to EXIT and returns everything this process holds: semaphore
    /// queue slots, the critical section, I/O waits, resources, and memory.
    /// The returned follow-up work carries the orphaned children (to be
    /// force-terminated) and any waiter popped off the semaphore; the
    /// caller applies it after dropping this PCB's guard, so termination
    /// never locks a second PCB from under this one.
    pub(crate) fn terminate(&mut self, ctx: &SimContext) -> DeferredOps {
        let mut ops = DeferredOps::default();
        self.terminate_into(ctx, &mut ops);
        ops
    }

    fn terminate_into(&mut self, ctx: &SimContext, ops: &mut DeferredOps) {
        if self.state == State::Exit {
            return;
        }
        self.set_state(State::Exit);
        ctx.remove_from_semaphore(self.pid, self.template.index);
        self.leave_critical_section(ctx, ops);
        ctx.release_io(self.pid);
        ctx.remove_process_resources(self.pid);
        ctx.release_page_table(&self.page_table);

        ops.orphans.extend(self.children.drain());
        let turnaround = self.created_at.elapsed();
        ctx.exit(self.pid, self.core_id, turnaround, self.waiting_time);
    }
}
