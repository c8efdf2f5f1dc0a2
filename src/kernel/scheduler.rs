use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::str::FromStr;

use super::pcb::Priority;
use super::Pid;

pub const TIME_QUANTUM: u32 = 10;

/// A ready-queue entry. Policy-relevant fields are captured when the
/// process (re-)enters the queue; the worker resolves the pid back to its
/// PCB at dispatch time.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEntry {
    pub pid: Pid,
    pub priority: Priority,
    /// Remaining cycles of the current CALCULATE burst at enqueue time;
    /// zero when the process is not in a CALCULATE burst.
    pub remaining_burst: u32,
}

/// A pluggable ready-queue policy. One instance per core, shared by that
/// core's workers.
pub trait Scheduler: Send {
    fn add(&mut self, entry: ReadyEntry);
    fn remove(&mut self) -> Option<ReadyEntry>;
    fn ready_count(&self) -> usize;
    /// Whether a process that has held a worker for `counter` consecutive
    /// cycles should be preempted.
    fn should_preempt(&self, counter: u32) -> bool;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    RoundRobin,
    ShortestJobFirst,
    MultiLevelQueue,
}

impl SchedulerKind {
    pub fn create(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::RoundRobin => Box::new(RoundRobinScheduler::new()),
            SchedulerKind::ShortestJobFirst => Box::new(SjfScheduler::new()),
            SchedulerKind::MultiLevelQueue => Box::new(MlqScheduler::new()),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<SchedulerKind, String> {
        match s.to_lowercase().as_str() {
            "rr" | "round-robin" => Ok(SchedulerKind::RoundRobin),
            "sjf" | "shortest-job-first" => Ok(SchedulerKind::ShortestJobFirst),
            "mlq" | "multi-level-queue" => Ok(SchedulerKind::MultiLevelQueue),
            _ => Err(format!("unknown scheduling policy: {}", s)),
        }
    }
}

/// Round Robin: one circular FIFO queue, fixed time quantum.
pub struct RoundRobinScheduler {
    queue: VecDeque<ReadyEntry>,
}

impl RoundRobinScheduler {
    pub fn new() -> RoundRobinScheduler {
        RoundRobinScheduler { queue: VecDeque::new() }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn add(&mut self, entry: ReadyEntry) {
        self.queue.push_back(entry);
    }

    fn remove(&mut self) -> Option<ReadyEntry> {
        self.queue.pop_front()
    }

    fn ready_count(&self) -> usize {
        self.queue.len()
    }

    fn should_preempt(&self, counter: u32) -> bool {
        counter >= TIME_QUANTUM
    }

    fn name(&self) -> &'static str {
        "Round Robin"
    }
}

// Min-order on (burst, arrival) for the SJF heap; BinaryHeap is a max-heap,
// so comparisons are inverted here.
struct SjfEntry {
    entry: ReadyEntry,
    sequence: u64,
}

impl PartialEq for SjfEntry {
    fn eq(&self, other: &SjfEntry) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SjfEntry {}

impl PartialOrd for SjfEntry {
    fn partial_cmp(&self, other: &SjfEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SjfEntry {
    fn cmp(&self, other: &SjfEntry) -> Ordering {
        other
            .entry
            .remaining_burst
            .cmp(&self.entry.remaining_burst)
            .then(other.sequence.cmp(&self.sequence))
    }
}

/// Shortest Job First: ordered by the remaining CALCULATE-burst length
/// captured at enqueue time, FIFO among ties. Never preempts; ordering is
/// only re-evaluated when a process re-enters the queue.
pub struct SjfScheduler {
    heap: BinaryHeap<SjfEntry>,
    next_sequence: u64,
}

impl SjfScheduler {
    pub fn new() -> SjfScheduler {
        SjfScheduler {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }
}

impl Scheduler for SjfScheduler {
    fn add(&mut self, entry: ReadyEntry) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(SjfEntry { entry, sequence });
    }

    fn remove(&mut self) -> Option<ReadyEntry> {
        self.heap.pop().map(|e| e.entry)
    }

    fn ready_count(&self) -> usize {
        self.heap.len()
    }

    fn should_preempt(&self, _counter: u32) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "Shortest Job First"
    }
}

/// Multi-Level Queue: strict-priority FIFO queues, drained high before
/// medium before low, with the Round Robin time quantum.
pub struct MlqScheduler {
    high: VecDeque<ReadyEntry>,
    medium: VecDeque<ReadyEntry>,
    low: VecDeque<ReadyEntry>,
}

impl MlqScheduler {
    pub fn new() -> MlqScheduler {
        MlqScheduler {
            high: VecDeque::new(),
            medium: VecDeque::new(),
            low: VecDeque::new(),
        }
    }
}

impl Scheduler for MlqScheduler {
    fn add(&mut self, entry: ReadyEntry) {
        match entry.priority {
            Priority::High => self.high.push_back(entry),
            Priority::Medium => self.medium.push_back(entry),
            Priority::Low => self.low.push_back(entry),
        }
    }

    fn remove(&mut self) -> Option<ReadyEntry> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn ready_count(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    fn should_preempt(&self, counter: u32) -> bool {
        counter >= TIME_QUANTUM
    }

    fn name(&self) -> &'static str {
        "Multi-Level Queue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: Pid, priority: Priority, remaining_burst: u32) -> ReadyEntry {
        ReadyEntry { pid, priority, remaining_burst }
    }

    #[test]
    fn test_round_robin_is_fifo() {
        let mut scheduler = RoundRobinScheduler::new();
        for pid in 1..=3 {
            scheduler.add(entry(pid, Priority::Medium, 0));
        }
        assert_eq!(scheduler.ready_count(), 3);
        assert_eq!(scheduler.remove().unwrap().pid, 1);
        assert_eq!(scheduler.remove().unwrap().pid, 2);
        assert_eq!(scheduler.remove().unwrap().pid, 3);
        assert!(scheduler.remove().is_none());
    }

    #[test]
    fn test_round_robin_preempts_at_quantum() {
        let scheduler = RoundRobinScheduler::new();
        assert!(!scheduler.should_preempt(TIME_QUANTUM - 1));
        assert!(scheduler.should_preempt(TIME_QUANTUM));
        assert!(scheduler.should_preempt(TIME_QUANTUM + 1));
    }

    #[test]
    fn test_sjf_orders_by_remaining_burst() {
        let mut scheduler = SjfScheduler::new();
        scheduler.add(entry(1, Priority::Medium, 30));
        scheduler.add(entry(2, Priority::Medium, 5));
        scheduler.add(entry(3, Priority::Medium, 0)); // not in a CALCULATE burst
        scheduler.add(entry(4, Priority::Medium, 12));

        assert_eq!(scheduler.remove().unwrap().pid, 3);
        assert_eq!(scheduler.remove().unwrap().pid, 2);
        assert_eq!(scheduler.remove().unwrap().pid, 4);
        assert_eq!(scheduler.remove().unwrap().pid, 1);
    }

    #[test]
    fn test_sjf_ties_break_fifo_and_never_preempt() {
        let mut scheduler = SjfScheduler::new();
        scheduler.add(entry(1, Priority::Medium, 8));
        scheduler.add(entry(2, Priority::Medium, 8));
        assert_eq!(scheduler.remove().unwrap().pid, 1);
        assert_eq!(scheduler.remove().unwrap().pid, 2);
        assert!(!scheduler.should_preempt(u32::MAX));
    }

    #[test]
    fn test_mlq_drains_strictly_by_priority() {
        let mut scheduler = MlqScheduler::new();
        scheduler.add(entry(1, Priority::Low, 0));
        scheduler.add(entry(2, Priority::High, 0));
        scheduler.add(entry(3, Priority::Medium, 0));
        scheduler.add(entry(4, Priority::High, 0));

        assert_eq!(scheduler.remove().unwrap().pid, 2);
        assert_eq!(scheduler.remove().unwrap().pid, 4);
        assert_eq!(scheduler.remove().unwrap().pid, 3);
        assert_eq!(scheduler.remove().unwrap().pid, 1);
        assert!(scheduler.should_preempt(TIME_QUANTUM));
    }

    #[test]
    fn test_scheduler_kind_parse() {
        assert_eq!("rr".parse::<SchedulerKind>().unwrap(), SchedulerKind::RoundRobin);
        assert_eq!("SJF".parse::<SchedulerKind>().unwrap(), SchedulerKind::ShortestJobFirst);
        assert_eq!("multi-level-queue".parse::<SchedulerKind>().unwrap(), SchedulerKind::MultiLevelQueue);
        assert!("fifo".parse::<SchedulerKind>().is_err());
    }
}
