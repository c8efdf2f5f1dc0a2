use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Measures one core's scheduler performance: worker utilization, process
/// throughput, and average turnaround/waiting times of the processes that
/// terminated on the core.
pub struct CoreStats {
    inner: Mutex<Inner>,
}

struct Inner {
    running: bool,
    started_at: Option<Instant>,
    total_run_time: Duration,
    utilized_cycles: u64,
    total_cycles: u64,
    completed_processes: u64,
    total_turnaround: Duration,
    total_waiting: Duration,
}

impl CoreStats {
    pub fn new() -> CoreStats {
        CoreStats {
            inner: Mutex::new(Inner {
                running: false,
                started_at: None,
                total_run_time: Duration::ZERO,
                utilized_cycles: 0,
                total_cycles: 0,
                completed_processes: 0,
                total_turnaround: Duration::ZERO,
                total_waiting: Duration::ZERO,
            }),
        }
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = true;
        inner.started_at = Some(Instant::now());
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(started_at) = inner.started_at.take() {
            inner.total_run_time += started_at.elapsed();
        }
        inner.running = false;
    }

    /// One worker spent one cycle advancing a process.
    pub fn increment_utilized_cycles(&self) {
        self.inner.lock().unwrap().utilized_cycles += 1;
    }

    /// One worker completed one unit of work, busy or idle.
    pub fn increment_total_cycles(&self) {
        self.inner.lock().unwrap().total_cycles += 1;
    }

    pub fn register_termination(&self, turnaround: Duration, waiting: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.completed_processes += 1;
        inner.total_turnaround += turnaround;
        inner.total_waiting += waiting;
    }

    pub fn utilization(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.total_cycles == 0 {
            return 0.0;
        }
        inner.utilized_cycles as f64 / inner.total_cycles as f64
    }

    /// Completed processes per second of wall run time.
    pub fn throughput(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let mut elapsed = inner.total_run_time;
        if let Some(started_at) = inner.started_at {
            elapsed += started_at.elapsed();
        }
        let seconds = elapsed.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        inner.completed_processes as f64 / seconds
    }

    pub fn completed_processes(&self) -> u64 {
        self.inner.lock().unwrap().completed_processes
    }

    pub fn avg_turnaround(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        if inner.completed_processes == 0 {
            return Duration::ZERO;
        }
        inner.total_turnaround / inner.completed_processes as u32
    }

    pub fn avg_waiting(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        if inner.completed_processes == 0 {
            return Duration::ZERO;
        }
        inner.total_waiting / inner.completed_processes as u32
    }
}

impl Default for CoreStats {
    fn default() -> CoreStats {
        CoreStats::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_counts_busy_over_total() {
        let stats = CoreStats::new();
        assert_eq!(stats.utilization(), 0.0);
        for _ in 0..4 {
            stats.increment_total_cycles();
        }
        stats.increment_utilized_cycles();
        stats.increment_utilized_cycles();
        assert!((stats.utilization() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_averages_guard_against_zero_completions() {
        let stats = CoreStats::new();
        assert_eq!(stats.avg_turnaround(), Duration::ZERO);
        assert_eq!(stats.avg_waiting(), Duration::ZERO);
        assert_eq!(stats.throughput(), 0.0);

        stats.register_termination(Duration::from_millis(40), Duration::from_millis(10));
        stats.register_termination(Duration::from_millis(20), Duration::from_millis(30));
        assert_eq!(stats.avg_turnaround(), Duration::from_millis(30));
        assert_eq!(stats.avg_waiting(), Duration::from_millis(20));
        assert_eq!(stats.completed_processes(), 2);
    }
}
