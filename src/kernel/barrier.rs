use std::sync::{Condvar, Mutex};

/// Counting rendezvous driving the global logical clock. Each tick the
/// kernel releases every participant (core workers plus the I/O unit) for
/// exactly one unit of work, then blocks until all of them acknowledge.
/// This is the only ordering guarantee between concurrent actors.
pub struct CycleBarrier {
    inner: Mutex<BarrierState>,
    start_signal: Condvar,
    done_signal: Condvar,
}

struct BarrierState {
    cycle: u64,
    remaining: usize,
    participants: usize,
    shutdown: bool,
}

impl CycleBarrier {
    pub fn new(participants: usize) -> CycleBarrier {
        CycleBarrier {
            inner: Mutex::new(BarrierState {
                cycle: 0,
                remaining: 0,
                participants,
                shutdown: false,
            }),
            start_signal: Condvar::new(),
            done_signal: Condvar::new(),
        }
    }

    /// Kernel side: signal all participants to perform one unit of work and
    /// block until every one has completed.
    pub fn run_cycle(&self) {
        let mut state = self.inner.lock().unwrap();
        state.cycle += 1;
        state.remaining = state.participants;
        self.start_signal.notify_all();
        while state.remaining > 0 {
            state = self.done_signal.wait(state).unwrap();
        }
    }

    /// Participant side: block until a cycle newer than `last_seen` begins.
    /// Returns `None` once the barrier has been shut down.
    pub fn await_cycle(&self, last_seen: u64) -> Option<u64> {
        let mut state = self.inner.lock().unwrap();
        while !state.shutdown && state.cycle == last_seen {
            state = self.start_signal.wait(state).unwrap();
        }
        if state.shutdown {
            None
        } else {
            Some(state.cycle)
        }
    }

    /// Participant side: acknowledge completion of this cycle's unit of work.
    pub fn complete(&self) {
        let mut state = self.inner.lock().unwrap();
        state.remaining -= 1;
        if state.remaining == 0 {
            self.done_signal.notify_all();
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.inner.lock().unwrap();
        state.shutdown = true;
        self.start_signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_all_participants_complete_before_clock_advances() {
        let participants = 3;
        let barrier = Arc::new(CycleBarrier::new(participants));
        let units_done = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..participants {
            let barrier = barrier.clone();
            let units_done = units_done.clone();
            handles.push(thread::spawn(move || {
                let mut seen = 0;
                while let Some(cycle) = barrier.await_cycle(seen) {
                    units_done.fetch_add(1, Ordering::SeqCst);
                    barrier.complete();
                    seen = cycle;
                }
            }));
        }

        for cycle in 1..=5u64 {
            barrier.run_cycle();
            // The barrier only returns once all acknowledgements are in.
            assert_eq!(units_done.load(Ordering::SeqCst), cycle * participants as u64);
        }

        barrier.shutdown();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(units_done.load(Ordering::SeqCst), 15);
    }
}
