use std::collections::VecDeque;
use std::sync::Mutex;

use super::Pid;

/// Counting semaphore guarding one template's critical sections. Waiters
/// are woken in FIFO order; the caller of `signal` is handed the woken pid
/// so the wakeup never re-enters this lock.
pub struct Semaphore {
    inner: Mutex<Inner>,
}

struct Inner {
    value: i32,
    queue: VecDeque<Pid>,
}

impl Semaphore {
    pub fn new() -> Semaphore {
        Semaphore {
            inner: Mutex::new(Inner {
                value: 1,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Returns true when the semaphore was acquired immediately; otherwise
    /// the pid is queued and will be returned by a later `signal`.
    pub fn wait(&self, pid: Pid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.value -= 1;
        if inner.value < 0 {
            inner.queue.push_back(pid);
            false
        } else {
            true
        }
    }

    /// Releases the semaphore, returning the next waiter to wake, if any.
    pub fn signal(&self) -> Option<Pid> {
        let mut inner = self.inner.lock().unwrap();
        inner.value += 1;
        if inner.value <= 0 {
            inner.queue.pop_front()
        } else {
            None
        }
    }

    /// Dequeues a pid that was force-terminated while still waiting,
    /// refunding its permit. A no-op when the pid is not queued.
    pub fn remove_from_queue(&self, pid: Pid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(position) = inner.queue.iter().position(|&p| p == pid) {
            inner.queue.remove(position);
            inner.value += 1;
        }
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

impl Default for Semaphore {
    fn default() -> Semaphore {
        Semaphore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_waiter_acquires_immediately() {
        let semaphore = Semaphore::new();
        assert!(semaphore.wait(1));
        assert_eq!(semaphore.waiting_count(), 0);
    }

    #[test]
    fn test_signal_wakes_waiters_in_fifo_order() {
        let semaphore = Semaphore::new();
        assert!(semaphore.wait(0)); // holder
        assert!(!semaphore.wait(1));
        assert!(!semaphore.wait(2));
        assert!(!semaphore.wait(3));
        assert_eq!(semaphore.waiting_count(), 3);

        assert_eq!(semaphore.signal(), Some(1));
        assert_eq!(semaphore.signal(), Some(2));
        assert_eq!(semaphore.signal(), Some(3));
        assert_eq!(semaphore.signal(), None);
    }

    #[test]
    fn test_remove_from_queue_refunds_permit() {
        let semaphore = Semaphore::new();
        assert!(semaphore.wait(1));
        assert!(!semaphore.wait(2));
        assert!(!semaphore.wait(3));

        semaphore.remove_from_queue(2);
        assert_eq!(semaphore.waiting_count(), 1);
        // Pid 2 is gone, so the next wake is pid 3.
        assert_eq!(semaphore.signal(), Some(3));
    }

    #[test]
    fn test_remove_unqueued_pid_changes_nothing() {
        let semaphore = Semaphore::new();
        assert!(semaphore.wait(1));
        assert!(!semaphore.wait(2));

        semaphore.remove_from_queue(99);
        assert_eq!(semaphore.waiting_count(), 1);
        assert_eq!(semaphore.signal(), Some(2));
    }
}
