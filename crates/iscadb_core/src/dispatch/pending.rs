//! Pending-task accounting.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counter of in-flight tasks with a completion condition.
///
/// Every submitted task holds a [`PendingGuard`]; the guard increments
/// the counter on creation and decrements it (waking waiters at zero)
/// when dropped, on every exit path.
pub struct PendingTasks {
    count: Mutex<usize>,
    cv: Condvar,
}

impl PendingTasks {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        })
    }

    /// Registers one task and returns its guard.
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> PendingGuard {
        *self.count.lock() += 1;
        PendingGuard {
            tasks: Arc::clone(self),
        }
    }

    /// Blocks until no tasks are pending.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cv.wait(&mut count);
        }
    }

    /// Current number of pending tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.count.lock()
    }
}

/// RAII registration of one in-flight task.
pub struct PendingGuard {
    tasks: Arc<PendingTasks>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut count = self.tasks.count.lock();
        *count -= 1;
        if *count == 0 {
            self.tasks.cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_decrements_on_drop() {
        let tasks = PendingTasks::new();
        let guard = tasks.begin();
        assert_eq!(tasks.pending(), 1);
        drop(guard);
        assert_eq!(tasks.pending(), 0);
    }

    #[test]
    fn wait_idle_returns_immediately_when_empty() {
        let tasks = PendingTasks::new();
        tasks.wait_idle();
    }

    #[test]
    fn wait_idle_blocks_until_guards_drop() {
        let tasks = PendingTasks::new();
        let guards: Vec<_> = (0..4).map(|_| tasks.begin()).collect();

        let tasks_clone = Arc::clone(&tasks);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(guards);
            let _ = tasks_clone;
        });

        tasks.wait_idle();
        assert_eq!(tasks.pending(), 0);
        handle.join().unwrap();
    }
}
