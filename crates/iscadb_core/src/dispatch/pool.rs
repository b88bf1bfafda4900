//! Bounded worker pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolQueue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct PoolInner {
    queue: Mutex<PoolQueue>,
    cv: Condvar,
}

/// A fixed-size pool of worker threads.
///
/// The worker count is `max(1, min(requested, hardware parallelism))`.
/// Workers run until the pool is dropped; on shutdown the queue is
/// drained before the workers exit, so every submitted job completes.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool with up to `requested` workers.
    #[must_use]
    pub fn new(requested: usize) -> Self {
        let hardware = thread::available_parallelism().map_or(1, |n| n.get());
        let count = requested.min(hardware).max(1);

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let workers = (0..count)
            .map(|_| {
                let inner = Arc::clone(&inner);
                thread::spawn(move || worker_loop(&inner))
            })
            .collect();

        debug!(workers = count, "worker pool started");
        Self { inner, workers }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues a job for execution.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let mut queue = self.inner.queue.lock();
        queue.jobs.push_back(Box::new(job));
        drop(queue);
        self.inner.cv.notify_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.queue.lock().shutdown = true;
        self.inner.cv.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                debug!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.shutdown {
                    break None;
                }
                inner.cv.wait(&mut queue);
            }
        };
        match job {
            Some(job) => job(),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn executes_submitted_jobs() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool); // joins after draining

        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn worker_count_is_bounded() {
        assert_eq!(WorkerPool::new(0).worker_count(), 1);
        assert!(WorkerPool::new(1024).worker_count() <= 1024);
        assert!(WorkerPool::new(1024).worker_count() >= 1);
    }

    #[test]
    fn drop_waits_for_in_flight_jobs() {
        let pool = WorkerPool::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&done);
        pool.execute(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(1, Ordering::SeqCst);
        });
        drop(pool);

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
