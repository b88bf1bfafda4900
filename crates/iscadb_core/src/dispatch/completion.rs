//! Completion dispatch context.
//!
//! Task callbacks must not run on the worker that executed the task
//! when the host has an event loop to protect: completions are instead
//! posted to an injectable "post-to" function. With no function
//! configured the callback is invoked inline on the worker.
//!
//! [`CompletionQueue`] is a ready-made context: completions accumulate
//! in a queue and run when the host pumps it, which also lets tests
//! drive completions deterministically.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// A boxed completion callback.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Where completions are sent to run.
#[derive(Clone, Default)]
pub struct CompletionSink {
    post: Option<Arc<dyn Fn(Completion) + Send + Sync + 'static>>,
}

impl CompletionSink {
    /// A sink that invokes completions inline on the calling thread.
    #[must_use]
    pub fn inline() -> Self {
        Self { post: None }
    }

    /// A sink that forwards completions to `post`.
    pub fn new(post: impl Fn(Completion) + Send + Sync + 'static) -> Self {
        Self {
            post: Some(Arc::new(post)),
        }
    }

    /// Dispatches one completion.
    pub fn post(&self, completion: impl FnOnce() + Send + 'static) {
        match &self.post {
            Some(post) => post(Box::new(completion)),
            None => completion(),
        }
    }
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSink")
            .field("inline", &self.post.is_none())
            .finish()
    }
}

/// A pumpable completion context.
pub struct CompletionQueue {
    queue: Mutex<VecDeque<Completion>>,
}

impl CompletionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// A sink that enqueues completions onto this queue.
    #[must_use]
    pub fn sink(self: &Arc<Self>) -> CompletionSink {
        let queue = Arc::clone(self);
        CompletionSink::new(move |completion| {
            queue.queue.lock().push_back(completion);
        })
    }

    /// Runs every queued completion, returning how many ran.
    ///
    /// Completions are drained under the lock but run outside it, so a
    /// callback may submit further work without deadlocking.
    pub fn pump(&self) -> usize {
        let drained: Vec<Completion> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        let count = drained.len();
        for completion in drained {
            completion();
        }
        count
    }

    /// Number of completions waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_sink_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let sink = CompletionSink::inline();

        let flag = Arc::clone(&ran);
        sink.post(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_defers_until_pump() {
        let queue = CompletionQueue::new();
        let sink = queue.sink();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let flag = Arc::clone(&ran);
            sink.post(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pump(), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn pump_allows_reentrant_posts() {
        let queue = CompletionQueue::new();
        let sink = queue.sink();

        let reposted = sink.clone();
        sink.post(move || {
            reposted.post(|| {});
        });

        assert_eq!(queue.pump(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pump(), 1);
    }
}
