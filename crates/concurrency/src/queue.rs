//! Per-collection single-writer queue (spec.md §4.6, C6).
//!
//! Every mutating call is submitted as a boxed job; a single consumer
//! task drains them strictly in arrival order, so two concurrent
//! mutations on the same collection can never interleave. A job's
//! panic is caught and turned into a dropped reply rather than killing
//! the consumer task, so one bad task does not wedge every later one.

use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle for submitting serialized write jobs to a collection.
///
/// Cloning a `WriteQueue` shares the same consumer; dropping every
/// clone (and the queue's own sender) lets the consumer task end.
#[derive(Clone)]
pub struct WriteQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl WriteQueue {
    /// Spawn the consumer task and return a handle to it.
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!("write queue job panicked; reply channel dropped, consumer continues");
                }
            }
        });
        WriteQueue { sender }
    }

    /// Enqueue `f`, to run once every previously submitted job has
    /// finished. Returns a receiver for its result; if the queue's
    /// consumer has already shut down, the receiver resolves to an
    /// error when awaited (`RecvError`), mirroring "the task was never
    /// run".
    pub fn submit<F, R>(&self, f: F) -> oneshot::Receiver<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        });
        // An error here means the consumer task is gone; the caller's
        // receiver will simply never resolve with a value.
        let _ = self.sender.send(job);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = WriteQueue::spawn();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..10 {
            let order = order.clone();
            receivers.push(queue.submit(move || {
                order.lock().unwrap().push(i);
                i
            }));
        }
        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), i);
        }
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn a_panicking_job_does_not_block_later_jobs() {
        let queue = WriteQueue::spawn();
        let panicking = queue.submit(|| -> i32 { panic!("boom") });
        let next = queue.submit(|| 42);
        assert!(panicking.await.is_err());
        assert_eq!(next.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn concurrent_submitters_are_still_fully_serialized() {
        let queue = WriteQueue::spawn();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let queue = queue.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let rx = queue.submit(move || counter.fetch_add(1, Ordering::SeqCst));
                rx.await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
