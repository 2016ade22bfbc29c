//! Task queue: shared FIFO of pending callback invocations.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use botloop_core::{BotError, Result, panic_message};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A queued callback invocation. Ownership moves to the worker that dequeues it.
pub struct Task {
    label: String,
    job: Job,
}

impl Task {
    pub fn new<F>(label: impl Into<String>, job: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            job: Box::new(job),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the job. A panic escaping the job is reported as a worker error.
    pub fn run(self) -> Result<()> {
        let label = self.label;
        match catch_unwind(AssertUnwindSafe(self.job)) {
            Ok(result) => result,
            Err(payload) => Err(BotError::Worker(format!(
                "task '{label}' panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

/// Unbounded multi-producer multi-consumer FIFO. Clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        Self { tx, rx }
    }

    /// Enqueue without blocking.
    pub fn put(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|e| BotError::Worker(format!("task queue closed, dropped '{}'", e.0.label)))
    }

    /// Dequeue, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Task> {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => Some(task),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drop every task not yet picked up. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new();
        for i in 0..3 {
            queue.put(Task::new(format!("t{i}"), || Ok(()))).unwrap();
        }
        assert_eq!(queue.len(), 3);
        let labels: Vec<String> = (0..3)
            .filter_map(|_| queue.recv_timeout(Duration::from_millis(10)))
            .map(|t| t.label().to_string())
            .collect();
        assert_eq!(labels, vec!["t0", "t1", "t2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_recv_timeout_on_empty() {
        let queue = TaskQueue::new();
        assert!(queue.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_panic_becomes_worker_error() {
        let task = Task::new("explode", || panic!("kaboom"));
        let err = task.run().unwrap_err();
        match err {
            BotError::Worker(msg) => {
                assert!(msg.contains("explode"));
                assert!(msg.contains("kaboom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_drain() {
        let queue = TaskQueue::new();
        queue.put(Task::new("a", || Ok(()))).unwrap();
        queue.put(Task::new("b", || Ok(()))).unwrap();
        assert_eq!(queue.drain(), 2);
        assert!(queue.is_empty());
    }
}
