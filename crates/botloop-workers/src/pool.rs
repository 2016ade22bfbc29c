//! Worker pool: a fixed set of workers sharing one task queue.
//!
//! A failing worker reports to the pool, which records the failure, raises the
//! pool-level `exception` signal and releases the worker at once. One bad
//! handler never stalls a lane; the failure is kept for the owner to inspect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use botloop_core::{BotError, Result};
use parking_lot::Mutex;

use crate::queue::{Task, TaskQueue};
use crate::signal::Signal;
use crate::worker::{ExceptionCallback, Worker, WorkerHandle};

/// Counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct WorkerPool {
    queue: TaskQueue,
    workers: Vec<Worker>,
    exception: Arc<Signal>,
    failure: Arc<Mutex<Option<BotError>>>,
    submitted: AtomicU64,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(num_threads: usize, tick: Duration) -> Result<Self> {
        if num_threads == 0 {
            return Err(BotError::Worker("worker pool needs at least one thread".into()));
        }

        let queue = TaskQueue::new();
        let exception = Arc::new(Signal::new());
        let failure: Arc<Mutex<Option<BotError>>> = Arc::new(Mutex::new(None));

        let on_exception: ExceptionCallback = {
            let exception = exception.clone();
            let failure = failure.clone();
            Arc::new(move |worker: &WorkerHandle, err: &BotError| {
                tracing::debug!("Pool recorded failure from {}: {}", worker.name(), err);
                *failure.lock() = Some(err.clone());
                exception.set();
                worker.release();
            })
        };

        let workers = (0..num_threads)
            .map(|i| {
                Worker::with_queue(
                    format!("botloop-pool-{i}"),
                    queue.clone(),
                    tick,
                    Some(on_exception.clone()),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("🧵 Worker pool started with {} threads", num_threads);

        Ok(Self {
            queue,
            workers,
            exception,
            failure,
            submitted: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue a task for whichever worker is free first.
    pub fn put(&self, task: Task) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BotError::Worker(format!(
                "worker pool is closed, dropped '{}'",
                task.label()
            )));
        }
        self.queue.put(task)?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn exception_signal(&self) -> Arc<Signal> {
        self.exception.clone()
    }

    /// Hand back the most recent failure of any worker, if one is pending.
    pub fn raise_exceptions(&self) -> Result<()> {
        if !self.exception.is_set() {
            return Ok(());
        }
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Err(BotError::Worker("worker pool signalled a failure without details".into())),
        }
    }

    pub fn clear_exceptions(&self) {
        self.failure.lock().take();
        self.exception.clear();
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            queued: self.queue.len(),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.workers.iter().map(Worker::completed).sum(),
            failed: self.workers.iter().map(Worker::failed).sum(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop and join every worker. Tasks not yet started are dropped;
    /// running tasks finish first. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in &self.workers {
            worker.stop();
        }
        for worker in &self.workers {
            worker.join();
        }
        let dropped = self.queue.drain();
        if dropped > 0 {
            tracing::warn!("⚠️ Worker pool closed with {} unstarted tasks dropped", dropped);
        }
        tracing::info!("🧵 Worker pool closed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}
