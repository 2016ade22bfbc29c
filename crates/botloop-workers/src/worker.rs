//! Worker: one thread running queued tasks one at a time.
//!
//! Lifecycle of a task on a worker:
//! ```text
//! dequeue → clear(done, exception, continue) → set(received) → run
//!   ├── Ok  → set(done)
//!   └── Err → capture → on_exception(handle, err) → set(exception)
//!             → block until `continue` (or stop)
//! ```
//! The block after a failure keeps the next task from running before the
//! owner has seen the failure. A pool's callback releases it immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use botloop_core::{BotError, Result};
use parking_lot::Mutex;

use crate::queue::{Task, TaskQueue};
use crate::signal::Signal;

/// Called on the worker thread when a task fails.
pub type ExceptionCallback = Arc<dyn Fn(&WorkerHandle, &BotError) + Send + Sync>;

struct WorkerShared {
    name: String,
    queue: TaskQueue,
    tick: Duration,
    running: AtomicBool,
    received: Arc<Signal>,
    done: Arc<Signal>,
    exception: Arc<Signal>,
    continue_gate: Signal,
    failure: Mutex<Option<BotError>>,
    on_exception: Option<ExceptionCallback>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// View of a worker handed to exception callbacks.
#[derive(Clone)]
pub struct WorkerHandle(Arc<WorkerShared>);

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Let the worker move on to its next task.
    pub fn release(&self) {
        self.0.continue_gate.set();
    }
}

/// A single worker thread pulling from a [`TaskQueue`].
pub struct Worker {
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Worker with its own private queue.
    pub fn new(name: impl Into<String>, tick: Duration) -> Result<Self> {
        Self::with_queue(name, TaskQueue::new(), tick, None)
    }

    /// Worker consuming a (possibly shared) queue.
    pub fn with_queue(
        name: impl Into<String>,
        queue: TaskQueue,
        tick: Duration,
        on_exception: Option<ExceptionCallback>,
    ) -> Result<Self> {
        let shared = Arc::new(WorkerShared {
            name: name.into(),
            queue,
            tick,
            running: AtomicBool::new(true),
            received: Arc::new(Signal::new()),
            done: Arc::new(Signal::new()),
            exception: Arc::new(Signal::new()),
            continue_gate: Signal::new(),
            failure: Mutex::new(None),
            on_exception,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || run(thread_shared))
            .map_err(|e| BotError::Worker(format!("failed to spawn worker '{}': {e}", shared.name)))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a task. Never blocks.
    pub fn put(&self, task: Task) -> Result<()> {
        self.shared.queue.put(task)
    }

    pub fn received_signal(&self) -> Arc<Signal> {
        self.shared.received.clone()
    }

    pub fn done_signal(&self) -> Arc<Signal> {
        self.shared.done.clone()
    }

    pub fn exception_signal(&self) -> Arc<Signal> {
        self.shared.exception.clone()
    }

    /// Hand back the captured failure, if the exception signal is set.
    /// The failure stays recorded until [`clear_exceptions`](Self::clear_exceptions).
    pub fn raise_exceptions(&self) -> Result<()> {
        if !self.shared.exception.is_set() {
            return Ok(());
        }
        match self.shared.failure.lock().clone() {
            Some(err) => Err(err),
            None => Err(BotError::Worker(format!(
                "worker '{}' signalled a failure without details",
                self.shared.name
            ))),
        }
    }

    /// Forget the captured failure and release the worker.
    pub fn clear_exceptions(&self) {
        self.shared.failure.lock().take();
        self.shared.exception.clear();
        self.shared.continue_gate.set();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Ask the thread to exit. It notices within one queue tick;
    /// a task already running is not interrupted.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.continue_gate.set();
    }

    /// Wait for the thread to exit. Call [`stop`](Self::stop) first.
    pub fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("❌ Worker {} thread panicked", self.shared.name);
            }
        }
    }

    /// Stop and join.
    pub fn close(&self) {
        self.stop();
        self.join();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(shared: Arc<WorkerShared>) {
    tracing::debug!("🧵 Worker {} started", shared.name);

    while shared.running.load(Ordering::SeqCst) {
        let Some(task) = shared.queue.recv_timeout(shared.tick) else {
            continue;
        };

        shared.continue_gate.clear();
        shared.received.clear();
        shared.done.clear();
        shared.exception.clear();
        shared.received.set();

        let label = task.label().to_string();
        tracing::trace!("Worker {} received task '{}'", shared.name, label);

        match task.run() {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                shared.done.set();
            }
            Err(err) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("⚠️ Worker {} task '{}' failed: {}", shared.name, label, err);
                *shared.failure.lock() = Some(err.clone());
                if let Some(callback) = &shared.on_exception {
                    callback(&WorkerHandle(shared.clone()), &err);
                }
                shared.exception.set();

                while shared.running.load(Ordering::SeqCst)
                    && !shared.continue_gate.wait_timeout(shared.tick)
                {}
            }
        }
    }

    tracing::debug!("🧵 Worker {} stopped", shared.name);
}
