//! Poller: the fetch / classify / dispatch state machine.
//!
//! ```text
//!            start()                      stop() | RemoteError (!none_stop)
//! Stopped ───────────▶ Running ─────────────────────────────────▶ Stopped
//!                         │
//!                         └── handler error (!none_stop) | retries spent ──▶ FatallyStopped
//! ```
//!
//! The offset only ever moves forward, and only after a successful fetch:
//! a failed fetch is retried from the same offset.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use botloop_core::{
    BackoffConfig, BotError, EventKind, FetchRequest, PollingConfig, PollingMode, RemoteError,
    Result, Update, UpdateSource, WorkerConfig,
};
use botloop_dispatch::{Dispatch, UpdateDispatcher};
use botloop_workers::{CompositeSignal, PoolStats, Signal, Task, Worker, WorkerPool};
use parking_lot::Mutex;

use crate::backoff::{Backoff, Sleeper, ThreadSleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
    FatallyStopped,
}

/// Hook consulted before the poller applies its own error policy.
pub trait ExceptionHandler: Send + Sync {
    /// `true` marks the error as handled: it is cleared and polling carries on.
    fn handle(&self, error: &BotError) -> bool;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&BotError) -> bool + Send + Sync,
{
    fn handle(&self, error: &BotError) -> bool {
        self(error)
    }
}

/// Per-run polling options.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub none_stop: bool,
    /// Pause after each successful fetch.
    pub interval: Duration,
    /// Long-poll timeout passed to the source.
    pub timeout: Duration,
    pub limit: Option<u32>,
    pub allowed_updates: Option<Vec<EventKind>>,
    pub skip_pending: bool,
    pub mode: PollingMode,
}

impl From<&PollingConfig> for PollOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            none_stop: config.none_stop,
            interval: config.interval(),
            timeout: config.long_poll_timeout(),
            limit: config.limit,
            allowed_updates: config.allowed_updates.clone(),
            skip_pending: config.skip_pending,
            mode: config.mode,
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

type Exit = (PollerState, Result<()>);

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared between the control thread and the fetch task.
struct FetchShared {
    source: Arc<dyn UpdateSource>,
    offset: Mutex<Option<i64>>,
    batches: Mutex<VecDeque<Vec<Update>>>,
    in_flight: AtomicUsize,
}

impl FetchShared {
    fn request(&self, opts: &PollOptions) -> FetchRequest {
        FetchRequest {
            offset: *self.offset.lock(),
            limit: opts.limit,
            timeout: opts.timeout,
            allowed_updates: opts.allowed_updates.clone(),
        }
    }

    /// Fetch one batch and move the offset past it.
    fn fetch(&self, opts: &PollOptions) -> std::result::Result<Vec<Update>, RemoteError> {
        let request = self.request(opts);
        let batch = self.source.fetch_updates(&request)?;
        if let Some(max) = batch.iter().map(|u| u.update_id).max() {
            let next = max.saturating_add(1);
            let mut offset = self.offset.lock();
            if offset.is_none_or(|current| next > current) {
                *offset = Some(next);
            }
        }
        tracing::debug!("📥 Fetched {} updates at offset {:?}", batch.len(), request.offset);
        Ok(batch)
    }
}

pub struct Poller {
    fetch: Arc<FetchShared>,
    dispatcher: Arc<UpdateDispatcher>,
    workers: WorkerConfig,
    backoff: BackoffConfig,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    sleeper: Arc<dyn Sleeper>,
    state: Mutex<PollerState>,
    stop: Arc<Signal>,
    pool: Mutex<Option<Arc<WorkerPool>>>,
}

impl Poller {
    pub fn new(source: Arc<dyn UpdateSource>, dispatcher: Arc<UpdateDispatcher>) -> Self {
        Self {
            fetch: Arc::new(FetchShared {
                source,
                offset: Mutex::new(None),
                batches: Mutex::new(VecDeque::new()),
                in_flight: AtomicUsize::new(0),
            }),
            dispatcher,
            workers: WorkerConfig::default(),
            backoff: BackoffConfig::default(),
            exception_handler: None,
            sleeper: Arc::new(ThreadSleeper),
            state: Mutex::new(PollerState::Stopped),
            stop: Arc::new(Signal::new()),
            pool: Mutex::new(None),
        }
    }

    pub fn with_workers(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn dispatcher(&self) -> &Arc<UpdateDispatcher> {
        &self.dispatcher
    }

    /// Poll on the calling thread until stopped.
    pub fn start(&self, opts: &PollOptions) -> Result<()> {
        self.begin()?;
        self.run(opts)
    }

    /// Poll on a background thread. The poller is `Running` when this returns,
    /// so an immediate [`stop`](Self::stop) is never lost.
    pub fn spawn(self: &Arc<Self>, opts: PollOptions) -> Result<JoinHandle<Result<()>>> {
        self.begin()?;
        let poller = self.clone();
        std::thread::Builder::new()
            .name("botloop-poller".into())
            .spawn(move || poller.run(&opts))
            .map_err(|e| {
                *self.state.lock() = PollerState::Stopped;
                BotError::Worker(format!("failed to spawn poller thread: {e}"))
            })
    }

    /// Request a stop. Safe to call repeatedly, and before start.
    pub fn stop(&self) {
        if !self.stop.is_set() && self.is_running() {
            tracing::info!("🛑 Stop requested");
        }
        self.stop.set();
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == PollerState::Running
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    /// Next offset to request; `None` before the first non-empty batch.
    pub fn offset(&self) -> Option<i64> {
        *self.fetch.offset.lock()
    }

    /// Counters of the handler pool while a pooled run is active.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.lock().as_ref().map(|pool| pool.stats())
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == PollerState::Running {
            return Err(BotError::Worker("poller is already running".into()));
        }
        self.stop.clear();
        *state = PollerState::Running;
        Ok(())
    }

    fn run(&self, opts: &PollOptions) -> Result<()> {
        if opts.skip_pending {
            self.skip_pending(opts);
        }

        let (state, result) = match opts.mode {
            PollingMode::Pooled => self.run_pooled(opts),
            PollingMode::Inline => self.run_inline(opts),
        };

        *self.state.lock() = state;
        match (&state, &result) {
            (PollerState::FatallyStopped, Err(e)) => tracing::error!("💀 Polling stopped fatally: {e}"),
            (_, Err(e)) => tracing::warn!("🛑 Polling stopped: {e}"),
            _ => tracing::info!("🛑 Polling stopped"),
        }
        result
    }

    fn skip_pending(&self, opts: &PollOptions) {
        let request = FetchRequest {
            offset: Some(-1),
            limit: Some(1),
            timeout: Duration::ZERO,
            allowed_updates: opts.allowed_updates.clone(),
        };
        match self.fetch.source.fetch_updates(&request) {
            Ok(batch) => {
                if let Some(last) = batch.last() {
                    *self.fetch.offset.lock() = Some(last.update_id.saturating_add(1));
                    tracing::info!("⏭️ Skipped pending updates up to #{}", last.update_id);
                }
            }
            Err(e) => tracing::warn!("⚠️ Could not skip pending updates: {e}"),
        }
    }

    fn run_pooled(&self, opts: &PollOptions) -> Exit {
        let fetch_worker = match Worker::new("botloop-fetch", self.workers.queue_tick()) {
            Ok(worker) => worker,
            Err(e) => return (PollerState::FatallyStopped, Err(e)),
        };
        let pool = match WorkerPool::new(self.workers.num_threads, self.workers.queue_tick()) {
            Ok(pool) => Arc::new(pool),
            Err(e) => return (PollerState::FatallyStopped, Err(e)),
        };
        *self.pool.lock() = Some(pool.clone());
        let composite = CompositeSignal::new(
            vec![
                fetch_worker.done_signal(),
                fetch_worker.exception_signal(),
                pool.exception_signal(),
            ],
            self.workers.wait_tick(),
        );
        let mut backoff = Backoff::from_config(&self.backoff);
        tracing::info!("🚀 Polling started ({} handler workers)", pool.size());

        let exit = loop {
            if self.stop.is_set() {
                break (PollerState::Stopped, Ok(()));
            }

            composite.clear();
            if self.fetch.in_flight.load(Ordering::SeqCst) == 0 {
                if let Err(e) = fetch_worker.put(self.fetch_task(opts)) {
                    break (PollerState::FatallyStopped, Err(e));
                }
            }
            self.wait_for_progress(&composite, &fetch_worker, &pool);

            // Each source is cleared only by its own error, so a handler failure
            // raised alongside a fetch failure is still seen.
            if let Err(err) = fetch_worker.raise_exceptions() {
                let clear = || fetch_worker.clear_exceptions();
                if let ControlFlow::Break(exit) = self.handle_error(err, opts, &mut backoff, clear) {
                    if let Err(pending) = pool.raise_exceptions() {
                        tracing::error!("❌ {pending}");
                    }
                    break exit;
                }
            }
            if let Err(err) = pool.raise_exceptions() {
                let clear = || pool.clear_exceptions();
                if let ControlFlow::Break(exit) = self.handle_error(err, opts, &mut backoff, clear) {
                    break exit;
                }
            }

            let batches: Vec<Vec<Update>> = self.fetch.batches.lock().drain(..).collect();
            if batches.is_empty() {
                continue;
            }
            backoff.reset();
            for batch in batches {
                for dispatch in self.dispatcher.process(batch).dispatches {
                    if let Err(e) = pool.put(handler_task(dispatch)) {
                        tracing::error!("❌ Dropped handler task: {e}");
                    }
                }
            }

            if !opts.interval.is_zero() {
                self.sleeper.sleep(opts.interval, &self.stop);
            }
        };

        fetch_worker.close();
        pool.close();
        self.pool.lock().take();
        let stats = pool.stats();
        tracing::info!(
            "📊 Handlers: {} submitted, {} completed, {} failed",
            stats.submitted,
            stats.completed,
            stats.failed
        );
        exit
    }

    fn fetch_task(&self, opts: &PollOptions) -> Task {
        let fetch = self.fetch.clone();
        let opts = opts.clone();
        fetch.in_flight.fetch_add(1, Ordering::SeqCst);
        Task::new("fetch_updates", move || {
            let _in_flight = InFlight(&fetch.in_flight);
            let batch = fetch.fetch(&opts)?;
            fetch.batches.lock().push_back(batch);
            Ok(())
        })
    }

    fn wait_for_progress(&self, composite: &CompositeSignal, fetch_worker: &Worker, pool: &WorkerPool) {
        let tick = self.workers.wait_tick();
        while !composite.wait_timeout(tick) {
            // A change that landed just before the view was cleared never re-sets it.
            if self.stop.is_set()
                || !self.fetch.batches.lock().is_empty()
                || fetch_worker.exception_signal().is_set()
                || pool.exception_signal().is_set()
            {
                return;
            }
        }
    }

    fn run_inline(&self, opts: &PollOptions) -> Exit {
        let mut backoff = Backoff::from_config(&self.backoff);
        tracing::info!("🚀 Polling started (inline)");

        loop {
            if self.stop.is_set() {
                return (PollerState::Stopped, Ok(()));
            }

            let outcome = match self.fetch.fetch(opts) {
                Ok(batch) => {
                    backoff.reset();
                    self.run_batch_inline(batch)
                }
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(()) => {
                    if !opts.interval.is_zero() {
                        self.sleeper.sleep(opts.interval, &self.stop);
                    }
                }
                Err(err) => {
                    if let ControlFlow::Break(exit) = self.handle_error(err, opts, &mut backoff, || {}) {
                        return exit;
                    }
                }
            }
        }
    }

    // Every handler in the batch runs; the first failure is reported.
    fn run_batch_inline(&self, batch: Vec<Update>) -> Result<()> {
        let mut first_error = None;
        for dispatch in self.dispatcher.process(batch).dispatches {
            if let Err(e) = dispatch.handler.invoke(&dispatch.event) {
                tracing::warn!("⚠️ Handler {} failed: {e}", dispatch.label());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn handle_error<F: FnOnce()>(
        &self,
        err: BotError,
        opts: &PollOptions,
        backoff: &mut Backoff,
        clear: F,
    ) -> ControlFlow<Exit> {
        if self.exception_handler.as_ref().is_some_and(|h| h.handle(&err)) {
            tracing::debug!("Exception handler took care of: {err}");
            clear();
            if err.is_remote() {
                // Handled remote failures still back off.
                let delay = backoff.next_delay().unwrap_or_else(|| backoff.current());
                self.sleeper.sleep(delay, &self.stop);
            }
            return ControlFlow::Continue(());
        }

        if err.is_remote() {
            if !opts.none_stop {
                tracing::error!("❌ Fetch failed: {err}");
                return ControlFlow::Break((PollerState::Stopped, Err(err)));
            }
            clear();
            return match backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!("⚠️ Fetch failed: {err}. Retrying in {delay:?}");
                    self.sleeper.sleep(delay, &self.stop);
                    ControlFlow::Continue(())
                }
                None => {
                    tracing::error!("❌ Fetch failed {} times in a row: {err}", backoff.attempts());
                    ControlFlow::Break((PollerState::FatallyStopped, Err(err)))
                }
            };
        }

        if opts.none_stop {
            tracing::error!("❌ {err}");
            clear();
            ControlFlow::Continue(())
        } else {
            tracing::error!("❌ {err}. Stopping.");
            ControlFlow::Break((PollerState::FatallyStopped, Err(err)))
        }
    }
}

fn handler_task(dispatch: Dispatch) -> Task {
    let label = dispatch.label();
    let Dispatch { handler, event, .. } = dispatch;
    Task::new(label, move || handler.invoke(&event))
}
