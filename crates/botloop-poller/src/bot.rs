//! Bot: handler registration and polling control behind one handle.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use botloop_core::{BotConfig, Event, EventKind, Result, SaverConfig, UpdateSource};
use botloop_dispatch::{
    CallbackRegistry, FileHandlerStore, Filters, Handler, HandlerRegistry, KeyedHandlers,
    UpdateDispatcher,
};
use serde_json::Value;

use crate::poller::{ExceptionHandler, PollOptions, Poller, PollerState};

pub struct Bot {
    config: BotConfig,
    registry: Arc<HandlerRegistry>,
    callbacks: Arc<CallbackRegistry>,
    poller: Arc<Poller>,
}

impl Bot {
    pub fn new(config: BotConfig, source: Arc<dyn UpdateSource>) -> Result<Self> {
        Self::build(config, source, None)
    }

    pub fn with_exception_handler(
        config: BotConfig,
        source: Arc<dyn UpdateSource>,
        handler: Arc<dyn ExceptionHandler>,
    ) -> Result<Self> {
        Self::build(config, source, Some(handler))
    }

    fn build(
        config: BotConfig,
        source: Arc<dyn UpdateSource>,
        exception_handler: Option<Arc<dyn ExceptionHandler>>,
    ) -> Result<Self> {
        let registry = Arc::new(HandlerRegistry::new());
        if let Some(saver) = &config.persistence.next_step {
            enable_saving(registry.next_step(), saver)?;
        }
        if let Some(saver) = &config.persistence.reply {
            enable_saving(registry.reply(), saver)?;
        }

        let dispatcher = Arc::new(UpdateDispatcher::new(registry.clone()));
        let mut poller = Poller::new(source, dispatcher)
            .with_workers(config.workers.clone())
            .with_backoff(config.backoff.clone());
        if let Some(handler) = exception_handler {
            poller = poller.with_exception_handler(handler);
        }

        Ok(Self {
            config,
            registry,
            callbacks: Arc::new(CallbackRegistry::new()),
            poller: Arc::new(poller),
        })
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    // ── Registration ──────────────────────────────────────

    /// Add a filter-based handler for `kind`.
    pub fn register<F>(&self, kind: EventKind, filters: Filters, name: &str, callback: F)
    where
        F: Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register(kind, filters, Handler::new(name, callback));
    }

    pub fn message_handler<F>(&self, filters: Filters, name: &str, callback: F)
    where
        F: Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventKind::Message, filters, name, callback);
    }

    pub fn callback_query_handler<F>(&self, filters: Filters, name: &str, callback: F)
    where
        F: Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventKind::CallbackQuery, filters, name, callback);
    }

    /// Register a named callback. Only named callbacks survive a save/load cycle.
    pub fn named_callback<F>(&self, name: &str, callback: F) -> Handler
    where
        F: Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(name, callback)
    }

    /// Run `handler` with `args` on the next message in `chat_id`.
    pub fn register_next_step(&self, chat_id: i64, handler: Handler, args: Vec<Value>) {
        self.registry.register_next_step(chat_id, handler.with_args(args));
    }

    /// Run `handler` with `args` when someone replies to `message_id`.
    pub fn register_reply(&self, message_id: i64, handler: Handler, args: Vec<Value>) {
        self.registry.register_reply(message_id, handler.with_args(args));
    }

    pub fn clear_next_step(&self, chat_id: i64) -> bool {
        self.registry.clear_next_step(chat_id)
    }

    pub fn clear_reply(&self, message_id: i64) -> bool {
        self.registry.clear_reply(message_id)
    }

    // ── Persistence ───────────────────────────────────────

    /// Restore next-step and reply handlers saved by an earlier run.
    pub fn load_saved_handlers(&self) -> Result<usize> {
        let mut restored = 0;
        if let Some(saver) = &self.config.persistence.next_step {
            restored += self.registry.next_step().load(&file_store(saver), &self.callbacks)?;
        }
        if let Some(saver) = &self.config.persistence.reply {
            restored += self.registry.reply().load(&file_store(saver), &self.callbacks)?;
        }
        Ok(restored)
    }

    /// Write both handler maps now instead of waiting for the debounce.
    pub fn save_handlers(&self) -> Result<()> {
        self.registry.next_step().save_now()?;
        self.registry.reply().save_now()
    }

    // ── Polling ───────────────────────────────────────────

    /// Poll on this thread with the overrides given; the rest comes from config.
    pub fn start(&self, none_stop: bool, poll_interval: Duration, timeout: Duration) -> Result<()> {
        let opts = PollOptions {
            none_stop,
            interval: poll_interval,
            timeout,
            ..self.poll_options()
        };
        self.poller.start(&opts)
    }

    /// Poll on this thread with the configured options.
    pub fn polling(&self) -> Result<()> {
        self.poller.start(&self.poll_options())
    }

    /// Poll on a background thread with the configured options.
    pub fn spawn(&self) -> Result<JoinHandle<Result<()>>> {
        self.poller.spawn(self.poll_options())
    }

    pub fn spawn_with(&self, opts: PollOptions) -> Result<JoinHandle<Result<()>>> {
        self.poller.spawn(opts)
    }

    pub fn stop(&self) {
        self.poller.stop();
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    pub fn state(&self) -> PollerState {
        self.poller.state()
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions::from(&self.config.polling)
    }
}

fn file_store(saver: &SaverConfig) -> FileHandlerStore {
    FileHandlerStore::new(saver.resolved_path()).delete_after_load(saver.delete_after_load)
}

fn enable_saving(map: &KeyedHandlers, saver: &SaverConfig) -> Result<()> {
    map.enable_saving(Arc::new(file_store(saver)), saver.delay())
}
