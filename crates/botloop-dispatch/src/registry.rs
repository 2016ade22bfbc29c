//! Handler registry: ordered per-kind handler lists and keyed one-shot maps.
//!
//! Per-kind lists are first-match-wins in registration order. Next-step and
//! reply handlers live in [`KeyedHandlers`]: every read-modify-write on a key
//! (append, pop, clear) runs under the map's lock, so handlers may register
//! follow-ups from inside a running handler on any worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use botloop_core::{EventKind, Result};
use parking_lot::{Mutex, RwLock};

use crate::filters::Filters;
use crate::handler::{CallbackRegistry, Handler, HandlerRecord};
use crate::saver::{DebouncedSaver, HandlerStore, SavedHandlers};

type Entries = Arc<Mutex<HashMap<i64, Vec<Handler>>>>;

fn snapshot_of(entries: &Entries) -> SavedHandlers {
    entries
        .lock()
        .iter()
        .map(|(key, handlers)| (*key, handlers.iter().map(Handler::to_saved).collect()))
        .collect()
}

/// One-shot handlers keyed by chat id or message id, optionally persisted.
pub struct KeyedHandlers {
    label: &'static str,
    entries: Entries,
    saver: Mutex<Option<DebouncedSaver>>,
}

impl KeyedHandlers {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Arc::new(Mutex::new(HashMap::new())),
            saver: Mutex::new(None),
        }
    }

    /// Append `handler` to the list waiting on `key`.
    pub fn register(&self, key: i64, handler: Handler) {
        tracing::debug!("📝 {} handler '{}' registered for {}", self.label, handler.name(), key);
        self.entries.lock().entry(key).or_default().push(handler);
        self.changed();
    }

    /// Remove and return everything waiting on `key`.
    pub fn pop(&self, key: i64) -> Option<Vec<Handler>> {
        let popped = self.entries.lock().remove(&key);
        if popped.is_some() {
            self.changed();
        }
        popped
    }

    /// Drop everything waiting on `key`. Returns whether anything was there.
    pub fn clear(&self, key: i64) -> bool {
        let removed = self.entries.lock().remove(&key).is_some();
        if removed {
            self.changed();
        }
        removed
    }

    pub fn contains(&self, key: i64) -> bool {
        self.entries.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn snapshot(&self) -> SavedHandlers {
        snapshot_of(&self.entries)
    }

    /// Persist this map through `store`, debounced by `delay`.
    pub fn enable_saving(&self, store: Arc<dyn HandlerStore>, delay: Duration) -> Result<()> {
        let entries = self.entries.clone();
        let saver = DebouncedSaver::new(store, delay, move || snapshot_of(&entries))?;
        tracing::info!("💾 Saving {} handlers (delay {:?})", self.label, delay);
        *self.saver.lock() = Some(saver);
        Ok(())
    }

    /// Stop persisting. A pending flush is written first.
    pub fn disable_saving(&self) {
        let saver = self.saver.lock().take();
        drop(saver);
    }

    pub fn is_saving(&self) -> bool {
        self.saver.lock().is_some()
    }

    /// Write the current state through the configured saver.
    pub fn save_now(&self) -> Result<()> {
        match self.saver.lock().as_ref() {
            Some(saver) => saver.save_now(),
            None => Ok(()),
        }
    }

    /// Restore handlers from `store`, replacing any list under the same key.
    /// Names missing from `callbacks` are skipped. Returns the number restored.
    pub fn load(&self, store: &dyn HandlerStore, callbacks: &CallbackRegistry) -> Result<usize> {
        let Some(saved) = store.load()? else {
            return Ok(0);
        };
        let mut restored = 0;
        {
            let mut entries = self.entries.lock();
            for (key, handlers) in saved {
                let resolved: Vec<Handler> = handlers
                    .iter()
                    .filter_map(|s| {
                        let handler = callbacks.resolve(s);
                        if handler.is_none() {
                            tracing::warn!("⚠️ Unknown {} callback '{}' for {}, skipped", self.label, s.name, key);
                        }
                        handler
                    })
                    .collect();
                if !resolved.is_empty() {
                    restored += resolved.len();
                    entries.insert(key, resolved);
                }
            }
        }
        tracing::info!("📂 Restored {} {} handlers", restored, self.label);
        Ok(restored)
    }

    // Must be called without the entries lock held: a zero-delay saver snapshots inline.
    fn changed(&self) {
        if let Some(saver) = self.saver.lock().as_ref() {
            saver.schedule();
        }
    }
}

/// All handlers known to the engine.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<HandlerRecord>>>>,
    next_step: KeyedHandlers,
    reply: KeyedHandlers,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_step: KeyedHandlers::new("next-step"),
            reply: KeyedHandlers::new("reply"),
        }
    }

    /// Add a filter-based handler for `kind`. Message-like kinds default to
    /// text content unless the filters choose content types themselves.
    pub fn register(&self, kind: EventKind, filters: Filters, handler: Handler) {
        let filters = if kind.is_message_like() {
            filters.with_text_default()
        } else {
            filters
        };
        tracing::debug!("📝 {} handler '{}' registered", kind, handler.name());
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(HandlerRecord { handler, filters }));
    }

    /// Snapshot of the handlers for `kind`, in registration order.
    pub fn handlers_for(&self, kind: EventKind) -> Vec<Arc<HandlerRecord>> {
        self.handlers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn register_next_step(&self, chat_id: i64, handler: Handler) {
        self.next_step.register(chat_id, handler);
    }

    pub fn register_reply(&self, message_id: i64, handler: Handler) {
        self.reply.register(message_id, handler);
    }

    pub fn clear_next_step(&self, chat_id: i64) -> bool {
        self.next_step.clear(chat_id)
    }

    pub fn clear_reply(&self, message_id: i64) -> bool {
        self.reply.clear(message_id)
    }

    pub fn next_step(&self) -> &KeyedHandlers {
        &self.next_step
    }

    pub fn reply(&self) -> &KeyedHandlers {
        &self.reply
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
