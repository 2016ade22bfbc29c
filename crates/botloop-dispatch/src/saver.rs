//! Handler persistence: store contract, JSON file store, debounced saver.
//!
//! Saved state maps a chat id (next-step) or message id (reply) to the
//! handlers waiting on it, by callback name. Writes go to `<path>.tmp` first
//! and are renamed over the target, so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use botloop_core::{BotError, Result};
use parking_lot::{Condvar, Mutex};

use crate::handler::SavedHandler;

pub type SavedHandlers = BTreeMap<i64, Vec<SavedHandler>>;

/// Persistence collaborator for one handler map.
pub trait HandlerStore: Send + Sync {
    fn save(&self, state: &SavedHandlers) -> Result<()>;
    /// `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<SavedHandlers>>;
}

/// JSON file store with atomic replace.
pub struct FileHandlerStore {
    path: PathBuf,
    delete_after_load: bool,
    // One writer at a time owns `<path>.tmp`.
    write: Mutex<()>,
}

impl FileHandlerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delete_after_load: false,
            write: Mutex::new(()),
        }
    }

    pub fn delete_after_load(mut self, delete: bool) -> Self {
        self.delete_after_load = delete;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl HandlerStore for FileHandlerStore {
    fn save(&self, state: &SavedHandlers) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BotError::Persistence(format!("Create dir error: {e}")))?;
            }
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| BotError::Persistence(format!("Serialize error: {e}")))?;
        let tmp = self.tmp_path();
        let _write = self.write.lock();
        std::fs::write(&tmp, json).map_err(|e| BotError::Persistence(format!("Write error: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| BotError::Persistence(format!("Replace error: {e}")))?;
        tracing::debug!("💾 Saved {} handler keys to {}", state.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<SavedHandlers>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| BotError::Persistence(format!("Read error: {e}")))?;
        let state: SavedHandlers = serde_json::from_str(&json)
            .map_err(|e| BotError::Persistence(format!("Parse error in {}: {e}", self.path.display())))?;
        if self.delete_after_load {
            std::fs::remove_file(&self.path)
                .map_err(|e| BotError::Persistence(format!("Delete error: {e}")))?;
        }
        Ok(Some(state))
    }
}

type Snapshot = Box<dyn Fn() -> SavedHandlers + Send + Sync>;

struct SaverState {
    armed_at: Option<Instant>,
    shutdown: bool,
}

struct SaverInner {
    store: Arc<dyn HandlerStore>,
    snapshot: Snapshot,
    delay: Duration,
    state: Mutex<SaverState>,
    cond: Condvar,
    /// Held across snapshot and write, so an older snapshot never lands last.
    flush: Mutex<()>,
}

impl SaverInner {
    fn flush(&self) -> Result<()> {
        let _flush = self.flush.lock();
        let state = (self.snapshot)();
        self.store.save(&state)
    }

    fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            tracing::error!("❌ Failed to save handlers: {e}");
        }
    }
}

/// Debounced writer: the first change arms one flush `delay` later; changes
/// made while armed ride along with it. At most one flush is ever pending.
pub struct DebouncedSaver {
    inner: Arc<SaverInner>,
    timer: Option<JoinHandle<()>>,
}

impl DebouncedSaver {
    /// `snapshot` is read at flush time, so the latest state is written.
    pub fn new<F>(store: Arc<dyn HandlerStore>, delay: Duration, snapshot: F) -> Result<Self>
    where
        F: Fn() -> SavedHandlers + Send + Sync + 'static,
    {
        let inner = Arc::new(SaverInner {
            store,
            snapshot: Box::new(snapshot),
            delay,
            state: Mutex::new(SaverState {
                armed_at: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
            flush: Mutex::new(()),
        });

        let timer = if delay.is_zero() {
            None
        } else {
            let timer_inner = inner.clone();
            let handle = std::thread::Builder::new()
                .name("botloop-saver".into())
                .spawn(move || run_timer(timer_inner))
                .map_err(|e| BotError::Worker(format!("failed to spawn saver timer: {e}")))?;
            Some(handle)
        };

        Ok(Self { inner, timer })
    }

    /// Note a change. Flushes immediately when the delay is zero.
    pub fn schedule(&self) {
        if self.inner.delay.is_zero() {
            self.inner.flush_logged();
            return;
        }
        let mut state = self.inner.state.lock();
        if state.armed_at.is_none() {
            state.armed_at = Some(Instant::now());
            self.inner.cond.notify_all();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().armed_at.is_some()
    }

    /// Write the current state now, reporting failures to the caller.
    pub fn save_now(&self) -> Result<()> {
        self.inner.flush()
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }
}

impl Drop for DebouncedSaver {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.cond.notify_all();
        }
        if let Some(handle) = self.timer.take() {
            if handle.join().is_err() {
                tracing::error!("❌ Saver timer thread panicked");
            }
        }
    }
}

fn run_timer(inner: Arc<SaverInner>) {
    loop {
        let mut state = inner.state.lock();
        while state.armed_at.is_none() && !state.shutdown {
            inner.cond.wait(&mut state);
        }
        let Some(armed_at) = state.armed_at else {
            // shutdown with nothing pending
            return;
        };

        let deadline = armed_at + inner.delay;
        while !state.shutdown && Instant::now() < deadline {
            inner.cond.wait_until(&mut state, deadline);
        }
        state.armed_at = None;
        let shutdown = state.shutdown;
        drop(state);

        inner.flush_logged();
        if shutdown {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        saves: AtomicUsize,
        last: Mutex<Option<SavedHandlers>>,
    }

    impl HandlerStore for CountingStore {
        fn save(&self, state: &SavedHandlers) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(state.clone());
            Ok(())
        }

        fn load(&self) -> Result<Option<SavedHandlers>> {
            Ok(self.last.lock().clone())
        }
    }

    fn sample() -> SavedHandlers {
        let mut state = SavedHandlers::new();
        state.insert(
            42,
            vec![SavedHandler {
                name: "ask_age".into(),
                args: vec![json!({"step": 2})],
            }],
        );
        state
    }

    #[test]
    fn test_file_store_round_trip_and_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handlers").join("step.save");
        let store = FileHandlerStore::new(&path);

        assert!(store.load().unwrap().is_none());
        store.save(&sample()).unwrap();
        assert!(path.exists());
        assert!(!store.tmp_path().exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, sample());
        // kept, since delete_after_load is off
        assert!(path.exists());
    }

    #[test]
    fn test_file_store_delete_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.save");
        let store = FileHandlerStore::new(&path).delete_after_load(true);
        store.save(&sample()).unwrap();
        assert!(store.load().unwrap().is_some());
        assert!(!path.exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.save");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileHandlerStore::new(&path).load().unwrap_err();
        assert!(matches!(err, BotError::Persistence(_)));
    }

    #[test]
    fn test_zero_delay_saves_synchronously() {
        let store = Arc::new(CountingStore::default());
        let saver = DebouncedSaver::new(store.clone(), Duration::ZERO, sample).unwrap();
        saver.schedule();
        saver.schedule();
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        assert!(!saver.is_pending());
    }

    #[test]
    fn test_changes_coalesce_into_one_flush() {
        let store = Arc::new(CountingStore::default());
        let saver = DebouncedSaver::new(store.clone(), Duration::from_millis(80), sample).unwrap();
        for _ in 0..5 {
            saver.schedule();
        }
        assert!(saver.is_pending());
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        assert!(!saver.is_pending());
        assert_eq!(store.load().unwrap(), Some(sample()));

        // Re-arms after a flush.
        saver.schedule();
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_flushes_pending_save() {
        let store = Arc::new(CountingStore::default());
        let saver = DebouncedSaver::new(store.clone(), Duration::from_secs(120), sample).unwrap();
        saver.schedule();
        drop(saver);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_saves_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step.save");
        let store = Arc::new(FileHandlerStore::new(&path));

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..200).filter(|_| store.save(&sample()).is_err()).count()
                })
            })
            .collect();
        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(failures, 0);
        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_save_now_while_timer_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.save");
        let store: Arc<dyn HandlerStore> = Arc::new(FileHandlerStore::new(&path));
        let saver = Arc::new(DebouncedSaver::new(store, Duration::from_millis(1), sample).unwrap());

        let explicit = {
            let saver = saver.clone();
            std::thread::spawn(move || (0..100).filter(|_| saver.save_now().is_err()).count())
        };
        for _ in 0..100 {
            saver.schedule();
            std::thread::sleep(Duration::from_micros(200));
        }

        assert_eq!(explicit.join().unwrap(), 0);
        drop(saver);
        let saved = FileHandlerStore::new(&path).load().unwrap();
        assert_eq!(saved, Some(sample()));
    }

    #[test]
    fn test_save_now_propagates_errors() {
        struct FailingStore;
        impl HandlerStore for FailingStore {
            fn save(&self, _: &SavedHandlers) -> Result<()> {
                Err(BotError::Persistence("read-only filesystem".into()))
            }
            fn load(&self) -> Result<Option<SavedHandlers>> {
                Ok(None)
            }
        }
        let saver = DebouncedSaver::new(Arc::new(FailingStore), Duration::from_secs(1), sample).unwrap();
        assert!(matches!(saver.save_now(), Err(BotError::Persistence(_))));
    }
}
