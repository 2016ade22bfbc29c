//! Composite wait: one signal derived from several sources.
//!
//! The composite is set while any source is set and clears once all of them
//! are clear. It subscribes to its sources and recomputes on every change,
//! so the sources themselves are never altered.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::signal::{Signal, SignalObserver};

struct CompositeInner {
    sources: Vec<Arc<Signal>>,
    view: Signal,
    // Serializes recomputation so the last one to run sees the latest state.
    recompute: Mutex<()>,
}

impl CompositeInner {
    fn recompute(&self) {
        let _guard = self.recompute.lock();
        if self.sources.iter().any(|s| s.is_set()) {
            self.view.set();
        } else {
            self.view.clear();
        }
    }
}

impl SignalObserver for CompositeInner {
    fn signal_changed(&self) {
        self.recompute();
    }
}

/// OR over a fixed set of source signals.
pub struct CompositeSignal {
    inner: Arc<CompositeInner>,
    poll_interval: Duration,
}

impl CompositeSignal {
    pub fn new(sources: Vec<Arc<Signal>>, poll_interval: Duration) -> Self {
        let inner = Arc::new(CompositeInner {
            sources,
            view: Signal::new(),
            recompute: Mutex::new(()),
        });
        for source in &inner.sources {
            let weak: Weak<dyn SignalObserver> = Arc::downgrade(&inner) as Weak<dyn SignalObserver>;
            source.subscribe(weak);
        }
        inner.recompute();
        Self {
            inner,
            poll_interval,
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.view.is_set()
    }

    /// Block until set, checking every `poll_interval`.
    pub fn wait(&self) {
        while !self.inner.view.wait_timeout(self.poll_interval) {}
    }

    /// Block until set or `timeout` elapses. Returns whether the composite is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.view.wait_timeout(timeout)
    }

    /// Reset the composite view for a fresh cycle. Sources keep their state;
    /// the view is set again on their next change.
    pub fn clear(&self) {
        let _guard = self.inner.recompute.lock();
        self.inner.view.clear();
    }

    pub fn source_count(&self) -> usize {
        self.inner.sources.len()
    }
}
