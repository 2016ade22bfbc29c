//! Set/clear signal with blocking waits and change observers.

use std::sync::Weak;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Notified after a watched [`Signal`] is set or cleared.
pub trait SignalObserver: Send + Sync {
    fn signal_changed(&self);
}

/// A boolean flag threads can set, clear and wait on.
pub struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
    observers: Mutex<Vec<Weak<dyn SignalObserver>>>,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self) {
        {
            let mut state = self.state.lock();
            *state = true;
            self.cond.notify_all();
        }
        self.notify_observers();
    }

    pub fn clear(&self) {
        *self.state.lock() = false;
        self.notify_observers();
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Block until set.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.cond.wait(&mut state);
        }
    }

    /// Block until set or `timeout` elapses. Returns whether the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !*state {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return *state;
            }
        }
        true
    }

    /// Register an observer. Dropped observers are pruned on the next change.
    pub fn subscribe(&self, observer: Weak<dyn SignalObserver>) {
        self.observers.lock().push(observer);
    }

    // Runs outside the state lock: observers read other signals' state.
    fn notify_observers(&self) {
        let live: Vec<_> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.signal_changed();
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("set", &self.is_set()).finish()
    }
}
