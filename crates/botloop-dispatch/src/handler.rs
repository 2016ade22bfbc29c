//! Handlers: named callbacks plus the arguments bound at registration.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use botloop_core::{BotError, Event, HandlerError, Result, panic_message};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filters::Filters;

/// User callback: receives the event and the arguments bound at registration.
pub type Callback = Arc<dyn Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// A callback with its name and bound arguments.
#[derive(Clone)]
pub struct Handler {
    name: String,
    callback: Callback,
    args: Vec<Value>,
}

impl Handler {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_callback(name, Arc::new(callback))
    }

    pub fn from_callback(name: impl Into<String>, callback: Callback) -> Self {
        Self {
            name: name.into(),
            callback,
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Run the callback. Errors and panics both come back as [`HandlerError`].
    pub fn invoke(&self, event: &Event) -> Result<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.callback)(event, &self.args)));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BotError::Handler(HandlerError::new(&self.name, format!("{e:#}")))),
            Err(payload) => Err(BotError::Handler(HandlerError::new(
                &self.name,
                format!("panicked: {}", panic_message(payload.as_ref())),
            ))),
        }
    }

    /// Serializable form: callbacks are stored by name.
    pub fn to_saved(&self) -> SavedHandler {
        SavedHandler {
            name: self.name.clone(),
            args: self.args.clone(),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

/// Persisted handler: callback name plus bound arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedHandler {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A registered filter-based handler. Immutable once registered.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub handler: Handler,
    pub filters: Filters,
}

/// Name → callback table used to bring persisted handlers back to life.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<String, Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name` and return a handler for it.
    pub fn register<F>(&self, name: impl Into<String>, callback: F) -> Handler
    where
        F: Fn(&Event, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let callback: Callback = Arc::new(callback);
        self.callbacks.write().insert(name.clone(), callback.clone());
        Handler::from_callback(name, callback)
    }

    /// Handler for a previously registered name.
    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.callbacks
            .read()
            .get(name)
            .map(|cb| Handler::from_callback(name, cb.clone()))
    }

    pub fn resolve(&self, saved: &SavedHandler) -> Option<Handler> {
        self.handler(&saved.name)
            .map(|h| h.with_args(saved.args.clone()))
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}
