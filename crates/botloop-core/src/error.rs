//! Error taxonomy for the polling engine.
//!
//! Every variant is `Clone`: a failure captured on a worker thread is carried
//! back to the control thread as a plain value and handed out again from
//! `raise_exceptions()`.

use thiserror::Error;

/// Failure reported by the fetch collaborator (non-2xx, malformed body, `ok=false`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("A request to the remote API was unsuccessful. Method '{method_name}': {message}")]
pub struct RemoteError {
    pub message: String,
    pub method_name: String,
    /// Raw response body, when one was received.
    pub raw_result: Option<String>,
}

impl RemoteError {
    pub fn new(method_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            method_name: method_name.into(),
            raw_result: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_result = Some(raw.into());
        self
    }
}

/// Failure raised inside a dispatched handler callback (an `Err` or a panic).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Handler '{handler}' failed: {message}")]
pub struct HandlerError {
    pub handler: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

/// Engine-wide error type.
#[derive(Debug, Clone, Error)]
pub enum BotError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl BotError {
    /// Recoverable failures are retried with backoff when polling non-stop.
    pub fn is_remote(&self) -> bool {
        matches!(self, BotError::Remote(_))
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new("getUpdates", "Bad Gateway").with_raw("<html>502</html>");
        let msg = BotError::from(err.clone()).to_string();
        assert!(msg.contains("getUpdates"));
        assert!(msg.contains("Bad Gateway"));
        assert_eq!(err.raw_result.as_deref(), Some("<html>502</html>"));
    }

    #[test]
    fn test_is_remote() {
        assert!(BotError::from(RemoteError::new("getUpdates", "timeout")).is_remote());
        assert!(!BotError::from(HandlerError::new("echo", "boom")).is_remote());
        assert!(!BotError::Persistence("disk full".into()).is_remote());
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");
        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "non-string panic payload");
    }
}
