//! Fetch collaborator: where updates come from.
//!
//! HTTP transport lives outside the engine. Anything that can answer a
//! long-poll style `fetch_updates` call can drive the poller.

use std::time::Duration;

use crate::error::RemoteError;
use crate::types::{EventKind, Update};

/// Parameters of one `fetch_updates` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// First update id to return; `None` lets the service decide, `-1` asks for the latest only.
    pub offset: Option<i64>,
    pub limit: Option<u32>,
    /// How long the call may block waiting for new updates.
    pub timeout: Duration,
    /// `None` means every kind.
    pub allowed_updates: Option<Vec<EventKind>>,
}

impl FetchRequest {
    pub fn new(offset: Option<i64>, timeout: Duration) -> Self {
        Self {
            offset,
            limit: None,
            timeout,
            allowed_updates: None,
        }
    }
}

/// Source of updates. May block up to `request.timeout`.
pub trait UpdateSource: Send + Sync {
    fn fetch_updates(&self, request: &FetchRequest) -> Result<Vec<Update>, RemoteError>;
}

impl<S: UpdateSource + ?Sized> UpdateSource for std::sync::Arc<S> {
    fn fetch_updates(&self, request: &FetchRequest) -> Result<Vec<Update>, RemoteError> {
        (**self).fetch_updates(request)
    }
}
