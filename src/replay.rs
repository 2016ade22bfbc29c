//! Replay source: serves updates from a JSON file as if they came from a long poll.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use botloop_core::{FetchRequest, RemoteError, Update, UpdateSource};
use parking_lot::Mutex;

/// Longest an exhausted replay blocks on one fetch.
const IDLE_WAIT: Duration = Duration::from_millis(500);
const DEFAULT_LIMIT: usize = 100;

pub struct ReplaySource {
    updates: Vec<Update>,
    /// Highest offset requested so far; everything below it is acknowledged.
    acknowledged: Mutex<Option<i64>>,
}

impl ReplaySource {
    pub fn new(mut updates: Vec<Update>) -> Self {
        updates.sort_by_key(|u| u.update_id);
        Self {
            updates,
            acknowledged: Mutex::new(None),
        }
    }

    /// Load a JSON array of updates.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read updates from {}", path.display()))?;
        let updates: Vec<Update> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse updates in {}", path.display()))?;
        Ok(Self::new(updates))
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Every update has been acknowledged by a later fetch offset.
    pub fn is_drained(&self) -> bool {
        match self.updates.last() {
            Some(last) => self.acknowledged.lock().is_some_and(|offset| offset > last.update_id),
            None => true,
        }
    }

    fn select(&self, request: &FetchRequest) -> Vec<Update> {
        let limit = request.limit.map_or(DEFAULT_LIMIT, |l| l as usize);
        let wanted = |u: &&Update| {
            request
                .allowed_updates
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&u.kind()))
        };

        match request.offset {
            // Negative offsets count back from the newest update.
            Some(offset) if offset < 0 => {
                let from_end = offset.unsigned_abs() as usize;
                let start = self.updates.len().saturating_sub(from_end);
                self.updates[start..].iter().filter(wanted).take(limit).cloned().collect()
            }
            offset => {
                let first = offset.unwrap_or(i64::MIN);
                self.updates
                    .iter()
                    .filter(|u| u.update_id >= first)
                    .filter(wanted)
                    .take(limit)
                    .cloned()
                    .collect()
            }
        }
    }
}

impl UpdateSource for ReplaySource {
    fn fetch_updates(&self, request: &FetchRequest) -> std::result::Result<Vec<Update>, RemoteError> {
        if let Some(offset) = request.offset.filter(|o| *o >= 0) {
            let mut acknowledged = self.acknowledged.lock();
            if acknowledged.is_none_or(|current| offset > current) {
                *acknowledged = Some(offset);
            }
        }

        let batch = self.select(request);
        if batch.is_empty() && !request.timeout.is_zero() {
            std::thread::sleep(request.timeout.min(IDLE_WAIT));
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botloop_core::EventKind;

    const UPDATES: &str = r#"[
        {"update_id": 3, "message": {"message_id": 30, "chat": {"id": 1, "type": "private"}, "text": "third"}},
        {"update_id": 1, "message": {"message_id": 10, "chat": {"id": 1, "type": "private"}, "text": "/start"}},
        {"update_id": 2, "callback_query": {"id": "q1", "from": {"id": 1, "is_bot": false, "first_name": "Ann"}, "data": "ok"}}
    ]"#;

    fn source() -> ReplaySource {
        ReplaySource::new(serde_json::from_str(UPDATES).unwrap())
    }

    fn ids(batch: &[Update]) -> Vec<i64> {
        batch.iter().map(|u| u.update_id).collect()
    }

    #[test]
    fn test_serves_from_offset_in_id_order() {
        let source = source();
        let all = source.fetch_updates(&FetchRequest::new(None, Duration::ZERO)).unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3]);

        let rest = source.fetch_updates(&FetchRequest::new(Some(2), Duration::ZERO)).unwrap();
        assert_eq!(ids(&rest), vec![2, 3]);
        assert!(!source.is_drained());

        let none = source.fetch_updates(&FetchRequest::new(Some(4), Duration::ZERO)).unwrap();
        assert!(none.is_empty());
        assert!(source.is_drained());
    }

    #[test]
    fn test_limit_kinds_and_negative_offset() {
        let source = source();
        let mut request = FetchRequest::new(None, Duration::ZERO);
        request.limit = Some(1);
        assert_eq!(ids(&source.fetch_updates(&request).unwrap()), vec![1]);

        let mut request = FetchRequest::new(None, Duration::ZERO);
        request.allowed_updates = Some(vec![EventKind::CallbackQuery]);
        assert_eq!(ids(&source.fetch_updates(&request).unwrap()), vec![2]);

        let latest = source.fetch_updates(&FetchRequest::new(Some(-1), Duration::ZERO)).unwrap();
        assert_eq!(ids(&latest), vec![3]);
        assert!(!source.is_drained());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updates.json");
        std::fs::write(&path, UPDATES).unwrap();
        assert_eq!(ReplaySource::from_file(&path).unwrap().len(), 3);

        std::fs::write(&path, "[{").unwrap();
        assert!(ReplaySource::from_file(&path).is_err());
        assert!(ReplaySource::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_demo_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/updates.json");
        let source = ReplaySource::from_file(&path).unwrap();
        assert_eq!(source.len(), 6);
        let kinds: Vec<EventKind> = source.updates.iter().map(Update::kind).collect();
        assert_eq!(kinds[3], EventKind::CallbackQuery);
        assert_eq!(kinds[5], EventKind::EditedMessage);
        let photo = source.updates[4].event.message().unwrap();
        assert_eq!(photo.content_type(), "photo");
        assert_eq!(photo.chat.chat_type, "group");
    }
}
