//! Botloop configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BotError, Result};
use crate::types::EventKind;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl BotConfig {
    /// Load config from the default path (~/.botloop/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!("📄 Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BotError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BotError::Config(format!("Failed to create config dir: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BotError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| BotError::Config(format!("Failed to write config: {e}")))?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the botloop home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".botloop")
    }

    fn validate(&self) -> Result<()> {
        if self.workers.num_threads == 0 {
            return Err(BotError::Config("workers.num_threads must be at least 1".into()));
        }
        if self.workers.queue_tick_ms == 0 || self.workers.wait_tick_ms == 0 {
            return Err(BotError::Config("worker tick intervals must be positive".into()));
        }
        if let Some(ceiling) = self.backoff.ceiling_ms {
            if ceiling < self.backoff.floor_ms {
                return Err(BotError::Config(format!(
                    "backoff.ceiling_ms ({ceiling}) is below backoff.floor_ms ({})",
                    self.backoff.floor_ms
                )));
            }
        }
        Ok(())
    }
}

/// How handler callbacks are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    /// Fetch on a dedicated worker, handlers on the worker pool.
    #[default]
    Pooled,
    /// Fetch, classification and handlers all on the control thread.
    Inline,
}

/// Polling loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Keep polling through remote and handler failures.
    #[serde(default)]
    pub none_stop: bool,
    /// Pause between successful fetches.
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_secs: u64,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub allowed_updates: Option<Vec<EventKind>>,
    /// Drop updates queued before start.
    #[serde(default)]
    pub skip_pending: bool,
    #[serde(default)]
    pub mode: PollingMode,
}

fn default_long_poll_timeout() -> u64 { 20 }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            none_stop: false,
            interval_ms: 0,
            long_poll_timeout_secs: default_long_poll_timeout(),
            limit: None,
            allowed_updates: None,
            skip_pending: false,
            mode: PollingMode::default(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Bounded queue wait; a stop request is noticed within one tick.
    #[serde(default = "default_queue_tick")]
    pub queue_tick_ms: u64,
    /// Poll interval of the composite wait.
    #[serde(default = "default_wait_tick")]
    pub wait_tick_ms: u64,
}

fn default_num_threads() -> usize { 2 }
fn default_queue_tick() -> u64 { 500 }
fn default_wait_tick() -> u64 { 100 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            queue_tick_ms: default_queue_tick(),
            wait_tick_ms: default_wait_tick(),
        }
    }
}

impl WorkerConfig {
    pub fn queue_tick(&self) -> Duration {
        Duration::from_millis(self.queue_tick_ms)
    }

    pub fn wait_tick(&self) -> Duration {
        Duration::from_millis(self.wait_tick_ms)
    }
}

/// Retry backoff after a recoverable failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_floor")]
    pub floor_ms: u64,
    /// `None` keeps doubling without bound.
    #[serde(default)]
    pub ceiling_ms: Option<u64>,
    /// Consecutive failures tolerated before the loop stops fatally.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Spread each delay by up to ±25%.
    #[serde(default)]
    pub jitter: bool,
}

fn default_backoff_floor() -> u64 { 250 }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor_ms: default_backoff_floor(),
            ceiling_ms: None,
            max_attempts: None,
            jitter: false,
        }
    }
}

/// Optional persistence of one-shot handler maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub next_step: Option<SaverConfig>,
    #[serde(default)]
    pub reply: Option<SaverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaverConfig {
    pub path: String,
    /// Debounce delay; 0 saves on every change.
    #[serde(default = "default_save_delay")]
    pub delay_secs: u64,
    #[serde(default = "bool_true")]
    pub delete_after_load: bool,
}

fn default_save_delay() -> u64 { 120 }
fn bool_true() -> bool { true }

impl SaverConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            delay_secs: default_save_delay(),
            delete_after_load: true,
        }
    }

    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert!(!config.polling.none_stop);
        assert_eq!(config.polling.long_poll_timeout(), Duration::from_secs(20));
        assert_eq!(config.polling.mode, PollingMode::Pooled);
        assert_eq!(config.workers.num_threads, 2);
        assert_eq!(config.backoff.floor_ms, 250);
        assert!(config.backoff.ceiling_ms.is_none());
        assert!(config.persistence.next_step.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = BotConfig::parse(
            r#"
            [polling]
            none_stop = true
            allowed_updates = ["message", "callback_query"]
            mode = "inline"

            [backoff]
            ceiling_ms = 60000

            [persistence.next_step]
            path = "~/.botloop/step.save"
            delay_secs = 0
            "#,
        )
        .unwrap();
        assert!(config.polling.none_stop);
        assert_eq!(config.polling.mode, PollingMode::Inline);
        assert_eq!(
            config.polling.allowed_updates,
            Some(vec![EventKind::Message, EventKind::CallbackQuery])
        );
        assert_eq!(config.backoff.ceiling_ms, Some(60_000));
        let saver = config.persistence.next_step.unwrap();
        assert_eq!(saver.delay(), Duration::ZERO);
        assert!(saver.delete_after_load);
        assert!(!saver.resolved_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(BotConfig::parse("[workers]\nnum_threads = 0").is_err());
        assert!(BotConfig::parse("[backoff]\nfloor_ms = 500\nceiling_ms = 100").is_err());
        assert!(BotConfig::parse("[polling]\nmode = \"sideways\"").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = BotConfig::default();
        config.workers.num_threads = 6;
        config.persistence.reply = Some(SaverConfig::new("/tmp/reply.save"));
        config.save_to(&path).unwrap();

        let loaded = BotConfig::load_from(&path).unwrap();
        assert_eq!(loaded.workers.num_threads, 6);
        assert_eq!(loaded.persistence.reply.unwrap().delay_secs, 120);
    }
}
