//! Runtime configuration for the host controller and companion client

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SyncResult;

/// Default companion time poll period in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default host context republish period in seconds.
const DEFAULT_CONTEXT_REPUBLISH_SECS: u64 = 30;

/// Configuration shared by both peers.
///
/// Loadable from JSON; missing keys take their defaults.
///
/// ```json
/// { "poll_interval_ms": 1000, "context_republish_secs": 30 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Companion polls the host's time this often.
    pub poll_interval_ms: u64,
    /// Host republishes its context snapshot this often; `None` disables
    /// periodic republishing. Contexts are also pushed on activation and
    /// after every mutation of a store that reports changes.
    pub context_republish_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            context_republish_secs: Some(DEFAULT_CONTEXT_REPUBLISH_SECS),
        }
    }
}

impl SyncConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::SyncError::InvalidArguments(format!(
                "cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn context_republish_interval(&self) -> Option<Duration> {
        self.context_republish_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(
            config.context_republish_interval(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"poll_interval_ms": 250}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.context_republish_secs, Some(30));
    }

    #[test]
    fn test_republish_can_be_disabled() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"context_republish_secs": null}"#).unwrap();
        assert_eq!(config.context_republish_interval(), None);

        let zero: SyncConfig = serde_json::from_str(r#"{"context_republish_secs": 0}"#).unwrap();
        assert_eq!(zero.context_republish_interval(), None);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = SyncConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
