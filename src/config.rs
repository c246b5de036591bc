//! Engine configuration, deserialized from TOML.
//!
//! Defaults mirror the documented defaults in spec §6. `verbosity` and the
//! notification-delay knob follow the same shape the original engine's
//! settings schema used (errors/minimal/detailed/debug verbosity levels,
//! a millisecond delay before a changed graph is announced).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logging verbosity, independent of the `RUST_LOG` environment filter so a
/// deployed config file can raise or lower it without touching the
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Errors,
    Minimal,
    Detailed,
    Debug,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Errors
    }
}

impl Verbosity {
    pub fn as_level_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            Verbosity::Errors => tracing::level_filters::LevelFilter::ERROR,
            Verbosity::Minimal => tracing::level_filters::LevelFilter::WARN,
            Verbosity::Detailed => tracing::level_filters::LevelFilter::INFO,
            Verbosity::Debug => tracing::level_filters::LevelFilter::DEBUG,
        }
    }
}

fn default_verbosity() -> Verbosity {
    Verbosity::Errors
}
fn default_notification_delay_ms() -> u64 {
    1000
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_max_concurrent_readers() -> usize {
    8
}
fn default_min_token_len() -> usize {
    2
}
fn default_max_token_len() -> usize {
    64
}
fn default_batch_row_threshold() -> usize {
    500
}
fn default_batch_time_threshold_ms() -> u64 {
    50
}
fn default_stopword_language() -> String {
    "en".to_string()
}

/// Engine-wide configuration, one per opened database directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Root directory holding `db.sqlite3`, the journal files and the
    /// ontology bundle directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Logging verbosity.
    #[serde(default = "default_verbosity")]
    pub verbosity: Verbosity,

    /// Delay, in milliseconds, between a graph-changing commit and the
    /// corresponding notification fan-out. Batches rapid successive writes
    /// into one notification round.
    #[serde(default = "default_notification_delay_ms")]
    pub notification_delay_ms: u64,

    /// `PRAGMA busy_timeout` on the write connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Reader semaphore capacity.
    #[serde(default = "default_max_concurrent_readers")]
    pub max_concurrent_readers: usize,

    /// Full-text tokenizer: drop tokens shorter than this.
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Full-text tokenizer: drop tokens longer than this.
    #[serde(default = "default_max_token_len")]
    pub max_token_len: usize,

    /// Stop-word list to use by default (additional ones load from the
    /// ontology bundle directory).
    #[serde(default = "default_stopword_language")]
    pub stopword_language: String,

    /// Scheduler: flush a pending write batch once this many rows have
    /// queued up.
    #[serde(default = "default_batch_row_threshold")]
    pub batch_row_threshold: usize,

    /// Scheduler: flush a pending write batch after this many milliseconds
    /// even if the row threshold has not been reached.
    #[serde(default = "default_batch_time_threshold_ms")]
    pub batch_time_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            verbosity: default_verbosity(),
            notification_delay_ms: default_notification_delay_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_concurrent_readers: default_max_concurrent_readers(),
            min_token_len: default_min_token_len(),
            max_token_len: default_max_token_len(),
            stopword_language: default_stopword_language(),
            batch_row_threshold: default_batch_row_threshold(),
            batch_time_threshold_ms: default_batch_time_threshold_ms(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.notification_delay_ms, 1000);
        assert_eq!(cfg.min_token_len, 2);
        assert_eq!(cfg.max_token_len, 64);
        assert!(matches!(cfg.verbosity, Verbosity::Errors));
    }

    #[test]
    fn unknown_key_rejected() {
        let err = EngineConfig::from_toml("typo_field = 1").unwrap_err();
        assert!(err.to_string().len() > 0);
    }

    #[test]
    fn partial_overrides_keep_remaining_defaults() {
        let cfg = EngineConfig::from_toml("verbosity = \"debug\"\nmax_concurrent_readers = 4").unwrap();
        assert!(matches!(cfg.verbosity, Verbosity::Debug));
        assert_eq!(cfg.max_concurrent_readers, 4);
        assert_eq!(cfg.notification_delay_ms, 1000);
    }
}
