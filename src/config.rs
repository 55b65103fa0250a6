//! Participant configuration.
//!
//! One TOML file per participant daemon, normally generated next to the key
//! material as `participants/share<N>.toml`. Relative paths inside the file
//! are resolved against the directory holding it.

use crate::crypto::MIN_THRESHOLD;
use crate::window::{ActiveWindow, WindowConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const DEFAULT_POLL_INTERVAL: &str = "60s";
const DEFAULT_CLAIM_TTL: &str = "5m";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

/// What a daemon does when its share cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareFailurePolicy {
    /// Stop this daemon.
    #[default]
    Stop,
    /// Log and try again next tick.
    Retry,
}

/// Shared storage locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,
    #[serde(default = "default_outbox")]
    pub outbox: PathBuf,
}

fn default_ledger() -> PathBuf {
    PathBuf::from("../note_contents.jsonl")
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from("../keys")
}

fn default_outbox() -> PathBuf {
    PathBuf::from("../outbox.jsonl")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger(),
            keys_dir: default_keys_dir(),
            outbox: default_outbox(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Finalize signed messages from this daemon.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Age after which another daemon's unreleased claim is ignored.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl: String,
}

fn default_true() -> bool {
    true
}

fn default_claim_ttl() -> String {
    DEFAULT_CLAIM_TTL.to_string()
}

fn default_poll_interval() -> String {
    DEFAULT_POLL_INTERVAL.to_string()
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            claim_ttl: default_claim_ttl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub participant_id: String,

    /// Group threshold agreed at key generation.
    pub threshold: u16,

    pub share_path: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Exit once no work remains instead of polling for new submissions.
    #[serde(default)]
    pub exit_when_idle: bool,

    #[serde(default)]
    pub share_failure: ShareFailurePolicy,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,
}

impl ParticipantConfig {
    /// Config with default window, polling and storage.
    pub fn new(participant_id: impl Into<String>, threshold: u16, share_path: PathBuf) -> Self {
        Self {
            participant_id: participant_id.into(),
            threshold,
            share_path,
            poll_interval: default_poll_interval(),
            exit_when_idle: false,
            share_failure: ShareFailurePolicy::default(),
            window: WindowConfig::default(),
            storage: StorageConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }

    /// Read, resolve and validate a config file.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: ParticipantConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, contents).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.share_path,
            &mut self.storage.ledger,
            &mut self.storage.keys_dir,
            &mut self.storage.outbox,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.participant_id.trim().is_empty() {
            return Err(ConfigError::Invalid("participant_id is empty".to_string()));
        }
        if self.threshold < MIN_THRESHOLD {
            return Err(ConfigError::Invalid(format!(
                "threshold must be at least {} (FROST needs two signers)",
                MIN_THRESHOLD
            )));
        }
        let poll = self.poll_interval()?;
        if poll.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be positive".to_string()));
        }
        self.claim_ttl()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        parse_duration("poll_interval", &self.poll_interval)
    }

    pub fn claim_ttl(&self) -> ConfigResult<Duration> {
        parse_duration("claim_ttl", &self.aggregation.claim_ttl)
    }

    /// Active window; malformed bounds fall back to always-active.
    pub fn active_window(&self) -> ActiveWindow {
        ActiveWindow::from_config(&self.window)
    }
}

fn parse_duration(field: &str, input: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(input.trim())
        .map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", field, input, e)))
}
