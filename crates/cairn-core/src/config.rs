//! Configuration system for Cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub worker: WorkerConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Address of the scheduler the handshake is sent to.
    pub scheduler: String,
    /// Fixed address for this worker. Empty = transport-assigned.
    pub address: String,
    /// Max concurrently running compute tasks. 0 = available parallelism.
    pub max_concurrent_tasks: u32,
    /// Upper bound on a single remote fetch, in milliseconds. 0 = wait forever.
    pub fetch_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface address TCP endpoints bind to.
    pub host: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scheduler: "tcp://127.0.0.1:8786".to_string(),
            address: String::new(),
            max_concurrent_tasks: 0,
            fetch_timeout_ms: 0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Number of executor slots after resolving the `0 = auto` convention.
    pub fn task_slots(&self) -> usize {
        if self.max_concurrent_tasks == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_tasks as usize
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        match self.fetch_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("cairn")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CairnConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CAIRN_* overrides. `lookup` is `std::env::var` outside of tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CAIRN_WORKER__SCHEDULER") {
            self.worker.scheduler = v;
        }
        if let Some(v) = lookup("CAIRN_WORKER__ADDRESS") {
            self.worker.address = v;
        }
        if let Some(v) = lookup("CAIRN_WORKER__MAX_CONCURRENT_TASKS") {
            if let Ok(n) = v.parse() {
                self.worker.max_concurrent_tasks = n;
            }
        }
        if let Some(v) = lookup("CAIRN_WORKER__FETCH_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.worker.fetch_timeout_ms = ms;
            }
        }
        if let Some(v) = lookup("CAIRN_NETWORK__HOST") {
            self.network.host = v;
        }
    }
}
