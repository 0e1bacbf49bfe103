use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{Error, Result};
use crate::level::Level;

/// Immutable snapshot of the tunables the engine reads on every call.
///
/// All fields have defaults, so a partial JSON document is enough:
///
/// ```json
/// { "level": "INFO", "max_file_size_bytes": 104857600, "file_max_remain_days": 7 }
/// ```
///
/// `None` on a limit means "unlimited" or "disabled".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Records below this level are discarded before formatting.
    pub level: Level,
    /// Records at or above this level are forwarded to the alert callback.
    pub alert_level: Level,
    /// Overrides the writer's own file prefix when non-empty.
    pub file_prefix: String,
    pub default_log_dir: PathBuf,
    pub exception_log_dir: PathBuf,
    /// Debug messages longer than this many characters are truncated.
    pub debug_msg_max_len: Option<usize>,
    /// Info messages longer than this many characters are truncated.
    pub info_msg_max_len: Option<usize>,
    /// Debug records are dropped once the current file reaches this size.
    pub debug_before_file_size_bytes: Option<u64>,
    /// Info records are dropped once the current file reaches this size.
    pub info_before_file_size_bytes: Option<u64>,
    /// Size at which the current file is considered full.
    pub max_file_size_bytes: Option<u64>,
    /// Files older than this many days are deleted.
    pub file_max_remain_days: Option<u32>,
    /// Files older than this many hours are compressed.
    pub compress_frequent_hours: Option<u32>,
    /// Files smaller than this are never compressed.
    pub compress_after_reach_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Debug,
            alert_level: Level::Warn,
            file_prefix: String::new(),
            default_log_dir: PathBuf::from("logs"),
            exception_log_dir: PathBuf::from("logs/exception"),
            debug_msg_max_len: None,
            info_msg_max_len: None,
            debug_before_file_size_bytes: None,
            info_before_file_size_bytes: None,
            max_file_size_bytes: None,
            file_max_remain_days: None,
            compress_frequent_hours: None,
            compress_after_reach_bytes: 0,
        }
    }
}

impl LogConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Apply `LOGROLL_*` environment overrides on top of this config.
    ///
    /// Unparseable values are rejected rather than silently ignored.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(level) = env::var(env::LOGROLL_LEVEL_ENV) {
            self.level = level.parse()?;
        }
        if let Some(level) = env::var(env::LOGROLL_ALERT_LEVEL_ENV) {
            self.alert_level = level.parse()?;
        }
        if let Some(dir) = env::var(env::LOGROLL_DIR_ENV) {
            self.default_log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env::var(env::LOGROLL_FILE_PREFIX_ENV) {
            self.file_prefix = prefix;
        }
        if let Some(raw) = env::var(env::LOGROLL_MAX_FILE_SIZE_BYTES_ENV) {
            let bytes: u64 = raw.parse().map_err(|_| {
                Error::Config(format!("{} is not a byte count: {raw}", env::LOGROLL_MAX_FILE_SIZE_BYTES_ENV))
            })?;
            self.max_file_size_bytes = (bytes > 0).then_some(bytes);
        }
        Ok(self)
    }

    /// Message length ceiling for `level`, if any.
    pub fn msg_max_len(&self, level: Level) -> Option<usize> {
        match level {
            Level::Debug => self.debug_msg_max_len,
            Level::Info => self.info_msg_max_len,
            _ => None,
        }
    }

    /// File size after which `level` is no longer written, if any.
    pub fn before_file_size_bytes(&self, level: Level) -> Option<u64> {
        match level {
            Level::Debug => self.debug_before_file_size_bytes,
            Level::Info => self.info_before_file_size_bytes,
            _ => None,
        }
    }
}

/// Provider of the current configuration snapshot.
///
/// The engine calls [`ConfigSource::snapshot`] on every operation and must
/// tolerate a different snapshot between any two calls.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Arc<LogConfig>;
}

impl ConfigSource for Arc<LogConfig> {
    fn snapshot(&self) -> Arc<LogConfig> {
        Arc::clone(self)
    }
}

/// In-memory config holder whose snapshot can be swapped at runtime.
#[derive(Debug, Default)]
pub struct SharedConfig {
    current: RwLock<Arc<LogConfig>>,
}

impl SharedConfig {
    pub fn new(config: LogConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Replace the active snapshot. Readers holding the old one keep it.
    pub fn replace(&self, config: LogConfig) {
        *self.current.write() = Arc::new(config);
    }

    /// Edit a copy of the active snapshot and publish it.
    pub fn update(&self, edit: impl FnOnce(&mut LogConfig)) {
        let mut guard = self.current.write();
        let mut next = (**guard).clone();
        edit(&mut next);
        *guard = Arc::new(next);
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> Arc<LogConfig> {
        Arc::clone(&self.current.read())
    }
}
