//! Environment variable names recognised by [`LogConfig::apply_env`].
//!
//! These are purely helpers; the engine itself only ever sees a
//! [`ConfigSource`] snapshot.
//!
//! [`LogConfig::apply_env`]: crate::config::LogConfig::apply_env
//! [`ConfigSource`]: crate::config::ConfigSource

/// Minimum level, e.g. `INFO`.
pub const LOGROLL_LEVEL_ENV: &str = "LOGROLL_LEVEL";

/// Alert threshold level, e.g. `ERR`.
pub const LOGROLL_ALERT_LEVEL_ENV: &str = "LOGROLL_ALERT_LEVEL";

/// Directory of the default log stream.
pub const LOGROLL_DIR_ENV: &str = "LOGROLL_DIR";

/// File name prefix override.
pub const LOGROLL_FILE_PREFIX_ENV: &str = "LOGROLL_FILE_PREFIX";

/// Max file size in bytes; `0` disables the limit.
pub const LOGROLL_MAX_FILE_SIZE_BYTES_ENV: &str = "LOGROLL_MAX_FILE_SIZE_BYTES";

/// Read a non-empty environment variable.
pub fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}
