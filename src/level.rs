use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::Error;

/// ANSI sequence that resets terminal colors.
pub const COLOR_RESET: &str = "\x1b[0m";

/// Severity of a log record, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Info,
    Important,
    Warn,
    Error,
    Panic,
    Fatal,
}

impl Level {
    pub const ALL: [Level; 7] = [
        Level::Debug,
        Level::Info,
        Level::Important,
        Level::Warn,
        Level::Error,
        Level::Panic,
        Level::Fatal,
    ];

    /// Canonical tag written into every line.
    pub fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DBG",
            Level::Info => "INFO",
            Level::Important => "IMP",
            Level::Warn => "WARN",
            Level::Error => "ERR",
            Level::Panic => "PANIC",
            Level::Fatal => "FATAL",
        }
    }

    /// Terminal color used when decorating the level tag.
    pub fn color(self) -> Color {
        match self {
            Level::Debug | Level::Info => Color::LightGreen,
            Level::Important => Color::Blue,
            Level::Warn => Color::Green,
            Level::Error | Level::Panic => Color::Red,
            Level::Fatal => Color::Purple,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl TryFrom<u8> for Level {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        Level::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| Error::UnknownLevel(code.to_string()))
    }
}

/// Accepts the canonical tags (`DBG`, `WARN`, ...) as well as the spelled
/// out names, case-insensitively.
impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_uppercase().as_str() {
            "DBG" | "DEBUG" => Level::Debug,
            "INFO" => Level::Info,
            "IMP" | "IMPORTANT" => Level::Important,
            "WARN" | "WARNING" => Level::Warn,
            "ERR" | "ERROR" => Level::Error,
            "PANIC" => Level::Panic,
            "FATAL" => Level::Fatal,
            _ => return Err(Error::UnknownLevel(s.to_string())),
        };
        Ok(level)
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for Level {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// Terminal colors available for level decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    LightGreen,
    Yellow,
    Blue,
    Purple,
}

impl Color {
    pub fn escape(self) -> &'static str {
        match self {
            Color::Red => "\x1b[91m",
            Color::LightGreen => "\x1b[92m",
            Color::Yellow => "\x1b[93m",
            Color::Green => "\x1b[33m",
            Color::Blue => "\x1b[36;1m",
            Color::Purple => "\x1b[95m",
        }
    }
}
