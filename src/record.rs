use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::caller::Caller;
use crate::level::{Color, Level, COLOR_RESET};

/// One log call, fully resolved and ready to be rendered.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub module: String,
    pub trace: Option<Arc<str>>,
    pub caller: Arc<Caller>,
    /// Message after substitution, escaping and truncation.
    pub message: String,
}

impl LogRecord {
    /// Render the record as a single terminated line:
    ///
    /// `[2024-05-01 10:00:00.1234] [module] [trace] LEVEL function:file:line message`
    ///
    /// The sub-second field counts units of 100µs.
    pub fn render(&self, color: Option<Color>) -> String {
        let (color_start, color_end) = match color {
            Some(c) => (c.escape(), COLOR_RESET),
            None => ("", ""),
        };

        let mut line = String::with_capacity(64 + self.message.len());
        let _ = writeln!(
            line,
            "[{}.{:04}] [{}] [{}] {}{} {}:{}:{}{} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.timestamp.timestamp_subsec_nanos() / 100_000,
            self.module,
            self.trace.as_deref().unwrap_or_default(),
            color_start,
            self.level.tag(),
            self.caller.function,
            self.caller.file,
            self.caller.line,
            color_end,
            self.message,
        );
        line
    }
}

/// A formatted line together with the inputs it was produced from.
///
/// Produced by `get_msg`, consumed by `write_msg` and by alert callbacks so
/// that the persisted line and the alert carry identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub level: Level,
    pub skip_call: usize,
    pub formatted: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> LogRecord {
        LogRecord {
            timestamp: Local.with_ymd_and_hms(2024, 5, 1, 10, 4, 5).unwrap()
                + chrono::Duration::microseconds(123_456),
            level: Level::Warn,
            module: "billing".into(),
            trace: Some(Arc::from("t-1")),
            caller: Arc::new(Caller::new("app::charge", "/src/app.rs", 42)),
            message: "card declined".into(),
        }
    }

    #[test]
    fn renders_plain_layout() {
        assert_eq!(
            record().render(None),
            "[2024-05-01 10:04:05.1234] [billing] [t-1] WARN app::charge:app.rs:42 card declined\n"
        );
    }

    #[test]
    fn color_wraps_level_and_caller() {
        let line = record().render(Some(Color::Green));
        assert!(line.contains("[t-1] \x1b[33mWARN app::charge:app.rs:42\x1b[0m card declined\n"));
    }
}
