use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::caller::Caller;
use crate::format::LineFormatter;
use crate::level::Level;
use crate::record::Msg;
use crate::writer::LogWriter;

/// Target of the crate's own diagnostics. Events under it are never
/// forwarded, otherwise a failing writer would feed itself.
pub const DIAG_TARGET: &str = "logroll::diag";

/// `tracing_subscriber` layer that renders events with a [`LineFormatter`]
/// and queues them on a [`LogWriter`].
///
/// The caller is taken from the event metadata instead of the stack, so
/// the skip depth of the formatter does not matter here.
pub struct WriterLayer {
    writer: Arc<dyn LogWriter>,
    formatter: LineFormatter,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Events handed to the writer.
    pub forwarded_events: Arc<AtomicU64>,
    /// Events the writer refused with an error.
    pub failed_events: Arc<AtomicU64>,
}

impl WriterLayer {
    pub fn new(writer: Arc<dyn LogWriter>, formatter: LineFormatter) -> Self {
        Self {
            writer,
            formatter,
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
            failed_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Map a `tracing` level onto the writer's levels. `TRACE` folds into
/// `Debug`.
pub fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warn,
        tracing::Level::INFO => Level::Info,
        _ => Level::Debug,
    }
}

impl<S> Layer<S> for WriterLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if meta.target().starts_with(DIAG_TARGET) {
            return;
        }
        let level = map_level(meta.level());
        if !self.writer.is_loggable(level) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        let caller = Arc::new(Caller::new(
            meta.module_path().unwrap_or(meta.target()),
            meta.file().unwrap_or_default(),
            meta.line().unwrap_or_default(),
        ));
        let text = event_text(message, &fields);

        let formatted = match self
            .formatter
            .format_with_caller(level, Some(level.color()), caller, &text, &[])
        {
            Ok(formatted) => formatted,
            Err(_) => {
                self.failed_events.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let msg = Msg {
            level,
            skip_call: 0,
            formatted,
        };
        match self.writer.write_msg(&msg) {
            Ok(()) => self.forwarded_events.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed_events.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// `message key=value key=value`, keys in lexical order.
fn event_text(message: Option<String>, fields: &BTreeMap<String, serde_json::Value>) -> String {
    let mut text = message.unwrap_or_default();
    for (key, value) in fields {
        if !text.is_empty() {
            text.push(' ');
        }
        match value {
            serde_json::Value::String(s) => {
                let _ = write!(text, "{key}={s}");
            }
            other => {
                let _ = write!(text, "{key}={other}");
            }
        }
    }
    text
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, LogConfig, SharedConfig};
    use crate::stdout_writer::StdoutWriter;
    use parking_lot::Mutex;
    use std::io::{self, Write};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn layer(level: Level) -> (WriterLayer, Captured) {
        let config: Arc<dyn ConfigSource> = Arc::new(SharedConfig::new(LogConfig {
            level,
            ..Default::default()
        }));
        let formatter = LineFormatter::new("bridge", 0, "text", Arc::clone(&config))
            .unwrap()
            .with_color_disabled(true);
        let out = Captured::default();
        let writer = StdoutWriter::with_output(formatter.clone(), config, Box::new(out.clone()));
        (WriterLayer::new(Arc::new(writer), formatter), out)
    }

    #[test]
    fn forwards_events_with_fields_and_location() {
        let (layer, out) = layer(Level::Debug);
        let forwarded = Arc::clone(&layer.forwarded_events);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(user = "ann", attempts = 3, "login failed");
        });

        let text = String::from_utf8_lossy(&out.0.lock()).into_owned();
        assert_eq!(forwarded.load(Ordering::Relaxed), 1);
        assert!(text.contains(" [bridge] [] WARN logroll::layer::tests:layer.rs:"));
        assert!(text.ends_with(" login failed attempts=3 user=ann\n"));
    }

    #[test]
    fn skips_diagnostics_and_filtered_levels() {
        let (layer, out) = layer(Level::Info);
        let total = Arc::clone(&layer.total_events);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "logroll::diag", "buffer full");
            tracing::debug!("too chatty");
            tracing::trace!("even more");
        });

        assert_eq!(total.load(Ordering::Relaxed), 3);
        assert!(out.0.lock().is_empty());
    }

    #[test]
    fn trace_level_folds_into_debug() {
        assert_eq!(map_level(&tracing::Level::TRACE), Level::Debug);
        assert_eq!(map_level(&tracing::Level::ERROR), Level::Error);
    }
}
