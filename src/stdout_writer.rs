use std::fmt::{self, Display};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ConfigSource;
use crate::error::Result;
use crate::format::LineFormatter;
use crate::level::{Color, Level};
use crate::record::Msg;
use crate::writer::LogWriter;

/// Writer printing formatted lines to stdout.
///
/// Lines are written synchronously on the caller's thread; there is no
/// buffer, so `flush` only flushes the stream.
pub struct StdoutWriter {
    formatter: LineFormatter,
    config: Arc<dyn ConfigSource>,
    /// Fixed color for every line; `None` colors by level.
    color: Option<Color>,
    skip_call: usize,
    cache_caller: AtomicBool,
    printing: AtomicBool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for StdoutWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutWriter")
            .field("formatter", &self.formatter)
            .field("color", &self.color)
            .field("printing", &self.printing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StdoutWriter {
    pub fn new(formatter: LineFormatter, config: Arc<dyn ConfigSource>) -> Self {
        Self::with_output(formatter, config, Box::new(io::stdout()))
    }

    /// Print into `out` instead of stdout.
    pub fn with_output(formatter: LineFormatter, config: Arc<dyn ConfigSource>, out: Box<dyn Write + Send>) -> Self {
        Self {
            skip_call: formatter.skip_call(),
            cache_caller: AtomicBool::new(formatter.caches_caller()),
            formatter,
            config,
            color: None,
            printing: AtomicBool::new(true),
            out: Mutex::new(out),
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    #[inline(never)]
    fn render(&self, skip_call: usize, level: Level, template: &str, args: &[&dyn Display]) -> Result<String> {
        self.formatter.format_at(
            skip_call + 2,
            self.cache_caller.load(Ordering::Relaxed),
            level,
            Some(self.color.unwrap_or(level.color())),
            template,
            args,
        )
    }

    /// A broken console is reported, never handed back to the producer.
    fn print(&self, line: &str) -> Result<()> {
        if !self.printing.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Err(e) = self.out.lock().write_all(line.as_bytes()) {
            tracing::warn!(target: "logroll::diag", error = %e, "stdout write failed");
        }
        Ok(())
    }
}

#[async_trait]
impl LogWriter for StdoutWriter {
    fn is_loggable(&self, level: Level) -> bool {
        level >= self.config.snapshot().level
    }

    #[inline(never)]
    fn write(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<()> {
        if !self.is_loggable(level) {
            return Ok(());
        }
        let line = self.render(self.skip_call, level, template, args)?;
        self.print(&line)
    }

    #[inline(never)]
    fn write_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<()> {
        if !self.is_loggable(level) {
            return Ok(());
        }
        let line = self.render(skip_call, level, template, args)?;
        self.print(&line)
    }

    fn write_msg(&self, msg: &Msg) -> Result<()> {
        if !self.is_loggable(msg.level) {
            return Ok(());
        }
        self.print(&msg.formatted)
    }

    #[inline(never)]
    fn get_msg(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<Msg> {
        let formatted = self.render(self.skip_call, level, template, args)?;
        Ok(Msg {
            level,
            skip_call: self.skip_call,
            formatted,
        })
    }

    #[inline(never)]
    fn get_msg_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<Msg> {
        let formatted = self.render(skip_call, level, template, args)?;
        Ok(Msg {
            level,
            skip_call,
            formatted,
        })
    }

    fn skip_call(&self) -> usize {
        self.skip_call
    }

    fn disable_caller_cache(&self, disabled: bool) {
        self.cache_caller.store(!disabled, Ordering::Relaxed);
    }

    fn enable_stdout_printer(&self) {
        self.printing.store(true, Ordering::Relaxed);
    }

    fn disable_stdout_printer(&self) {
        self.printing.store(false, Ordering::Relaxed);
    }

    async fn flush(&self) -> Result<()> {
        self.out.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogConfig, SharedConfig};

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

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn writer(level: Level) -> (StdoutWriter, Captured) {
        let config: Arc<dyn ConfigSource> = Arc::new(SharedConfig::new(LogConfig {
            level,
            ..Default::default()
        }));
        let formatter = LineFormatter::new("console", 0, "text", Arc::clone(&config))
            .unwrap()
            .with_color_disabled(true);
        let captured = Captured::default();
        (
            StdoutWriter::with_output(formatter, config, Box::new(captured.clone())),
            captured,
        )
    }

    #[tokio::test]
    async fn prints_loggable_lines() {
        let (writer, out) = writer(Level::Info);
        writer.write(Level::Debug, "hidden", &[]).unwrap();
        writer.write(Level::Warn, "shown {}", &[&1]).unwrap();
        writer.flush().await.unwrap();

        let text = out.text();
        assert!(!text.contains("hidden"));
        assert!(text.contains(" [console] [] WARN "));
        assert!(text.ends_with(" shown 1\n"));
    }

    #[test]
    fn printer_toggle_silences_output() {
        let (writer, out) = writer(Level::Debug);
        writer.disable_stdout_printer();
        writer.write(Level::Error, "quiet", &[]).unwrap();
        assert!(out.text().is_empty());

        writer.enable_stdout_printer();
        let msg = writer.get_msg(Level::Error, "loud", &[]).unwrap();
        writer.write_msg(&msg).unwrap();
        assert_eq!(out.text(), msg.formatted);
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn broken_stdout_does_not_fail_producers() {
        let config: Arc<dyn ConfigSource> = Arc::new(SharedConfig::default());
        let formatter = LineFormatter::new("console", 0, "text", Arc::clone(&config)).unwrap();
        let writer = StdoutWriter::with_output(formatter, config, Box::new(Broken));

        writer.write(Level::Error, "nowhere to go", &[]).unwrap();
        writer.write_by_skip_call(Level::Error, 0, "still fine", &[]).unwrap();
        let msg = writer.get_msg(Level::Error, "pre-rendered", &[]).unwrap();
        writer.write_msg(&msg).unwrap();
    }
}
