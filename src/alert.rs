use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConfigSource;
use crate::error::Result;
use crate::level::Level;
use crate::record::Msg;
use crate::writer::LogWriter;

/// Alert hook. Runs on the producer's thread, so it must return quickly.
pub type AlertFn = Arc<dyn Fn(&Msg) + Send + Sync>;

/// Decorator that forwards severe records to an alert callback.
///
/// The alert receives the very [`Msg`] that is written, so the notification
/// and the persisted line never differ. Records at or above the alert level
/// count as loggable, so a facade formats them and the alert fires even when
/// the wrapped writer filters the line itself.
pub struct AlertWriter {
    inner: Arc<dyn LogWriter>,
    config: Arc<dyn ConfigSource>,
    on_alert: Option<AlertFn>,
    enabled: AtomicBool,
}

impl fmt::Debug for AlertWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertWriter")
            .field("alert_level", &self.alert_level())
            .field("has_callback", &self.on_alert.is_some())
            .finish_non_exhaustive()
    }
}

impl AlertWriter {
    pub fn new(inner: Arc<dyn LogWriter>, config: Arc<dyn ConfigSource>, on_alert: Option<AlertFn>) -> Self {
        Self {
            inner,
            config,
            on_alert,
            enabled: AtomicBool::new(true),
        }
    }

    /// Temporarily stop invoking the callback without unwrapping the writer.
    pub fn set_alerts_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn alert_level(&self) -> Level {
        self.config.snapshot().alert_level
    }

    pub fn inner(&self) -> &Arc<dyn LogWriter> {
        &self.inner
    }

    fn callback_for(&self, level: Level) -> Option<&AlertFn> {
        if !self.enabled.load(Ordering::Relaxed) || level < self.alert_level() {
            return None;
        }
        self.on_alert.as_ref()
    }

    fn persist_and_alert(&self, msg: &Msg, on_alert: &AlertFn) -> Result<()> {
        self.inner.write_msg(msg)?;
        on_alert(msg);
        Ok(())
    }
}

#[async_trait]
impl LogWriter for AlertWriter {
    fn is_loggable(&self, level: Level) -> bool {
        self.inner.is_loggable(level) || level >= self.alert_level()
    }

    #[inline(never)]
    fn write(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<()> {
        let skip = self.inner.skip_call() + 1;
        match self.callback_for(level) {
            None => self.inner.write_by_skip_call(level, skip, template, args),
            Some(on_alert) => {
                let msg = self.inner.get_msg_by_skip_call(level, skip, template, args)?;
                self.persist_and_alert(&msg, on_alert)
            }
        }
    }

    #[inline(never)]
    fn write_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<()> {
        match self.callback_for(level) {
            None => self.inner.write_by_skip_call(level, skip_call + 1, template, args),
            Some(on_alert) => {
                let msg = self.inner.get_msg_by_skip_call(level, skip_call + 1, template, args)?;
                self.persist_and_alert(&msg, on_alert)
            }
        }
    }

    fn write_msg(&self, msg: &Msg) -> Result<()> {
        match self.callback_for(msg.level) {
            None => self.inner.write_msg(msg),
            Some(on_alert) => self.persist_and_alert(msg, on_alert),
        }
    }

    #[inline(never)]
    fn get_msg(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<Msg> {
        let skip = self.inner.skip_call() + 1;
        self.inner.get_msg_by_skip_call(level, skip, template, args)
    }

    #[inline(never)]
    fn get_msg_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<Msg> {
        self.inner.get_msg_by_skip_call(level, skip_call + 1, template, args)
    }

    fn skip_call(&self) -> usize {
        self.inner.skip_call()
    }

    fn disable_caller_cache(&self, disabled: bool) {
        self.inner.disable_caller_cache(disabled);
    }

    fn enable_stdout_printer(&self) {
        self.inner.enable_stdout_printer();
    }

    fn disable_stdout_printer(&self) {
        self.inner.disable_stdout_printer();
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogConfig, SharedConfig};
    use parking_lot::Mutex;

    /// Writer that keeps queued messages in memory and filters below Warn.
    #[derive(Default)]
    struct Recorder {
        written: Mutex<Vec<Msg>>,
    }

    #[async_trait]
    impl LogWriter for Recorder {
        fn is_loggable(&self, level: Level) -> bool {
            level >= Level::Warn
        }

        fn write(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<()> {
            self.write_by_skip_call(level, 0, template, args)
        }

        fn write_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<()> {
            let msg = self.get_msg_by_skip_call(level, skip_call, template, args)?;
            self.write_msg(&msg)
        }

        fn write_msg(&self, msg: &Msg) -> Result<()> {
            if self.is_loggable(msg.level) {
                self.written.lock().push(msg.clone());
            }
            Ok(())
        }

        fn get_msg(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<Msg> {
            self.get_msg_by_skip_call(level, 0, template, args)
        }

        fn get_msg_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<Msg> {
            Ok(Msg {
                level,
                skip_call,
                formatted: format!("{} {}\n", level.tag(), crate::format::render_message(template, args)),
            })
        }

        fn skip_call(&self) -> usize {
            0
        }

        fn disable_caller_cache(&self, _disabled: bool) {}

        fn enable_stdout_printer(&self) {}

        fn disable_stdout_printer(&self) {}

        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn setup(alert_level: Level) -> (Arc<Recorder>, AlertWriter, Arc<Mutex<Vec<Msg>>>) {
        let recorder = Arc::new(Recorder::default());
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&alerts);
        let config = Arc::new(SharedConfig::new(LogConfig {
            alert_level,
            ..Default::default()
        }));
        let writer = AlertWriter::new(
            recorder.clone(),
            config,
            Some(Arc::new(move |msg: &Msg| sink.lock().push(msg.clone()))),
        );
        (recorder, writer, alerts)
    }

    #[test]
    fn alert_gets_the_persisted_message() {
        let (recorder, writer, alerts) = setup(Level::Warn);
        writer.write(Level::Error, "disk {} failed", &[&"sda"]).unwrap();

        let written = recorder.written.lock();
        let alerts = alerts.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(*alerts, *written);
        assert_eq!(alerts[0].formatted, "ERR disk sda failed\n");
    }

    #[test]
    fn below_threshold_is_only_delegated() {
        let (recorder, writer, alerts) = setup(Level::Error);
        writer.write(Level::Warn, "slow", &[]).unwrap();
        assert_eq!(recorder.written.lock().len(), 1);
        assert!(alerts.lock().is_empty());
    }

    #[test]
    fn alert_level_widens_loggable() {
        let (_, writer, _) = setup(Level::Important);
        assert!(writer.is_loggable(Level::Important));
        assert!(!writer.is_loggable(Level::Info));
        assert!(writer.is_loggable(Level::Warn));
    }

    #[test]
    fn filtered_records_still_alert() {
        let (recorder, writer, alerts) = setup(Level::Important);
        writer.write(Level::Important, "deploy started", &[]).unwrap();
        assert!(recorder.written.lock().is_empty());
        assert_eq!(alerts.lock().len(), 1);
    }

    #[test]
    fn skip_depth_grows_by_one_frame() {
        let (_, writer, _) = setup(Level::Warn);
        assert_eq!(writer.skip_call(), 0);
        assert_eq!(writer.get_msg(Level::Info, "x", &[]).unwrap().skip_call, 1);
        assert_eq!(writer.get_msg_by_skip_call(Level::Info, 2, "x", &[]).unwrap().skip_call, 3);
    }

    #[test]
    fn disabled_alerts_are_not_invoked() {
        let (recorder, writer, alerts) = setup(Level::Warn);
        writer.set_alerts_enabled(false);
        writer.write(Level::Fatal, "down", &[]).unwrap();
        assert!(alerts.lock().is_empty());
        assert_eq!(recorder.written.lock().len(), 1);
    }
}
