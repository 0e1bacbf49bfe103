use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;

use crate::alert::{AlertFn, AlertWriter};
use crate::config::{ConfigSource, LogConfig};
use crate::error::{Error, Result};
use crate::file_writer::{FileWriter, FileWriterConfig};
use crate::writer::LogWriter;

/// File prefix of the exception stream.
pub const EXCEPTION_FILE_PREFIX: &str = "error";

/// A running writer together with its background task.
///
/// `writer` is what producers call; it is either the file writer itself or
/// a decorator around it. `file` gives access to the file writer's own
/// controls.
pub struct WriterHandle {
    pub writer: Arc<dyn LogWriter>,
    pub file: Arc<FileWriter>,
    pub task: JoinHandle<()>,
}

impl WriterHandle {
    /// Flush, stop the writer task and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        let flushed = self.writer.flush().await;
        self.file.shutdown();
        self.task.await.map_err(|_| Error::ChannelClosed)?;
        flushed
    }
}

/// The two streams of a service: everything goes to the default stream,
/// failures are additionally kept apart in the exception stream.
pub struct LogStreams {
    pub default: WriterHandle,
    pub exception: WriterHandle,
}

/// Writer settings for the default stream of `module`, taken from `cfg`.
pub fn default_stream_config(cfg: &LogConfig, module: &str) -> FileWriterConfig {
    FileWriterConfig {
        module: module.to_string(),
        base_dir: cfg.default_log_dir.clone(),
        file_prefix: module.to_string(),
        ..Default::default()
    }
}

/// Writer settings for the exception stream, taken from `cfg`.
pub fn exception_stream_config(cfg: &LogConfig, module: &str) -> FileWriterConfig {
    FileWriterConfig {
        module: module.to_string(),
        base_dir: cfg.exception_log_dir.clone(),
        file_prefix: EXCEPTION_FILE_PREFIX.to_string(),
        ..Default::default()
    }
}

/// Build a [`FileWriter`] and spawn its loop on the current runtime.
pub fn init_file_writer(cfg: FileWriterConfig, config: Arc<dyn ConfigSource>) -> Result<WriterHandle> {
    let (file, task) = FileWriter::new(cfg, config)?;
    let file = Arc::new(file);
    Ok(WriterHandle {
        writer: file.clone(),
        file,
        task,
    })
}

/// Like [`init_file_writer`], with an [`AlertWriter`] in front of it.
///
/// The alert decorator adds one frame, so the skip depth configured in
/// `cfg` stays valid for callers of the returned writer.
pub fn init_with_alert(
    cfg: FileWriterConfig,
    config: Arc<dyn ConfigSource>,
    on_alert: Option<AlertFn>,
) -> Result<WriterHandle> {
    let handle = init_file_writer(cfg, Arc::clone(&config))?;
    let writer = Arc::new(AlertWriter::new(handle.writer, config, on_alert));
    Ok(WriterHandle {
        writer,
        file: handle.file,
        task: handle.task,
    })
}

/// Start the default stream (with alerts) and the exception stream of
/// `module`, both placed according to the current config snapshot.
pub fn init_streams(config: Arc<dyn ConfigSource>, module: &str, on_alert: Option<AlertFn>) -> Result<LogStreams> {
    let snapshot = config.snapshot();
    let default = init_with_alert(default_stream_config(&snapshot, module), Arc::clone(&config), on_alert)?;
    let exception = init_file_writer(exception_stream_config(&snapshot, module), config)?;
    Ok(LogStreams { default, exception })
}

static DEFAULT_WRITER: OnceLock<Arc<dyn LogWriter>> = OnceLock::new();

/// Register the process-wide writer. Only the first call succeeds.
pub fn set_default_writer(writer: Arc<dyn LogWriter>) -> Result<()> {
    DEFAULT_WRITER
        .set(writer)
        .map_err(|_| Error::Config("default writer is already set".to_string()))
}

/// The process-wide writer, if one was registered.
pub fn default_writer() -> Option<Arc<dyn LogWriter>> {
    DEFAULT_WRITER.get().cloned()
}

#[cfg(feature = "tracing-bridge")]
pub use self::bridge::{init_tracing, init_tracing_with_config, TracingBridgeConfig};

#[cfg(feature = "tracing-bridge")]
mod bridge {
    use std::sync::Arc;

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    use crate::config::ConfigSource;
    use crate::error::{Error, Result};
    use crate::format::LineFormatter;
    use crate::layer::WriterLayer;
    use crate::writer::LogWriter;

    /// Settings of the `tracing` bridge.
    ///
    /// **Fields**
    /// - `module`: rendered into the `[module]` field of bridged lines.
    /// - `disable_color`: render bridged lines without ANSI colors.
    /// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
    ///   installed next to the writer layer. It also prints the crate's own
    ///   diagnostics, which the writer layer skips.
    #[derive(Clone, Debug)]
    pub struct TracingBridgeConfig {
        pub module: String,
        pub disable_color: bool,
        pub enable_stdout: bool,
    }

    impl Default for TracingBridgeConfig {
        fn default() -> Self {
            Self {
                module: "tracing".to_string(),
                disable_color: false,
                enable_stdout: true,
            }
        }
    }

    /// Install a global `tracing` subscriber that forwards events into
    /// `writer`.
    ///
    /// Fails if a global subscriber is already installed.
    pub fn init_tracing_with_config(
        writer: Arc<dyn LogWriter>,
        config: Arc<dyn ConfigSource>,
        bridge: TracingBridgeConfig,
    ) -> Result<()> {
        let formatter =
            LineFormatter::new(bridge.module, 0, "text", config)?.with_color_disabled(bridge.disable_color);
        let layer = WriterLayer::new(writer, formatter);

        // The two subscriber shapes have different types, hence two calls.
        let installed = if bridge.enable_stdout {
            let subscriber = Registry::default().with(layer).with(tracing_subscriber::fmt::layer());
            tracing::subscriber::set_global_default(subscriber)
        } else {
            tracing::subscriber::set_global_default(Registry::default().with(layer))
        };
        installed.map_err(|e| Error::Config(e.to_string()))
    }

    /// [`init_tracing_with_config`] with [`TracingBridgeConfig::default`].
    pub fn init_tracing(writer: Arc<dyn LogWriter>, config: Arc<dyn ConfigSource>) -> Result<()> {
        init_tracing_with_config(writer, config, TracingBridgeConfig::default())
    }
}
