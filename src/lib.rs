//! Asynchronous rotating file log writer.
//!
//! Producers format on their own thread and hand lines to a bounded buffer;
//! a single Tokio task owns the file, rotates it per hour, enforces the size
//! limit and runs retention sweeps. An [`AlertWriter`] can sit in front of
//! any writer to forward severe records to a callback.
//!
//! ```no_run
//! use std::sync::Arc;
//! use logroll::{init_file_writer, FileWriterConfig, Level, LogConfig, LogWriter, SharedConfig};
//!
//! # async fn run() -> logroll::Result<()> {
//! let config = Arc::new(SharedConfig::new(LogConfig::default()));
//! let handle = init_file_writer(
//!     FileWriterConfig {
//!         module: "billing".into(),
//!         base_dir: "logs".into(),
//!         file_prefix: "billing".into(),
//!         ..Default::default()
//!     },
//!     config,
//! )?;
//! handle.writer.write(Level::Info, "charged {} cents", &[&250])?;
//! handle.shutdown().await
//! # }
//! ```

pub mod alert;
pub mod buffer;
pub mod caller;
pub mod config;
pub mod env;
pub mod error;
pub mod file_writer;
pub mod format;
pub mod init;
#[cfg(feature = "tracing-bridge")]
pub mod layer;
pub mod level;
pub mod record;
pub mod retention;
pub mod rotation;
pub mod stdout_writer;
pub mod trace;
pub mod writer;

pub use alert::{AlertFn, AlertWriter};
pub use config::{ConfigSource, LogConfig, SharedConfig};
pub use error::{Error, Result};
pub use file_writer::{Clock, FileWriter, FileWriterConfig, WriterCore, WriterState};
pub use format::LineFormatter;
pub use init::{default_writer, init_file_writer, init_streams, init_with_alert, set_default_writer, WriterHandle};
#[cfg(feature = "tracing-bridge")]
pub use init::{init_tracing, init_tracing_with_config, TracingBridgeConfig};
pub use level::Level;
pub use record::Msg;
pub use rotation::RotationPolicy;
pub use stdout_writer::StdoutWriter;
pub use writer::LogWriter;
