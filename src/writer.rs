use std::fmt::Display;

use async_trait::async_trait;

use crate::error::Result;
use crate::level::Level;
use crate::record::Msg;

/// Destination for formatted log lines.
///
/// Implementations are [`FileWriter`](crate::file_writer::FileWriter),
/// [`StdoutWriter`](crate::stdout_writer::StdoutWriter) and the
/// [`AlertWriter`](crate::alert::AlertWriter) decorator, which wraps any of
/// them.
///
/// Every method except `flush` is called on the producer's thread and must
/// not block on I/O.
///
/// **Skip depth.** Caller resolution attributes a line to the code that
/// called the writer method when the skip depth is `0`. Facades that add
/// their own frames raise it accordingly, either once through the writer's
/// configured depth or per call through the `*_by_skip_call` variants.
#[async_trait]
pub trait LogWriter: Send + Sync {
    /// Whether a record at `level` would currently be written.
    fn is_loggable(&self, level: Level) -> bool;

    /// Format and queue one record at the configured skip depth.
    ///
    /// `template` may contain `{}` placeholders filled from `args`.
    fn write(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<()>;

    /// Like [`LogWriter::write`] with an explicit skip depth.
    fn write_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<()>;

    /// Queue a line produced earlier by `get_msg` without formatting again.
    fn write_msg(&self, msg: &Msg) -> Result<()>;

    /// Format a record without queueing it.
    fn get_msg(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<Msg>;

    fn get_msg_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<Msg>;

    /// Skip depth used by `write` and `get_msg`.
    fn skip_call(&self) -> usize;

    /// Toggle the per-call-site caller cache.
    fn disable_caller_cache(&self, disabled: bool);

    /// Echo every queued line to stdout as well.
    fn enable_stdout_printer(&self);

    fn disable_stdout_printer(&self);

    /// Persist everything queued before this call.
    ///
    /// **Returns**
    /// - `Ok(())` once the lines are written and synced.
    /// - `Err(..)` with the first write or sync failure.
    ///
    /// There is no built-in timeout; wrap the future if one is needed.
    async fn flush(&self) -> Result<()>;
}
