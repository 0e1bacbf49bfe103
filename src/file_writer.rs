//! Rotating file writer.
//!
//! [`FileWriter`] is the producer half: it formats on the caller's thread and
//! hands finished lines to a bounded buffer without ever blocking.
//! [`WriterCore`] is the consumer half: a single task that owns the open
//! file, rotation bookkeeping and the retention timer, so none of that state
//! needs a lock.
//!
//! ```text
//! write() ─ format ─ try_enqueue ─┐
//!                                  ├─ WriterCore::run ─ rotate ─ write ─ disk
//! flush() ─ oneshot request ──────┘        └─ tick ─ spawn_blocking(sweep)
//! ```

use std::fmt::{self, Display};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::buffer::{self, BufferReceiver, WriteBuffer, DEFAULT_BATCH_BYTES, DEFAULT_OVERFLOW_NOTICE_COOLDOWN};
use crate::config::{ConfigSource, LogConfig};
use crate::error::{Error, Result};
use crate::format::LineFormatter;
use crate::level::{Color, Level, COLOR_RESET};
use crate::record::Msg;
use crate::retention::{RetentionRules, RetentionSweeper};
use crate::rotation::{OpenedFile, Rotation, RotationPolicy};
use crate::writer::LogWriter;

/// Callback receiving failures that happen inside the writer task.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Wall clock used for hour buckets and file open times.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

type FlushRequest = oneshot::Sender<Result<()>>;

/// Construction parameters of a [`FileWriter`].
///
/// Thresholds that may change at runtime (levels, sizes, retention) live in
/// the [`LogConfig`] snapshot instead.
#[derive(Clone)]
pub struct FileWriterConfig {
    /// Rendered into the `[module]` field of every line.
    pub module: String,
    pub base_dir: PathBuf,
    /// Used when the config snapshot does not set `file_prefix`.
    pub file_prefix: String,
    /// Frames between the code calling the writer and the writer method.
    pub skip_call: usize,
    /// Output encoding name; only `text` is supported.
    pub format: String,
    pub disable_color: bool,
    /// Lines the buffer holds before producers start dropping.
    pub buffer_capacity: usize,
    pub batch_bytes: usize,
    pub overflow_notice_cooldown: Duration,
    /// Minimum spacing between on-disk size re-checks.
    pub check_full_interval: Duration,
    pub sweep_interval: Duration,
    pub rotation: RotationPolicy,
    /// Defaults to [`Local::now`]; replace it to drive rotation by hand.
    pub clock: Clock,
    pub on_write_error: Option<ErrorCallback>,
}

impl fmt::Debug for FileWriterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWriterConfig")
            .field("module", &self.module)
            .field("base_dir", &self.base_dir)
            .field("file_prefix", &self.file_prefix)
            .field("skip_call", &self.skip_call)
            .field("format", &self.format)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("check_full_interval", &self.check_full_interval)
            .field("sweep_interval", &self.sweep_interval)
            .field("rotation", &self.rotation)
            .finish_non_exhaustive()
    }
}

impl Default for FileWriterConfig {
    fn default() -> Self {
        Self {
            module: String::new(),
            base_dir: PathBuf::from("."),
            file_prefix: String::new(),
            skip_call: 0,
            format: "text".to_string(),
            disable_color: false,
            buffer_capacity: 100_000,
            batch_bytes: DEFAULT_BATCH_BYTES,
            overflow_notice_cooldown: DEFAULT_OVERFLOW_NOTICE_COOLDOWN,
            check_full_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(600),
            rotation: RotationPolicy::default(),
            clock: Arc::new(Local::now),
            on_write_error: None,
        }
    }
}

/// Lifecycle of the writer task's file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriterState {
    /// No file open yet, or opening failed.
    Closed = 0,
    Open = 1,
    /// Size limit reached; output is suppressed until the next rotation.
    Full = 2,
}

impl WriterState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => WriterState::Open,
            2 => WriterState::Full,
            _ => WriterState::Closed,
        }
    }
}

/// State published by the writer task for producers and observers.
#[derive(Debug, Default)]
struct Published {
    size_bytes: AtomicU64,
    state: AtomicU8,
    current_file: Mutex<Option<PathBuf>>,
}

/// Producer handle of a rotating file writer.
pub struct FileWriter {
    formatter: LineFormatter,
    config: Arc<dyn ConfigSource>,
    buffer: WriteBuffer,
    flush_tx: mpsc::Sender<FlushRequest>,
    skip_call: usize,
    cache_caller: AtomicBool,
    stdout_echo: AtomicBool,
    published: Arc<Published>,
    cancel: CancellationToken,
}

impl fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWriter")
            .field("module", &self.formatter.module())
            .field("state", &self.state())
            .field("current_file", &self.current_file())
            .finish_non_exhaustive()
    }
}

impl FileWriter {
    /// Create a writer and spawn its task on the current Tokio runtime.
    ///
    /// Must be called from within a runtime. The returned handle completes
    /// after [`FileWriter::shutdown`] or once every producer handle is gone.
    pub fn new(cfg: FileWriterConfig, config: Arc<dyn ConfigSource>) -> Result<(Self, JoinHandle<()>)> {
        let (writer, core) = Self::build(cfg, config)?;
        let handle = tokio::spawn(core.run());
        Ok((writer, handle))
    }

    /// Create a writer without starting it; drive [`WriterCore::run`] on a
    /// runtime of your choice.
    pub fn build(cfg: FileWriterConfig, config: Arc<dyn ConfigSource>) -> Result<(Self, WriterCore)> {
        let formatter = LineFormatter::new(cfg.module.clone(), cfg.skip_call, &cfg.format, Arc::clone(&config))?
            .with_color_disabled(cfg.disable_color);
        let (buffer, receiver) = buffer::channel(cfg.buffer_capacity, cfg.overflow_notice_cooldown);
        let (flush_tx, flush_rx) = mpsc::channel(64);
        let published = Arc::new(Published::default());
        let cancel = CancellationToken::new();

        let base_dir = if cfg.base_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            cfg.base_dir
        };

        let core = WriterCore {
            receiver: receiver.with_batch_bytes(cfg.batch_bytes),
            flush_rx,
            config: Arc::clone(&config),
            base_dir,
            default_prefix: cfg.file_prefix,
            rotation: cfg.rotation,
            clock: cfg.clock,
            check_full_interval: cfg.check_full_interval,
            sweep_interval: cfg.sweep_interval.max(Duration::from_millis(10)),
            on_write_error: cfg.on_write_error,
            sweeper: Arc::new(RetentionSweeper::new()),
            published: Arc::clone(&published),
            cancel: cancel.clone(),
            file: None,
            opened: None,
            last_full_check: None,
            full_notice_written: false,
        };

        let writer = Self {
            formatter,
            config,
            buffer,
            flush_tx,
            skip_call: cfg.skip_call,
            cache_caller: AtomicBool::new(true),
            stdout_echo: AtomicBool::new(false),
            published,
            cancel,
        };
        Ok((writer, core))
    }

    /// Blocking variant of [`LogWriter::flush`] for code outside the runtime.
    ///
    /// Panics if called from within an asynchronous execution context, like
    /// the underlying Tokio primitives.
    pub fn flush_blocking(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.flush_tx.blocking_send(tx).map_err(|_| Error::ChannelClosed)?;
        rx.blocking_recv().map_err(|_| Error::ChannelClosed)?
    }

    /// Ask the writer task to write out what is queued and stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Path of the file currently open for appending.
    pub fn current_file(&self) -> Option<PathBuf> {
        self.published.current_file.lock().clone()
    }

    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.published.state.load(Ordering::Acquire))
    }

    /// Bytes in the current file as last seen by the writer task.
    pub fn current_size(&self) -> u64 {
        self.published.size_bytes.load(Ordering::Relaxed)
    }

    /// Lines dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.buffer.dropped()
    }

    pub fn overflow_notices(&self) -> u64 {
        self.buffer.overflow_notices()
    }

    // Frames: format_at <- render <- public writer method <- caller.
    #[inline(never)]
    fn render(&self, skip_call: usize, level: Level, template: &str, args: &[&dyn Display]) -> Result<String> {
        self.formatter.format_at(
            skip_call + 2,
            self.cache_caller.load(Ordering::Relaxed),
            level,
            Some(level.color()),
            template,
            args,
        )
    }

    fn enqueue(&self, line: String) {
        if self.stdout_echo.load(Ordering::Relaxed) {
            let _ = io::stdout().lock().write_all(line.as_bytes());
        }
        self.buffer.try_enqueue(line.into_bytes());
    }
}

#[async_trait]
impl LogWriter for FileWriter {
    fn is_loggable(&self, level: Level) -> bool {
        let cfg = self.config.snapshot();
        if level < cfg.level {
            return false;
        }
        match cfg.before_file_size_bytes(level) {
            Some(limit) => self.published.size_bytes.load(Ordering::Relaxed) < limit,
            None => true,
        }
    }

    #[inline(never)]
    fn write(&self, level: Level, template: &str, args: &[&dyn Display]) -> Result<()> {
        if !self.is_loggable(level) {
            return Ok(());
        }
        let line = self.render(self.skip_call, level, template, args)?;
        self.enqueue(line);
        Ok(())
    }

    #[inline(never)]
    fn write_by_skip_call(&self, level: Level, skip_call: usize, template: &str, args: &[&dyn Display]) -> Result<()> {
        if !self.is_loggable(level) {
            return Ok(());
        }
        let line = self.render(skip_call, level, template, args)?;
        self.enqueue(line);
        Ok(())
    }

    fn write_msg(&self, msg: &Msg) -> Result<()> {
        if self.is_loggable(msg.level) {
            self.enqueue(msg.formatted.clone());
        }
        Ok(())
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
        self.stdout_echo.store(true, Ordering::Relaxed);
    }

    fn disable_stdout_printer(&self) {
        self.stdout_echo.store(false, Ordering::Relaxed);
    }

    async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.flush_tx.send(tx).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// Consumer half: the only owner of the open file.
pub struct WriterCore {
    receiver: BufferReceiver,
    flush_rx: mpsc::Receiver<FlushRequest>,
    config: Arc<dyn ConfigSource>,
    base_dir: PathBuf,
    default_prefix: String,
    rotation: RotationPolicy,
    clock: Clock,
    check_full_interval: Duration,
    sweep_interval: Duration,
    on_write_error: Option<ErrorCallback>,
    sweeper: Arc<RetentionSweeper>,
    published: Arc<Published>,
    cancel: CancellationToken,
    file: Option<File>,
    opened: Option<OpenedFile>,
    last_full_check: Option<Instant>,
    full_notice_written: bool,
}

impl WriterCore {
    /// Run until shut down or until every producer handle is dropped.
    ///
    /// Write and rotation failures are reported and the loop carries on
    /// with the next batch.
    pub async fn run(mut self) {
        let cfg = self.config.snapshot();
        if let Err(e) = self.rotate_if_needed(&cfg).await {
            self.report(&e);
        }

        let mut sweep_tick = tokio::time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finish().await;
                    break;
                }
                Some(reply) = self.flush_rx.recv() => {
                    let result = self.flush_pending().await;
                    let _ = reply.send(result);
                }
                line = self.receiver.recv() => match line {
                    Some(line) => {
                        if let Err(e) = self.write_batch(line).await {
                            self.report(&e);
                        }
                    }
                    None => {
                        self.finish().await;
                        break;
                    }
                },
                _ = sweep_tick.tick() => self.spawn_sweep(),
            }
        }
    }

    async fn write_batch(&mut self, first: Vec<u8>) -> Result<()> {
        let mut batch = first;
        self.receiver.fill_batch(&mut batch, usize::MAX);
        self.write_bytes(batch).await
    }

    /// Write everything queued at the time of the call, then sync.
    async fn flush_pending(&mut self) -> Result<()> {
        let mut pending = self.receiver.len();
        let mut first_err = None;

        loop {
            let mut batch = Vec::new();
            let taken = self.receiver.fill_batch(&mut batch, pending);
            pending -= taken;
            if let Err(e) = self.write_bytes(batch).await {
                self.report(&e);
                first_err.get_or_insert(e);
            }
            if pending == 0 || taken == 0 {
                break;
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        if self.file.is_none() {
            // Surface why nothing could be written since the last attempt.
            let cfg = self.config.snapshot();
            self.rotate_if_needed(&cfg).await?;
        }
        self.sync().await
    }

    async fn finish(&mut self) {
        if let Err(e) = self.flush_pending().await {
            self.report(&e);
        }
        self.flush_rx.close();
        while let Ok(reply) = self.flush_rx.try_recv() {
            let _ = reply.send(Ok(()));
        }
        self.published.state.store(WriterState::Closed as u8, Ordering::Release);
    }

    async fn sync(&mut self) -> Result<()> {
        let (Some(file), Some(opened)) = (self.file.as_mut(), self.opened.as_ref()) else {
            return Ok(());
        };
        let path = self.base_dir.join(&opened.name);
        file.flush().await.map_err(|source| Error::Write {
            path: path.clone(),
            source,
        })?;
        file.sync_all().await.map_err(|source| Error::Sync { path, source })
    }

    async fn write_bytes(&mut self, mut buf: Vec<u8>) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let cfg = self.config.snapshot();
        self.rotate_if_needed(&cfg).await?;

        let full = self.check_full(&cfg).await?;
        if full {
            if self.full_notice_written {
                return Ok(());
            }
            buf = overflow_notice(cfg.max_file_size_bytes.unwrap_or_default()).into_bytes();
        }
        self.full_notice_written = full;

        let (Some(file), Some(opened)) = (self.file.as_mut(), self.opened.as_mut()) else {
            return Err(Error::NoOpenFile);
        };
        let result = async {
            file.write_all(&buf).await?;
            file.flush().await
        }
        .await;
        if let Err(source) = result {
            return Err(Error::Write {
                path: self.base_dir.join(&opened.name),
                source,
            });
        }

        opened.size_bytes += buf.len() as u64;
        self.published.size_bytes.store(opened.size_bytes, Ordering::Relaxed);
        Ok(())
    }

    async fn rotate_if_needed(&mut self, cfg: &LogConfig) -> Result<()> {
        let prefix = prefix(cfg, &self.default_prefix);
        match self
            .rotation
            .should_rotate(prefix, self.opened.as_ref(), cfg.max_file_size_bytes, (self.clock)())
        {
            Rotation::Keep => Ok(()),
            Rotation::Open { name, seq } => self.open(name, seq).await,
        }
    }

    async fn open(&mut self, name: String, seq: u32) -> Result<()> {
        // Directory creation is idempotent, another process may race us here.
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|source| Error::CreateDirectory {
                path: self.base_dir.clone(),
                source,
            })?;

        let path = self.base_dir.join(&name);
        let file = open_append(&path).await?;
        let size_bytes = file
            .metadata()
            .await
            .map_err(|source| Error::OpenFile {
                path: path.clone(),
                source,
            })?
            .len();

        if let Err(e) = self.sync().await {
            self.report(&e);
        }

        self.file = Some(file);
        self.opened = Some(OpenedFile {
            name,
            opened_at: (self.clock)(),
            size_bytes,
            seq,
        });
        self.last_full_check = None;
        self.full_notice_written = false;

        self.published.size_bytes.store(size_bytes, Ordering::Relaxed);
        self.published.state.store(WriterState::Open as u8, Ordering::Release);
        *self.published.current_file.lock() = Some(path);
        Ok(())
    }

    /// Whether the open file reached the configured size. The on-disk size
    /// is consulted at most once per `check_full_interval`; in between the
    /// running byte count is used.
    async fn check_full(&mut self, cfg: &LogConfig) -> Result<bool> {
        let Some(max) = cfg.max_file_size_bytes.filter(|m| *m > 0) else {
            self.published.state.store(WriterState::Open as u8, Ordering::Release);
            return Ok(false);
        };

        let now = Instant::now();
        let due = self
            .last_full_check
            .map_or(true, |at| now.duration_since(at) >= self.check_full_interval);
        if due {
            self.resync_size().await?;
            self.last_full_check = Some(now);
        }

        let full = self.opened.as_ref().is_some_and(|o| o.size_bytes >= max);
        let state = if full { WriterState::Full } else { WriterState::Open };
        self.published.state.store(state as u8, Ordering::Release);
        Ok(full)
    }

    async fn resync_size(&mut self) -> Result<()> {
        let Some(opened) = self.opened.as_mut() else {
            return Ok(());
        };
        let path = self.base_dir.join(&opened.name);
        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Removed underneath us; start it again.
                let file = open_append(&path).await?;
                self.file = Some(file);
                0
            }
            Err(source) => return Err(Error::OpenFile { path, source }),
        };
        opened.size_bytes = size;
        self.published.size_bytes.store(size, Ordering::Relaxed);
        Ok(())
    }

    fn spawn_sweep(&self) {
        if self.sweeper.is_running() {
            return;
        }
        let cfg = self.config.snapshot();
        let rules = RetentionRules::from_config(&cfg);
        if rules.is_noop() {
            return;
        }

        let sweeper = Arc::clone(&self.sweeper);
        let dir = self.base_dir.clone();
        let prefix = prefix(&cfg, &self.default_prefix).to_string();
        let active = self.opened.as_ref().map(|o| o.name.clone());
        tokio::task::spawn_blocking(move || {
            sweeper.sweep(&dir, &prefix, active.as_deref(), &rules, SystemTime::now());
        });
    }

    fn report(&self, error: &Error) {
        tracing::error!(target: "logroll::diag", error = %error, "log writer failure");
        if let Some(callback) = &self.on_write_error {
            callback(error);
        }
    }
}

fn prefix<'a>(cfg: &'a LogConfig, default: &'a str) -> &'a str {
    if cfg.file_prefix.is_empty() {
        default
    } else {
        &cfg.file_prefix
    }
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| Error::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Line written once when the current file reaches its size limit.
pub fn overflow_notice(max_file_size: u64) -> String {
    format!(
        "{}log file exceeded the maximum size allowed for the current hour: {} bytes{}\n",
        Color::Purple.escape(),
        max_file_size,
        COLOR_RESET
    )
}
