use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Local;

use crate::caller::{Caller, CallerResolver};
use crate::config::ConfigSource;
use crate::error::{Error, Result};
use crate::level::{Color, Level};
use crate::record::LogRecord;
use crate::trace;

/// Line encodings. Only the text layout exists; other names are rejected
/// when the formatter is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(OutputFormat::Text),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Renders log calls into text lines.
///
/// Cloning is cheap; the caller cache and config source are shared.
#[derive(Clone)]
pub struct LineFormatter {
    module: String,
    skip_call: usize,
    format: OutputFormat,
    disable_color: bool,
    cache_caller: bool,
    resolver: Arc<CallerResolver>,
    config: Arc<dyn ConfigSource>,
}

impl fmt::Debug for LineFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineFormatter")
            .field("module", &self.module)
            .field("skip_call", &self.skip_call)
            .field("format", &self.format)
            .field("disable_color", &self.disable_color)
            .field("cache_caller", &self.cache_caller)
            .finish()
    }
}

impl LineFormatter {
    /// `skip_call` counts frames above the function that calls
    /// [`LineFormatter::format`]; `0` attributes lines to that function.
    pub fn new(
        module: impl Into<String>,
        skip_call: usize,
        format: &str,
        config: Arc<dyn ConfigSource>,
    ) -> Result<Self> {
        Ok(Self {
            module: module.into(),
            skip_call,
            format: format.parse()?,
            disable_color: false,
            cache_caller: true,
            resolver: Arc::new(CallerResolver::new()),
            config,
        })
    }

    pub fn with_color_disabled(mut self, disabled: bool) -> Self {
        self.disable_color = disabled;
        self
    }

    pub fn with_caller_cache(mut self, enabled: bool) -> Self {
        self.cache_caller = enabled;
        self
    }

    /// Copy of this formatter resolving callers at a different depth.
    pub fn with_skip_call(&self, skip_call: usize) -> Self {
        let mut copy = self.clone();
        copy.skip_call = skip_call;
        copy
    }

    pub fn skip_call(&self) -> usize {
        self.skip_call
    }

    pub fn caches_caller(&self) -> bool {
        self.cache_caller
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Format one call into a line, resolving the caller from the stack at
    /// the formatter's own skip depth.
    #[inline(never)]
    pub fn format(&self, level: Level, color: Option<Color>, template: &str, args: &[&dyn fmt::Display]) -> Result<String> {
        self.format_at(self.skip_call + 1, self.cache_caller, level, color, template, args)
    }

    /// Format one call, attributing it to the frame `skip` levels above the
    /// function calling `format_at`.
    #[inline(never)]
    pub fn format_at(
        &self,
        skip: usize,
        use_cache: bool,
        level: Level,
        color: Option<Color>,
        template: &str,
        args: &[&dyn fmt::Display],
    ) -> Result<String> {
        let caller = self.resolver.resolve(skip + 1, use_cache);
        self.format_with_caller(level, color, caller, template, args)
    }

    /// Format one call with an already known caller.
    pub fn format_with_caller(
        &self,
        level: Level,
        color: Option<Color>,
        caller: Arc<Caller>,
        template: &str,
        args: &[&dyn fmt::Display],
    ) -> Result<String> {
        let rendered = render_message(template, args);
        let escaped = escape_controls(&rendered);
        let limit = self.config.snapshot().msg_max_len(level);
        let message = truncate_chars(&escaped, limit).into_owned();

        let record = LogRecord {
            timestamp: Local::now(),
            level,
            module: self.module.clone(),
            trace: trace::current(),
            caller,
            message,
        };

        let color = if self.disable_color { None } else { color };
        match self.format {
            OutputFormat::Text => Ok(record.render(color)),
        }
    }
}

/// Substitute each `{}` in `template` with the next argument.
///
/// `{{` and `}}` produce literal braces. Without arguments, or when the
/// placeholder count does not match the argument count, the template is
/// returned unchanged.
pub fn render_message(template: &str, args: &[&dyn fmt::Display]) -> String {
    if args.is_empty() {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len() + 16 * args.len());
    let mut next = args.iter();
    let mut chars = template.chars().peekable();
    let mut used = 0usize;

    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('{', Some('{')) | ('}', Some('}')) => {
                chars.next();
                out.push(c);
            }
            ('{', Some('}')) => {
                chars.next();
                match next.next() {
                    Some(arg) => {
                        let _ = write!(out, "{arg}");
                        used += 1;
                    }
                    None => return template.to_string(),
                }
            }
            _ => out.push(c),
        }
    }

    if used != args.len() {
        return template.to_string();
    }
    out
}

/// Replace line-breaking control characters with visible escapes so one
/// record always occupies exactly one line.
pub fn escape_controls(input: &str) -> Cow<'_, str> {
    if !input.chars().any(char::is_control) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Cut `input` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_chars(input: &str, limit: Option<usize>) -> Cow<'_, str> {
    let Some(limit) = limit.filter(|l| *l > 0) else {
        return Cow::Borrowed(input);
    };
    match input.char_indices().nth(limit) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &input[..cut])),
        None => Cow::Borrowed(input),
    }
}
