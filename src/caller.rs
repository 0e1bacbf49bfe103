//! Source location lookup for log call sites.
//!
//! Resolution walks the native stack with the `backtrace` crate and
//! symbolizes the selected frame. Symbolizing is the expensive part, so the
//! resolver can cache results keyed by the frame's instruction pointer. The
//! cache is never evicted; its size is bounded by the number of distinct
//! call sites, not by call volume.
//!
//! Skip depths count physical frames. Call sites that the optimizer inlines
//! into their caller collapse into one frame, so wrappers that must be
//! skipped reliably should be `#[inline(never)]`.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Resolved source location of a log call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub function: String,
    /// Final path segment of the source file.
    pub file: String,
    pub line: u32,
}

impl Caller {
    pub fn new(function: impl Into<String>, file: &str, line: u32) -> Self {
        Self {
            function: function.into(),
            file: trim_file(file).to_string(),
            line,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.function.is_empty() && self.file.is_empty() && self.line == 0
    }
}

/// Resolves call sites, optionally memoizing per instruction pointer.
#[derive(Debug, Default)]
pub struct CallerResolver {
    cache: RwLock<HashMap<usize, Arc<Caller>>>,
}

impl CallerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the frame `skip` levels above the function calling `resolve`.
    ///
    /// `skip == 0` is the direct caller. An empty [`Caller`] is returned when
    /// the stack cannot be walked or symbolized.
    #[inline(never)]
    pub fn resolve(&self, skip: usize, use_cache: bool) -> Arc<Caller> {
        let anchor = (Self::resolve as fn(&Self, usize, bool) -> Arc<Caller>) as usize;

        let ip = locate(skip, |frame| frame.symbol_address() as usize == anchor).or_else(|| {
            // Some unwinders cannot report function start addresses; fall
            // back to matching on the symbol name.
            locate(skip, |frame| {
                let mut hit = false;
                backtrace::resolve_frame(frame, |symbol| {
                    if let Some(name) = symbol.name() {
                        hit |= format!("{name:#}").ends_with("CallerResolver::resolve");
                    }
                });
                hit
            })
        });

        let Some(ip) = ip else {
            return Arc::new(Caller::default());
        };
        let key = ip as usize;

        if use_cache {
            if let Some(hit) = self.cache.read().get(&key) {
                return Arc::clone(hit);
            }
        }

        let caller = Arc::new(symbolize(ip));
        if use_cache {
            self.cache.write().entry(key).or_insert_with(|| Arc::clone(&caller));
        }
        caller
    }

    /// Number of call sites currently memoized.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

/// Walk the stack until `is_anchor` matches, then return the instruction
/// pointer `skip + 1` frames further out.
fn locate(skip: usize, mut is_anchor: impl FnMut(&backtrace::Frame) -> bool) -> Option<*mut c_void> {
    let mut anchored = false;
    let mut remaining = skip;
    let mut found = None;

    backtrace::trace(|frame| {
        if !anchored {
            anchored = is_anchor(frame);
            return true;
        }
        if remaining == 0 {
            found = Some(frame.ip());
            return false;
        }
        remaining -= 1;
        true
    });

    found
}

fn symbolize(ip: *mut c_void) -> Caller {
    let mut caller = None;
    backtrace::resolve(ip, |symbol| {
        // Inlined frames report the innermost function first.
        if caller.is_some() {
            return;
        }
        caller = Some(Caller {
            function: symbol.name().map(|n| format!("{n:#}")).unwrap_or_default(),
            file: symbol
                .filename()
                .map(|p| trim_file(&p.to_string_lossy()).to_string())
                .unwrap_or_default(),
            line: symbol.lineno().unwrap_or_default(),
        });
    });
    caller.unwrap_or_default()
}

fn trim_file(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_last_path_segment() {
        assert_eq!(trim_file("/a/b/c/writer.rs"), "writer.rs");
        assert_eq!(trim_file("writer.rs"), "writer.rs");
        assert_eq!(Caller::new("f", "src/x/y.rs", 3).file, "y.rs");
    }

    #[test]
    fn repeated_call_site_is_cached_once() {
        let resolver = CallerResolver::new();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(resolver.resolve(0, true));
        }

        assert!(resolver.cached_len() <= 1);
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn disabled_cache_stays_empty() {
        let resolver = CallerResolver::new();
        for _ in 0..3 {
            let _ = resolver.resolve(0, false);
        }
        assert_eq!(resolver.cached_len(), 0);
    }

    #[test]
    fn resolves_the_calling_function_when_symbols_exist() {
        let resolver = CallerResolver::new();
        let caller = resolver.resolve(0, false);

        if !caller.file.is_empty() {
            assert_eq!(caller.file, "caller.rs");
            assert!(caller.function.contains("resolves_the_calling_function"));
            assert!(caller.line > 0);
        }
    }
}
