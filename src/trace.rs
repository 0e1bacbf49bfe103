//! Per-thread correlation id rendered into the `[trace]` field of each line.
//!
//! The id is thread-local: async code that hops threads across `.await`
//! points should set it again inside the task, or use [`scope`] around
//! synchronous sections.

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

/// Correlation id of the calling thread, if one is set.
pub fn current() -> Option<Arc<str>> {
    CURRENT.with(|cur| cur.borrow().clone())
}

/// Set the calling thread's correlation id until the guard is dropped.
pub fn enter(id: impl Into<Arc<str>>) -> TraceGuard {
    let previous = CURRENT.with(|cur| cur.borrow_mut().replace(id.into()));
    TraceGuard { previous }
}

/// Run `f` with `id` as the correlation id.
pub fn scope<R>(id: impl Into<Arc<str>>, f: impl FnOnce() -> R) -> R {
    let _guard = enter(id);
    f()
}

/// Restores the previous correlation id on drop.
#[must_use = "the trace id is cleared as soon as the guard is dropped"]
pub struct TraceGuard {
    previous: Option<Arc<str>>,
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cur| *cur.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_restore() {
        assert!(current().is_none());
        {
            let _outer = enter("outer");
            assert_eq!(current().as_deref(), Some("outer"));
            scope("inner", || assert_eq!(current().as_deref(), Some("inner")));
            assert_eq!(current().as_deref(), Some("outer"));
        }
        assert!(current().is_none());
    }

    #[test]
    fn ids_do_not_leak_across_threads() {
        let _guard = enter("main");
        std::thread::spawn(|| assert!(current().is_none()))
            .join()
            .unwrap();
    }
}
