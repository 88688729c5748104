//! Ambient logging context: the `tracing` span a task was submitted under,
//! captured at submission time and restored on the worker thread that
//! eventually runs it (spec §4.D, "captures the ambient logging context at
//! submission time and restores it during execution").

use tracing::Span;

/// A snapshot of the caller's current `tracing` span, cheap to clone (spans
/// are themselves reference-counted) and safe to move across threads.
///
/// Grounded on the parent/child propagation shape of the teacher's
/// `SpanContext`, but built directly on `tracing::Span` rather than a
/// hand-rolled trace/span id pair, since structured logging here is an
/// ambient concern the crate satisfies via `tracing` throughout.
#[derive(Debug, Clone)]
pub struct LoggingContext {
    span: Span,
}

impl LoggingContext {
    /// Capture the span that is current when this is called. Call this at
    /// submission time, before handing the task to a worker thread.
    pub fn capture() -> Self {
        Self {
            span: Span::current(),
        }
    }

    /// A context explicitly wrapping `span`, for call sites that already
    /// hold the span they want propagated (e.g. a layer client entering a
    /// named span per public call).
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// Run `f` with this context's span entered, restoring the previous
    /// span on return. Call this on the worker thread right before running
    /// the task.
    pub fn restore<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.span.enter();
        f()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for LoggingContext {
    fn default() -> Self {
        Self {
            span: Span::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn restore_runs_closure_inside_captured_span() {
        let span = tracing::info_span!("test-span", request_id = "abc");
        let ctx = LoggingContext::new(span.clone());
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        ctx.restore(|| {
            ran2.store(true, Ordering::SeqCst);
            assert_eq!(Span::current().id(), span.id());
        });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn default_context_is_a_disabled_span() {
        let ctx = LoggingContext::default();
        assert!(ctx.span().is_disabled());
    }
}
