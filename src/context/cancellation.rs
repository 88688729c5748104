//! Cooperative cancellation, composed across parent/child contexts and
//! async suspension points (spec §4.A).

use std::sync::Arc;

use parking_lot::Mutex;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    cancelled: bool,
    /// The most recently registered cleanup, invoked exactly once when a
    /// cancellation request arrives (or immediately, if one already has).
    pending_cleanup: Option<Cleanup>,
}

/// A cancellation signal shared between a context and the tokens handed out
/// to callers who register interest in it.
///
/// Cloning a [`CancellationContext`] shares the same underlying signal —
/// it is a handle, not a copy. Use [`CancellationContext::child`] to derive
/// an independently-cancellable context that still observes the parent's
/// cancellation.
#[derive(Clone)]
pub struct CancellationContext {
    inner: Arc<Mutex<Inner>>,
    /// Present on a child context: whether the parent has been cancelled
    /// is folded into `is_cancelled` without the child needing to poll it.
    parent: Option<Arc<Mutex<Inner>>>,
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cancelled: false,
                pending_cleanup: None,
            })),
            parent: None,
        }
    }

    /// A child context that inherits cancellation from `self`: cancelling
    /// the parent observably cancels the child, but cancelling the child
    /// does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cancelled: false,
                pending_cleanup: None,
            })),
            parent: Some(Arc::clone(&self.inner)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if let Some(parent) = &self.parent {
            if parent.lock().cancelled {
                return true;
            }
        }
        self.inner.lock().cancelled
    }

    /// Idempotent. Runs the most recently registered cleanup exactly once;
    /// any registration arriving afterwards short-circuits straight to the
    /// cancel branch (see [`CancellationContext::execute_or_cancelled`]).
    pub fn cancel(&self) {
        let cleanup = {
            let mut guard = self.inner.lock();
            if guard.cancelled {
                return;
            }
            guard.cancelled = true;
            guard.pending_cleanup.take()
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// If not already cancelled, runs `op` with a registration handle the
    /// operation may use to install a cleanup; otherwise runs `on_cancel`
    /// directly. Registration and cancellation are atomic with respect to
    /// each other: a `cancel()` racing with `op`'s registration either
    /// completes before `op` registers (so `op` finds itself already
    /// cancelled and the caller should treat its own returned value as
    /// moot) or after (so the cleanup fires exactly once, from `cancel`).
    pub fn execute_or_cancelled<T>(
        &self,
        op: impl FnOnce(&CancellationRegistration) -> T,
        on_cancel: impl FnOnce() -> T,
    ) -> T {
        if self.is_cancelled() {
            return on_cancel();
        }
        let registration = CancellationRegistration { ctx: self.clone() };
        op(&registration)
    }
}

/// Handle passed into the `op` closure of
/// [`CancellationContext::execute_or_cancelled`], used to register a
/// cleanup to run if cancellation arrives later.
pub struct CancellationRegistration {
    ctx: CancellationContext,
}

impl CancellationRegistration {
    /// Install `cleanup` as the context's pending cleanup. If the context
    /// is cancelled concurrently with this call, `cleanup` runs immediately
    /// (exactly once) instead of being stored.
    pub fn register(&self, cleanup: impl FnOnce() + Send + 'static) {
        let mut guard = self.ctx.inner.lock();
        if guard.cancelled {
            drop(guard);
            cleanup();
        } else {
            guard.pending_cleanup = Some(Box::new(cleanup));
        }
    }
}

/// A lightweight handle returned to callers who need only to cancel (not
/// observe or register against) a [`CancellationContext`] — e.g. the token
/// returned by `TaskSink::submit` or `MultiRequestContext::execute_or_associate`.
#[derive(Clone)]
pub struct CancellationToken {
    ctx: CancellationContext,
}

impl CancellationToken {
    pub fn new(ctx: CancellationContext) -> Self {
        Self { ctx }
    }

    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn cancel_is_idempotent_and_runs_cleanup_once() {
        let ctx = CancellationContext::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        ctx.execute_or_cancelled(
            |reg| {
                reg.register(move || {
                    ran2.store(true, Ordering::SeqCst);
                });
            },
            || panic!("should not be cancelled yet"),
        );

        ctx.cancel();
        ctx.cancel();
        assert!(ran.load(Ordering::SeqCst));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn registering_after_cancel_runs_cleanup_immediately() {
        let ctx = CancellationContext::new();
        ctx.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        let result = ctx.execute_or_cancelled(
            |_reg| unreachable!("context already cancelled"),
            || {
                ran2.store(true, Ordering::SeqCst);
                42
            },
        );
        assert_eq!(result, 42);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn child_observes_parent_cancellation() {
        let parent = CancellationContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_child_does_not_affect_parent() {
        let parent = CancellationContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn token_cancels_underlying_context() {
        let ctx = CancellationContext::new();
        let token = CancellationToken::new(ctx.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(token.is_cancelled());
    }
}
