//! Request coalescing, keyed by an arbitrary fingerprint: fans one
//! in-flight execution out to every caller that asks for the same key
//! while it is running (spec §4.E).
//!
//! Grounded on `MultiRequestContext.h`'s `ExecuteOrAssociate`/
//! `onRequestCompleted`/`onRequestCancelled` triad, with one deliberate
//! correction: the original removes the whole map entry as soon as *any*
//! subscriber cancels, which would silently drop the remaining
//! subscribers' callbacks when the underlying request later completes.
//! Here the entry is only removed once the *last* subscriber has gone
//! (exactly the contract spec.md §4.E states), matching how cancellation
//! token registration is composed in [`crate::context::cancellation`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::context::{CancellationContext, CancellationToken};

type Callback<R> = Box<dyn FnOnce(R) + Send>;

struct RequestState<R> {
    /// Token cancelling the underlying execution; set once `run_fn`
    /// returns (it is `None` for the brief window between inserting the
    /// skeleton entry and `run_fn`'s return).
    cancel: Option<CancellationToken>,
    callbacks: HashMap<Uuid, Callback<R>>,
}

/// Coalesces concurrent requests sharing the same key into one execution.
pub struct MultiRequestContext<R: Clone + Send + 'static> {
    active: Arc<Mutex<HashMap<String, RequestState<R>>>>,
}

impl<R: Clone + Send + 'static> Default for MultiRequestContext<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone + Send + 'static> MultiRequestContext<R> {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// If no request is in-flight for `key`, calls `run_fn(finish)` — `run_fn`
    /// must kick off the work and return a [`CancellationToken`] for it;
    /// `finish` must be called exactly once with the eventual result, and
    /// is broadcast to every caller associated with `key` at that point.
    /// If a request is already in-flight, `callback` is appended to its
    /// subscriber list instead of calling `run_fn` again.
    ///
    /// Returns a per-caller [`CancellationToken`]: cancelling it drops only
    /// this caller's `callback`; when the last subscriber cancels, the
    /// underlying execution is cancelled too.
    pub fn execute_or_associate(
        &self,
        key: impl Into<String>,
        run_fn: impl FnOnce(Callback<R>) -> CancellationToken,
        callback: impl FnOnce(R) + Send + 'static,
        cancelled_response: R,
    ) -> CancellationToken {
        let key = key.into();
        let request_id = Uuid::new_v4();
        let mut is_new = false;

        {
            let mut active = self.active.lock();
            match active.get_mut(&key) {
                Some(state) => {
                    state.callbacks.insert(request_id, Box::new(callback));
                }
                None => {
                    let mut callbacks: HashMap<Uuid, Callback<R>> = HashMap::new();
                    callbacks.insert(request_id, Box::new(callback));
                    active.insert(
                        key.clone(),
                        RequestState {
                            cancel: None,
                            callbacks,
                        },
                    );
                    is_new = true;
                }
            }
        }

        if is_new {
            let active = Arc::clone(&self.active);
            let finish_key = key.clone();
            let finish: Callback<R> = Box::new(move |response: R| {
                let state = active.lock().remove(&finish_key);
                if let Some(state) = state {
                    tracing::trace!(key = %finish_key, subscribers = state.callbacks.len(), "multi-request completed");
                    for (_, cb) in state.callbacks {
                        cb(response.clone());
                    }
                }
            });

            let token = run_fn(finish);
            if let Some(state) = self.active.lock().get_mut(&key) {
                state.cancel = Some(token);
            }
        }

        let ctx = CancellationContext::new();
        let token = CancellationToken::new(ctx.clone());
        let active = Arc::clone(&self.active);
        ctx.execute_or_cancelled(
            |reg| {
                reg.register(move || {
                    on_subscriber_cancelled(active, key, request_id, cancelled_response);
                });
            },
            || {},
        );
        token
    }

    /// Number of distinct keys with an in-flight execution.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

fn on_subscriber_cancelled<R: Clone + Send + 'static>(
    active: Arc<Mutex<HashMap<String, RequestState<R>>>>,
    key: String,
    request_id: Uuid,
    cancelled_response: R,
) {
    let (callback, underlying_to_cancel) = {
        let mut active = active.lock();
        match active.get_mut(&key) {
            Some(state) => {
                let callback = state.callbacks.remove(&request_id);
                if state.callbacks.is_empty() {
                    let token = active.remove(&key).and_then(|mut s| s.cancel.take());
                    (callback, token)
                } else {
                    (callback, None)
                }
            }
            None => (None, None),
        }
    };

    if let Some(token) = underlying_to_cancel {
        token.cancel();
    }
    if let Some(callback) = callback {
        callback(cancelled_response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn second_associate_joins_existing_request_instead_of_rerunning() {
        let mrc: MultiRequestContext<i32> = MultiRequestContext::new();
        let run_count = Arc::new(Mutex::new(0));
        let (tx1, rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();

        let pending: Arc<Mutex<Option<Callback<i32>>>> = Arc::new(Mutex::new(None));
        let pending2 = Arc::clone(&pending);
        let run_count2 = Arc::clone(&run_count);

        let _t1 = mrc.execute_or_associate(
            "k",
            move |finish| {
                *run_count2.lock() += 1;
                *pending2.lock() = Some(finish);
                CancellationToken::new(CancellationContext::new())
            },
            move |r| tx1.send(r).unwrap(),
            -1,
        );

        let _t2 = mrc.execute_or_associate(
            "k",
            |_finish| panic!("run_fn must not be called twice for the same key"),
            move |r| tx2.send(r).unwrap(),
            -1,
        );

        assert_eq!(*run_count.lock(), 1);
        let finish = pending.lock().take().unwrap();
        finish(7);

        assert_eq!(rx1.recv().unwrap(), 7);
        assert_eq!(rx2.recv().unwrap(), 7);
        assert_eq!(mrc.active_count(), 0);
    }

    #[test]
    fn cancelling_one_of_two_subscribers_only_drops_its_own_callback() {
        let mrc: MultiRequestContext<i32> = MultiRequestContext::new();
        let underlying_ctx = CancellationContext::new();
        let underlying_token = CancellationToken::new(underlying_ctx.clone());
        let (tx1, rx1) = mpsc::channel::<i32>();
        let (tx2, rx2) = mpsc::channel::<i32>();

        let pending: Arc<Mutex<Option<Callback<i32>>>> = Arc::new(Mutex::new(None));
        let pending2 = Arc::clone(&pending);

        let token1 = mrc.execute_or_associate(
            "k",
            move |finish| {
                *pending2.lock() = Some(finish);
                underlying_token
            },
            move |r| tx1.send(r).unwrap(),
            -1,
        );
        let _token2 = mrc.execute_or_associate(
            "k",
            |_finish| panic!("should join existing"),
            move |r| tx2.send(r).unwrap(),
            -1,
        );

        token1.cancel();
        assert_eq!(rx1.recv().unwrap(), -1);
        assert!(!underlying_ctx.is_cancelled(), "not the last subscriber, underlying must keep running");

        let finish = pending.lock().take().unwrap();
        finish(99);
        assert_eq!(rx2.recv().unwrap(), 99);
    }

    #[test]
    fn cancelling_last_subscriber_cancels_underlying_execution() {
        let mrc: MultiRequestContext<i32> = MultiRequestContext::new();
        let underlying_ctx = CancellationContext::new();
        let underlying_token = CancellationToken::new(underlying_ctx.clone());
        let (tx, rx) = mpsc::channel::<i32>();

        let token = mrc.execute_or_associate(
            "k",
            move |_finish| underlying_token,
            move |r| tx.send(r).unwrap(),
            -1,
        );

        token.cancel();
        assert_eq!(rx.recv().unwrap(), -1);
        assert!(underlying_ctx.is_cancelled());
        assert_eq!(mrc.active_count(), 0);
    }
}
