//! # Cancellation Token
//!
//! Purpose: Let a caller abandon an in-progress call from another thread or
//! task, for blocking and async callers alike.
//!
//! ## Design Principles
//! 1. **One Flag, Two Wakeups**: Async waiters park on a `Notify`; blocking
//!    waiters register a hook that runs on cancel (e.g. shutting a socket down).
//! 2. **Sticky**: Once cancelled, a token stays cancelled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Hooks {
    next_id: u64,
    entries: Vec<(u64, Hook)>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    hooks: Mutex<Hooks>,
}

/// Cloneable handle; cancelling any clone cancels them all.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Cancels the token, waking every waiter and running every registered hook.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            // Hooks run under the lock so a dropped guard never returns while
            // its hook is still running.
            let mut hooks = self.inner.hooks.lock().expect("cancel mutex poisoned");
            for (_, hook) in hooks.entries.drain(..) {
                hook();
            }
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Runs `hook` when the token is cancelled, or right away if it already is.
    ///
    /// Dropping the returned guard unregisters the hook; if the hook is
    /// running at that moment, the drop waits for it to finish. Hooks must
    /// not touch the token themselves.
    pub(crate) fn on_cancel<F>(&self, hook: F) -> CancelGuard
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock().expect("cancel mutex poisoned");
        if self.is_cancelled() {
            drop(hooks);
            hook();
            return CancelGuard { inner: None, id: 0 };
        }
        let id = hooks.next_id;
        hooks.next_id += 1;
        hooks.entries.push((id, Box::new(hook)));
        CancelGuard {
            inner: Some(self.inner.clone()),
            id,
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registration handle returned by `on_cancel`.
pub(crate) struct CancelGuard {
    inner: Option<Arc<Inner>>,
    id: u64,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut hooks = inner.hooks.lock().expect("cancel mutex poisoned");
            hooks.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Waits for `token`, or forever when there is none.
pub(crate) async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

pub(crate) fn is_cancelled(token: Option<&CancellationToken>) -> bool {
    token.map_or(false, CancellationToken::is_cancelled)
}
