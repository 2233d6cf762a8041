//! Cancellation-aware execution context shared by a queue and its ops
//!
//! A [`Context`] is cancelled exactly once. Cancellation is observable in two ways:
//! - cheaply, through [`Context::is_cancelled`]
//! - as a channel that becomes ready, through [`Context::done`], so it can take part
//!   in a `crossbeam::channel::select!` next to other channels

use crossbeam::channel::{self, Receiver, Sender, after, select};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cloneable handle to a shared cancellation signal
///
/// Clones observe the same signal. The `done` receiver never yields a value: it
/// disconnects when the trigger side is dropped by [`Context::cancel`].
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl Context {
    /// Create a fresh, not yet cancelled context
    pub fn new() -> Self {
        let (trigger, done) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                done,
            }),
        }
    }

    /// A context that is never cancelled
    ///
    /// Used when work runs inline on the caller's thread with no queue behind it.
    pub fn background() -> Self {
        Self::new()
    }

    /// Signal cancellation. Further calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(trigger);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Channel that becomes ready (disconnected) once the context is cancelled
    pub fn done(&self) -> Receiver<()> {
        self.inner.done.clone()
    }

    /// Sleep for `duration`, waking early on cancellation
    ///
    /// Returns `true` when the full duration elapsed and `false` when the context
    /// was cancelled first.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        select! {
            recv(self.inner.done) -> _ => false,
            recv(after(duration)) -> _ => true,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
