//! Shared cancellation signal.
//!
//! [`CancelSignal`] is the only primitive shared between the capture thread
//! and the dispatch task. Both poll it cooperatively; nothing is ever
//! terminated forcibly. The capture thread also sleeps on it during backoff
//! so a cancel wakes it immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// A cloneable, one-shot cancellation flag.
///
/// Once cancelled it stays cancelled.
///
/// # Example
///
/// ```
/// use spl_meter::CancelSignal;
/// use std::time::Duration;
///
/// let cancel = CancelSignal::new();
/// let observer = cancel.clone();
///
/// cancel.cancel();
/// assert!(observer.is_cancelled());
/// assert!(observer.wait_timeout(Duration::from_secs(5)));
/// ```
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    /// Creates a new, un-cancelled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every waiter.
    pub fn cancel(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread for up to `timeout`, returning early if the
    /// signal is raised.
    ///
    /// Returns `true` if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }

    /// Resolves once the signal is raised, checking every `poll`.
    ///
    /// For async code that must give up on a pending operation at shutdown.
    pub async fn cancelled(&self, poll: Duration) {
        while !self.is_cancelled() {
            tokio::time::sleep(poll).await;
        }
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
