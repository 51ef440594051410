//! Time source for the poll loops.
//!
//! Every wait in dumpwatch is a sleep-poll loop on the calling thread.
//! Routing the sleeps through [`Clock`] keeps the wait budgets exact while
//! letting tests run them on virtual time.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time and interruptible sleep.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Sleeps for `duration`.
    ///
    /// Returns `false` if the sleep was cut short by cancellation; poll
    /// loops stop waiting when that happens.
    fn sleep(&self, duration: Duration) -> bool;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> bool {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> bool {
        (**self).sleep(duration)
    }
}

/// Shared flag that wakes every [`SystemClock`] sleeping on it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Cancelled flag and the condition variable sleepers wait on.
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Creates an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels all current and future waits on this token.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for up to `timeout`. Returns `true` if cancelled.
    fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Wall-clock [`Clock`] whose sleeps can be interrupted by a [`CancelToken`].
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    /// Token that interrupts sleeps.
    cancel: CancelToken,
}

impl SystemClock {
    /// Clock that is never cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose sleeps end early once `cancel` fires.
    pub const fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// The token interrupting this clock.
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> bool {
        !self.cancel.wait(duration)
    }
}
