//! Cooperative cancellation shared by the capture and analysis roles

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Waker = Box<dyn Fn() + Send + Sync>;

/// Stop indicator shared by every role of a pipeline.
///
/// Tripping the token wakes any [`StopToken::sleep`] in progress and runs every
/// registered waker, so blocking waits elsewhere (the sample exchange) can
/// observe the stop without waiting for their own predicate.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    sleep_lock: Mutex<()>,
    sleep_cond: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stop indicator has been tripped
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Trip the indicator. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let _guard = self.inner.sleep_lock.lock();
            self.inner.sleep_cond.notify_all();
        }

        let wakers = self.inner.wakers.lock();
        for wake in wakers.iter() {
            wake();
        }
    }

    /// Register a callback run once when the token is tripped.
    ///
    /// Runs immediately if the token is already stopped. The callback must not
    /// call back into this token.
    pub fn on_stop<F>(&self, wake: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut wakers = self.inner.wakers.lock();
        if self.is_stopped() {
            drop(wakers);
            wake();
            return;
        }
        wakers.push(Box::new(wake));
    }

    /// Sleep for `duration` unless the token is tripped first.
    ///
    /// Returns `true` if the full interval elapsed, `false` if woken by a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.sleep_lock.lock();
        while !self.is_stopped() {
            if self
                .inner
                .sleep_cond
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return !self.is_stopped();
            }
        }
        false
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
