use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable cancellation token shared by a cache and its background tasks.
///
/// The token starts live; `cancel` flips it permanently. Every clone observes
/// the same state, so one token can stop any number of caches constructed
/// with it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
  inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  cancelled: AtomicBool,
  lock: Mutex<()>,
  cv: Condvar,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Signals cancellation and wakes every task currently parked on the token.
  pub fn cancel(&self) {
    self.inner.cancelled.store(true, Ordering::SeqCst);
    // Taking the lock orders the store before any waiter's flag re-check.
    drop(self.inner.lock.lock());
    self.inner.cv.notify_all();
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool {
    self.inner.cancelled.load(Ordering::SeqCst)
  }

  /// Parks the caller for up to `timeout`, returning early when cancelled.
  /// Returns `true` once the token is cancelled.
  pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut guard = self.inner.lock.lock();
    while !self.is_cancelled() {
      if self.inner.cv.wait_until(&mut guard, deadline).timed_out() {
        break;
      }
    }
    self.is_cancelled()
  }
}
