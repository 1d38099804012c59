use crate::cancel::CancelToken;

use std::cmp::Ordering as CmpOrdering;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::{Condvar, Mutex};

/// Upper bound on a single consumer park, so cancellation is observed
/// promptly even when the next deadline is far away (or absent).
const MAX_PARK: Duration = Duration::from_millis(100);

/// A deadline-ordered multiset of keys with at most one live deadline per
/// key.
///
/// Producers arm keys with [`DeadlineQueue::push`] (a re-push supersedes the
/// previous deadline regardless of ordering) and disarm them with
/// [`DeadlineQueue::remove`]. A single consumer drains fired keys with
/// [`DeadlineQueue::next_fired`], which yields them in non-decreasing
/// deadline order.
///
/// Internally a binary min-heap ordered by `(fire_at, seq)` plus a key → seq
/// side index. Superseded and removed keys leave stale heap nodes behind;
/// those are discarded when they surface, which keeps `push` and `remove`
/// amortized sub-linear.
pub(crate) struct DeadlineQueue<K> {
  inner: Mutex<Inner<K>>,
  cv: Condvar,
}

struct Inner<K> {
  heap: BinaryHeap<Reverse<Scheduled<K>>>,
  live: HashMap<K, u64, RandomState>,
  next_seq: u64,
}

struct Scheduled<K> {
  fire_at: Instant,
  seq: u64,
  key: K,
}

// Ordering deliberately ignores the key: the heap ranks by deadline, with the
// arming sequence breaking ties.
impl<K> Ord for Scheduled<K> {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    self
      .fire_at
      .cmp(&other.fire_at)
      .then(self.seq.cmp(&other.seq))
  }
}

impl<K> PartialOrd for Scheduled<K> {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl<K> PartialEq for Scheduled<K> {
  fn eq(&self, other: &Self) -> bool {
    self.fire_at == other.fire_at && self.seq == other.seq
  }
}

impl<K> Eq for Scheduled<K> {}

impl<K: Eq + Hash + Clone> DeadlineQueue<K> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        heap: BinaryHeap::new(),
        live: HashMap::with_hasher(RandomState::new()),
        next_seq: 0,
      }),
      cv: Condvar::new(),
    }
  }

  /// Arms (or re-arms) `key` to fire `after` from now.
  pub(crate) fn push(&self, key: K, after: Duration) {
    let fire_at = Instant::now() + after;

    let mut inner = self.inner.lock();
    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.live.insert(key.clone(), seq);

    let new_front = inner
      .heap
      .peek()
      .map_or(true, |Reverse(top)| fire_at < top.fire_at);
    inner.heap.push(Reverse(Scheduled { fire_at, seq, key }));
    drop(inner);

    if new_front {
      self.cv.notify_one();
    }
  }

  /// Disarms any pending deadline for `key`. No-op when absent.
  pub(crate) fn remove(&self, key: &K) {
    // The heap node goes stale and is discarded when it surfaces.
    self.inner.lock().live.remove(key);
  }

  /// Blocks until some key's deadline elapses and returns it, or returns
  /// `None` once `cancel` is signalled.
  pub(crate) fn next_fired(&self, cancel: &CancelToken) -> Option<K> {
    let mut inner = self.inner.lock();
    loop {
      if cancel.is_cancelled() {
        return None;
      }

      let now = Instant::now();
      match inner.heap.peek().map(|Reverse(top)| top.fire_at) {
        Some(fire_at) if fire_at <= now => {
          if let Some(Reverse(due)) = inner.heap.pop() {
            // Stale nodes carry a superseded seq (or none at all).
            if inner.live.get(&due.key) == Some(&due.seq) {
              inner.live.remove(&due.key);
              return Some(due.key);
            }
          }
        }
        Some(fire_at) => {
          self.cv.wait_until(&mut inner, fire_at.min(now + MAX_PARK));
        }
        None => {
          self.cv.wait_until(&mut inner, now + MAX_PARK);
        }
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn pending(&self) -> usize {
    self.inner.lock().live.len()
  }
}
