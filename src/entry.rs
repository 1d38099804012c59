use crate::error::{is_not_found, LoadError};
use crate::time;
use crate::timeouts::Timeouts;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

/// The per-key concurrency cell.
///
/// Readers touch only the atomics and the value slot; loader invocations for
/// the key serialize on [`CachedEntry::lock`]. The slot holds `None` both
/// before the first load completes and after a not-found load (negative
/// caching); readers cannot tell the two apart.
pub(crate) struct CachedEntry<V> {
  /// Epoch-millis deadline after which a read must trigger a reload.
  next_reload: AtomicI64,
  /// Whether the value was read since the last (re)load.
  accessed: AtomicBool,
  /// Critical section is a pointer clone or swap only; the loader never runs
  /// under it.
  value: RwLock<Option<Arc<V>>>,
  /// Serializes loader invocations for this key.
  pub(crate) lock: Mutex<()>,
}

impl<V> CachedEntry<V> {
  pub(crate) fn new() -> Self {
    Self {
      next_reload: AtomicI64::new(0),
      accessed: AtomicBool::new(false),
      value: RwLock::new(None),
      lock: Mutex::new(()),
    }
  }

  /// Applies a load outcome and returns the TTL the engine should arm, or
  /// `None` when the TTL watcher must be left untouched.
  ///
  /// Must be called while [`CachedEntry::lock`] is held (or before the entry
  /// is published). The value is stored before `next_reload`; the `Release`
  /// store here pairs with the `Acquire` load in
  /// [`CachedEntry::next_reload_millis`], so a reader that sees a fresh
  /// deadline also sees the matching (or newer) value.
  pub(crate) fn set(
    &self,
    outcome: Result<V, LoadError>,
    now_millis: i64,
    timeouts: &Timeouts,
    first_load: bool,
  ) -> Option<Duration> {
    let randomizer = timeouts.randomizer;

    let ttl = match outcome {
      Ok(value) => {
        *self.value.write() = Some(Arc::new(value));
        Some(time::randomize_duration(timeouts.ttl, randomizer))
      }
      Err(err) if is_not_found(&err) => {
        // Keep the authoritative absence in cache for the configured time.
        let mut slot = self.value.write();
        if slot.is_some() {
          *slot = None;
        }
        drop(slot);
        Some(time::randomize_duration(timeouts.not_found_ttl, randomizer))
      }
      Err(_) if first_load => Some(time::randomize_duration(timeouts.error_ttl, randomizer)),
      // A failed reload keeps serving whatever was cached before.
      Err(_) => None,
    };

    if self.accessed.load(Ordering::Relaxed) {
      self.accessed.store(false, Ordering::Relaxed);
    }
    let reload_after = time::randomize_duration(timeouts.reload_interval, randomizer);
    self
      .next_reload
      .store(now_millis + reload_after.as_millis() as i64, Ordering::Release);

    ttl
  }

  /// Lock-free read: marks the entry accessed and returns the current value
  /// snapshot.
  pub(crate) fn get(&self) -> Option<Arc<V>> {
    if !self.accessed.load(Ordering::Relaxed) {
      self.accessed.store(true, Ordering::Relaxed);
    }
    self.value.read().clone()
  }

  /// Value snapshot without the accessed side effect; used by the memory
  /// sampler so sampling does not count as a read.
  pub(crate) fn value_snapshot(&self) -> Option<Arc<V>> {
    self.value.read().clone()
  }

  #[inline]
  pub(crate) fn next_reload_millis(&self) -> i64 {
    self.next_reload.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn accessed(&self) -> bool {
    self.accessed.load(Ordering::Relaxed)
  }

  /// Marks the entry stale so the next read triggers a reload.
  pub(crate) fn invalidate(&self) {
    self.next_reload.store(0, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::NotFound;

  use std::thread;

  const NOW_MILLIS: i64 = 1_700_000_000;

  fn timeouts() -> Timeouts {
    Timeouts {
      ttl: Duration::from_secs(8),
      not_found_ttl: Duration::from_secs(5),
      error_ttl: Duration::from_secs(1),
      reload_interval: Duration::from_secs(3),
      randomizer: 0.0,
      memsize_update: Duration::ZERO,
    }
  }

  fn expected_next_reload(timeouts: &Timeouts) -> i64 {
    NOW_MILLIS + timeouts.reload_interval.as_millis() as i64
  }

  struct Case {
    outcome: Result<String, LoadError>,
    expected_ttl: Option<Duration>,
    expected_value: Option<&'static str>,
  }

  fn check(entry: &CachedEntry<String>, case: Case, first_load: bool, name: &str) {
    let timeouts = timeouts();
    let ttl = entry.set(case.outcome, NOW_MILLIS, &timeouts, first_load);

    assert_eq!(ttl, case.expected_ttl, "{name}: incorrect ttl");
    assert_eq!(
      entry.value_snapshot().as_deref().map(String::as_str),
      case.expected_value,
      "{name}: incorrect value"
    );
    assert_eq!(
      entry.next_reload_millis(),
      expected_next_reload(&timeouts),
      "{name}: incorrect next reload"
    );
    assert!(!entry.accessed(), "{name}: accessed must be cleared");
  }

  #[test]
  fn set_first_load() {
    let timeouts = timeouts();
    let cases = [
      (
        "generic_error",
        Case {
          outcome: Err("other error".into()),
          expected_ttl: Some(timeouts.error_ttl),
          expected_value: None,
        },
      ),
      (
        "not_found",
        Case {
          outcome: Err(NotFound.into()),
          expected_ttl: Some(timeouts.not_found_ttl),
          expected_value: None,
        },
      ),
      (
        "success",
        Case {
          outcome: Ok("value1".to_string()),
          expected_ttl: Some(timeouts.ttl),
          expected_value: Some("value1"),
        },
      ),
    ];

    for (name, case) in cases {
      let entry = CachedEntry::new();
      check(&entry, case, true, name);
    }
  }

  #[test]
  fn set_reload_after_error() {
    let timeouts = timeouts();
    let cases = [
      (
        "generic_error",
        Case {
          outcome: Err("other error".into()),
          expected_ttl: None,
          expected_value: None,
        },
      ),
      (
        "not_found",
        Case {
          outcome: Err(NotFound.into()),
          expected_ttl: Some(timeouts.not_found_ttl),
          expected_value: None,
        },
      ),
      (
        "success",
        Case {
          outcome: Ok("value1".to_string()),
          expected_ttl: Some(timeouts.ttl),
          expected_value: Some("value1"),
        },
      ),
    ];

    for (name, case) in cases {
      // Entry whose first load failed half a second earlier.
      let entry = CachedEntry::new();
      entry.set(Err("other error".into()), NOW_MILLIS - 500, &timeouts, true);
      entry.get();
      check(&entry, case, false, name);
    }
  }

  #[test]
  fn set_reload_after_not_found() {
    let timeouts = timeouts();
    let cases = [
      (
        "generic_error",
        Case {
          outcome: Err("other error".into()),
          expected_ttl: None,
          expected_value: None,
        },
      ),
      (
        "success",
        Case {
          outcome: Ok("value1".to_string()),
          expected_ttl: Some(timeouts.ttl),
          expected_value: Some("value1"),
        },
      ),
    ];

    for (name, case) in cases {
      let entry = CachedEntry::new();
      entry.set(Err(NotFound.into()), NOW_MILLIS - 500, &timeouts, true);
      entry.get();
      check(&entry, case, false, name);
    }
  }

  #[test]
  fn set_reload_after_success() {
    let timeouts = timeouts();
    let cases = [
      (
        "generic_error_keeps_previous_value",
        Case {
          outcome: Err("other error".into()),
          expected_ttl: None,
          expected_value: Some("value0"),
        },
      ),
      (
        "not_found_clears_previous_value",
        Case {
          outcome: Err(NotFound.into()),
          expected_ttl: Some(timeouts.not_found_ttl),
          expected_value: None,
        },
      ),
      (
        "success_replaces_value",
        Case {
          outcome: Ok("value1".to_string()),
          expected_ttl: Some(timeouts.ttl),
          expected_value: Some("value1"),
        },
      ),
    ];

    for (name, case) in cases {
      let entry = CachedEntry::new();
      entry.set(Ok("value0".to_string()), NOW_MILLIS - 500, &timeouts, true);
      entry.get();
      check(&entry, case, false, name);
    }
  }

  #[test]
  fn wrapped_not_found_is_negative_cached() {
    #[derive(Debug)]
    struct Wrapped;
    impl std::fmt::Display for Wrapped {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "custom not found")
      }
    }
    impl std::error::Error for Wrapped {
      fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&NotFound)
      }
    }

    let timeouts = timeouts();
    let entry: CachedEntry<String> = CachedEntry::new();
    let ttl = entry.set(Err(Box::new(Wrapped)), NOW_MILLIS, &timeouts, true);
    assert_eq!(ttl, Some(timeouts.not_found_ttl));
    assert!(entry.value_snapshot().is_none());
  }

  #[test]
  fn get_marks_accessed() {
    let timeouts = timeouts();
    let entry = CachedEntry::new();
    entry.set(Ok("value".to_string()), NOW_MILLIS, &timeouts, true);

    assert!(!entry.accessed());
    assert_eq!(entry.get().as_deref().map(String::as_str), Some("value"));
    assert!(entry.accessed());

    // Sampling must not count as a read.
    entry.set(Ok("value".to_string()), NOW_MILLIS, &timeouts, false);
    let _ = entry.value_snapshot();
    assert!(!entry.accessed());
  }

  #[test]
  fn randomized_ttl_spreads_both_ways() {
    let mut randomized = timeouts();
    randomized.randomizer = 0.2;

    let tries = 10_000;
    let threshold = 4_000;
    let mut less = 0;
    let mut greater = 0;

    let entry = CachedEntry::new();
    for _ in 0..tries {
      let ttl = entry
        .set(Ok("value0".to_string()), NOW_MILLIS, &randomized, false)
        .expect("successful set must return a ttl");
      if ttl < randomized.ttl {
        less += 1;
      } else if ttl > randomized.ttl {
        greater += 1;
      }
    }

    assert!(less > threshold, "only {less} draws below the base ttl");
    assert!(greater > threshold, "only {greater} draws above the base ttl");
  }

  #[test]
  fn randomized_next_reload_spreads_both_ways() {
    let mut randomized = timeouts();
    randomized.randomizer = 0.2;

    let tries = 10_000;
    let threshold = 4_000;
    let reference = NOW_MILLIS + randomized.reload_interval.as_millis() as i64;
    let mut less = 0;
    let mut greater = 0;

    let entry = CachedEntry::new();
    for _ in 0..tries {
      entry.set(Ok("value0".to_string()), NOW_MILLIS, &randomized, false);
      let next_reload = entry.next_reload_millis();
      if next_reload < reference {
        less += 1;
      } else if next_reload > reference {
        greater += 1;
      }
    }

    assert!(less > threshold, "only {less} draws below the reference");
    assert!(greater > threshold, "only {greater} draws above the reference");
  }

  #[test]
  fn concurrent_set_and_get_smoke() {
    let timeouts = timeouts();
    let entry = Arc::new(CachedEntry::new());

    let workers: Vec<_> = (0..8)
      .map(|_| {
        let entry = entry.clone();
        thread::spawn(move || {
          for _ in 0..10_000 {
            entry.set(Ok("value0".to_string()), NOW_MILLIS, &timeouts, false);
            let _ = entry.get();
            let _ = entry.value_snapshot();
            let _ = entry.next_reload_millis();
          }
        })
      })
      .collect();

    for worker in workers {
      worker.join().expect("worker panicked");
    }
  }
}
