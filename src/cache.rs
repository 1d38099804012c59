use crate::cancel::CancelToken;
use crate::entry::CachedEntry;
use crate::error::{is_not_found, BuildError, LoadError};
use crate::memsize::Measurable;
use crate::metrics::Metrics;
use crate::params::{AutomaticReload, LoadOneFn, LoadedEntry, Params};
use crate::time;
use crate::timeouts::Timeouts;
use crate::watcher::DeadlineQueue;

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::{info, trace, warn};

/// How long the preload drain parks between receive attempts while checking
/// for cancellation.
const PRELOAD_POLL: Duration = Duration::from_millis(100);

/// A lazy, self-refreshing, in-memory key/value cache.
///
/// Values are pulled through a user-supplied loader on first access, served
/// from memory while fresh, refreshed in the background, and shed once their
/// TTL elapses without a renewing load. The handle is cheap to clone; all
/// clones share one cache.
///
/// Background tasks run until the [`CancelToken`] from the construction
/// parameters is cancelled; dropping the last handle alone does not stop
/// them.
pub struct Cache<K, V> {
  shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

struct Shared<K, V> {
  name: String,
  timeouts: Timeouts,
  load_one: LoadOneFn<K, V>,
  automatic_reload: AutomaticReload,
  cancel: CancelToken,
  metrics: Option<Metrics>,
  ttl_watcher: DeadlineQueue<K>,
  reload_watcher: DeadlineQueue<K>,
  mem_size: AtomicU64,
  index: RwLock<HashMap<K, Arc<CachedEntry<V>>, RandomState>>,
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  V: Measurable + Send + Sync + 'static,
{
  pub fn new(params: Params<K, V>) -> Result<Self, BuildError> {
    params.check()?;

    let metrics = match &params.metrics_registry {
      Some(registry) => Some(Metrics::new(&params.name, registry)?),
      None => None,
    };

    let shared = Arc::new(Shared {
      name: params.name,
      timeouts: params.timeouts,
      load_one: params.load_one,
      automatic_reload: params.automatic_reload,
      cancel: params.cancel,
      metrics,
      ttl_watcher: DeadlineQueue::new(),
      reload_watcher: DeadlineQueue::new(),
      mem_size: AtomicU64::new(0),
      index: RwLock::new(HashMap::with_hasher(RandomState::new())),
    });

    if params.load_many.is_some() {
      trace!(cache = %shared.name, "batch loader registered; reserved for preload producers");
    }

    match params.preload {
      Some(preload) => {
        let task = shared.clone();
        thread::spawn(move || task.run_preload(preload));
      }
      None => info!(cache = %shared.name, "preloading disabled"),
    }

    {
      let task = shared.clone();
      thread::spawn(move || task.run_ttl_reaper());
    }

    if shared.automatic_reload != AutomaticReload::Disabled {
      let task = shared.clone();
      thread::spawn(move || task.run_reload_driver());
    } else {
      info!(cache = %shared.name, "automatic reload disabled");
    }

    if shared.metrics.is_some() && !shared.timeouts.memsize_update.is_zero() {
      let task = shared.clone();
      thread::spawn(move || task.run_memsize_sampler());
    } else {
      info!(cache = %shared.name, "memory size sampling disabled");
    }

    Ok(Self { shared })
  }

  /// Returns the cached value for `key`, loading it first when missing or
  /// stale.
  ///
  /// `None` means the key is authoritatively absent (negative-cached) or its
  /// first load failed. Fresh entries are served without taking any lock; a
  /// stale entry blocks the caller for at most one loader invocation.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.shared.get(key)
  }

  /// Marks `key` stale so the next read reloads it. When automatic reload is
  /// enabled, a background reload is scheduled immediately. No-op for
  /// unknown keys.
  pub fn invalidate(&self, key: &K) {
    self.shared.invalidate(key);
  }

  /// Deletes the entry for `key` and disarms its watchers. No-op for unknown
  /// keys.
  pub fn remove(&self, key: &K) {
    self.shared.remove(key);
  }

  /// Number of entries currently cached (including negative entries).
  pub fn len(&self) -> usize {
    self.shared.index.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.shared.index.read().is_empty()
  }

  /// Last sampled approximate memory footprint, in bytes. Zero until the
  /// memory sampler has run.
  pub fn memory_usage(&self) -> u64 {
    self.shared.mem_size.load(Ordering::Relaxed)
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }
}

impl<K, V> Shared<K, V>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  V: Measurable + Send + Sync + 'static,
{
  fn get(&self, key: &K) -> Option<Arc<V>> {
    if let Some(metrics) = &self.metrics {
      metrics.reads_count.inc();
    }

    let entry = self.index.read().get(key).cloned();
    let now = time::now_millis();

    match entry {
      Some(entry) => self.get_present(key, &entry, now),
      None => self.load_missing(key, now),
    }
  }

  /// Hit path: serve the value when fresh, otherwise reload it under the
  /// entry lock.
  fn get_present(&self, key: &K, entry: &Arc<CachedEntry<V>>, now: i64) -> Option<Arc<V>> {
    if now < entry.next_reload_millis() {
      return entry.get();
    }

    let guard = entry.lock.lock();

    // Another caller may have finished the reload while we waited.
    if now < entry.next_reload_millis() {
      drop(guard);
      return entry.get();
    }

    let outcome = (self.load_one)(key);
    let failed = load_failed(&outcome);
    if failed {
      trace!(cache = %self.name, key = ?key, "lazy reload failed");
    }
    let ttl = entry.set(outcome, now, &self.timeouts, false);
    drop(guard);

    self.set_entry_watchers(key, ttl, entry, now);
    if let Some(metrics) = &self.metrics {
      metrics.lazy_loads.inc();
      if failed {
        metrics.error_loads.inc();
      }
    }

    entry.get()
  }

  /// Miss path: publish a fresh entry with its lock already held, so every
  /// concurrent reader of the key serializes behind this one load.
  fn load_missing(&self, key: &K, now: i64) -> Option<Arc<V>> {
    let entry = Arc::new(CachedEntry::new());
    let guard = entry.lock.lock();

    let raced = {
      let mut index = self.index.write();
      match index.entry(key.clone()) {
        MapEntry::Occupied(existing) => Some(existing.get().clone()),
        MapEntry::Vacant(slot) => {
          slot.insert(entry.clone());
          None
        }
      }
    };
    if let Some(existing) = raced {
      // Someone else published first; defer to their entry.
      drop(guard);
      return self.get_present(key, &existing, now);
    }
    if let Some(metrics) = &self.metrics {
      metrics.items_count.inc();
    }

    let outcome = (self.load_one)(key);
    let failed = load_failed(&outcome);
    if failed {
      trace!(cache = %self.name, key = ?key, "first load failed");
    }
    let ttl = entry.set(outcome, now, &self.timeouts, true);
    drop(guard);

    self.set_entry_watchers(key, ttl, &entry, now);
    if let Some(metrics) = &self.metrics {
      metrics.lazy_loads.inc();
      if failed {
        metrics.error_loads.inc();
      }
    }

    entry.get()
  }

  fn invalidate(&self, key: &K) {
    let entry = self.index.read().get(key).cloned();
    let entry = match entry {
      Some(entry) => entry,
      None => return,
    };

    entry.invalidate();

    if self.automatic_reload != AutomaticReload::Disabled {
      self.reload_watcher.push(key.clone(), Duration::ZERO);
    }

    if let Some(metrics) = &self.metrics {
      metrics.received_invalidations.inc();
    }
  }

  fn remove(&self, key: &K) {
    {
      let mut index = self.index.write();
      if index.remove(key).is_none() {
        return;
      }
    }

    // Dropped after the index unlock; a watcher that already dequeued the
    // key finds it absent and skips it.
    self.ttl_watcher.remove(key);
    self.reload_watcher.remove(key);

    if let Some(metrics) = &self.metrics {
      metrics.items_count.dec();
    }
  }

  /// Re-arms both watchers after a load. `ttl: None` leaves the TTL watcher
  /// untouched (its previous deadline keeps counting down).
  fn set_entry_watchers(&self, key: &K, ttl: Option<Duration>, entry: &CachedEntry<V>, now: i64) {
    if let Some(ttl) = ttl {
      self.ttl_watcher.push(key.clone(), ttl);
    }

    if self.automatic_reload == AutomaticReload::Disabled {
      return;
    }

    let until_reload = (entry.next_reload_millis() - now).max(0) as u64;
    self
      .reload_watcher
      .push(key.clone(), Duration::from_millis(until_reload));
  }

  /// Drains the preload stream into the cache until it disconnects or the
  /// token is cancelled.
  fn run_preload(&self, preload: Receiver<LoadedEntry<K, V>>) {
    loop {
      if self.cancel.is_cancelled() {
        return;
      }

      match preload.recv_timeout(PRELOAD_POLL) {
        Ok(item) => self.add_loaded_entry(item, time::now_millis()),
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => {
          info!(cache = %self.name, "preloading finished");
          return;
        }
      }
    }
  }

  fn add_loaded_entry(&self, item: LoadedEntry<K, V>, now: i64) {
    let entry = Arc::new(CachedEntry::new());
    let failed = load_failed(&item.result);
    // The entry is unpublished, so no lock is needed around `set`.
    let ttl = entry.set(item.result, now, &self.timeouts, true);
    let key = item.key;

    let installed_new_key = {
      let mut index = self.index.write();
      // Never overwrite live data with a failed load.
      if failed && index.contains_key(&key) {
        None
      } else {
        Some(index.insert(key.clone(), entry.clone()).is_none())
      }
    };

    let new_key = match installed_new_key {
      None => {
        if let Some(metrics) = &self.metrics {
          metrics.error_loads.inc();
        }
        return;
      }
      Some(new_key) => new_key,
    };

    self.set_entry_watchers(&key, ttl, &entry, now);
    if let Some(metrics) = &self.metrics {
      if new_key {
        metrics.items_count.inc();
      }
    }
  }

  /// Evicts entries whose TTL deadline fired.
  fn run_ttl_reaper(&self) {
    while let Some(key) = self.ttl_watcher.next_fired(&self.cancel) {
      {
        let mut index = self.index.write();
        if index.remove(&key).is_none() {
          continue;
        }
      }

      self.reload_watcher.remove(&key);

      if let Some(metrics) = &self.metrics {
        metrics.items_count.dec();
      }
    }
  }

  /// Refreshes entries whose reload deadline fired.
  fn run_reload_driver(&self) {
    while let Some(key) = self.reload_watcher.next_fired(&self.cancel) {
      let entry = self.index.read().get(&key).cloned();
      let entry = match entry {
        Some(entry) => entry,
        // Removed or evicted while queued.
        None => continue,
      };

      // Entries nobody read since the last load are left to age out; a later
      // access lazy-reloads them instead.
      if self.automatic_reload == AutomaticReload::AccessedEntries && !entry.accessed() {
        continue;
      }

      let guard = entry.lock.lock();
      let now = time::now_millis();
      let outcome = (self.load_one)(&key);
      let failed = load_failed(&outcome);
      let accessed = entry.accessed();
      let mut ttl = entry.set(outcome, now, &self.timeouts, false);
      if !accessed {
        // Refresh without a read must not extend residency.
        ttl = None;
      }
      drop(guard);

      if failed {
        warn!(cache = %self.name, key = ?key, "automatic reload failed");
      }

      self.set_entry_watchers(&key, ttl, &entry, now);
      if let Some(metrics) = &self.metrics {
        metrics.automatic_loads.inc();
        if failed {
          metrics.error_loads.inc();
        }
      }
    }
  }

  /// Periodically re-estimates the cache's total memory footprint.
  fn run_memsize_sampler(&self) {
    let interval = self.timeouts.memsize_update;
    while !self.cancel.wait_timeout(interval) {
      // Estimating size must never take the cache down with it.
      if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.update_mem_size())) {
        let reason = payload
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| payload.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "unknown panic".to_string());
        warn!(cache = %self.name, %reason, "panic occurred during cache size calculation");
      }
    }
  }

  fn update_mem_size(&self) {
    let entries: Vec<Arc<CachedEntry<V>>> = {
      let index = self.index.read();
      index.values().cloned().collect()
    };

    let mut size = 0u64;
    for entry in &entries {
      if let Some(value) = entry.value_snapshot() {
        size += Measurable::mem_size(value.as_ref());
      }
    }

    self.mem_size.store(size, Ordering::Relaxed);
    if let Some(metrics) = &self.metrics {
      metrics.memory_usage.set(size as i64);
    }
  }
}

fn load_failed<V>(outcome: &Result<V, LoadError>) -> bool {
  matches!(outcome, Err(err) if !is_not_found(err))
}
