use crate::cancel::CancelToken;
use crate::error::{BuildError, LoadError};
use crate::timeouts::Timeouts;

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use prometheus::Registry;

/// Loads a single entry from the authoritative store.
///
/// Return `Err` with a [`crate::NotFound`] anywhere in the cause chain to
/// negative-cache an authoritative absence; any other error is treated as a
/// transient load failure.
pub type LoadOneFn<K, V> = Arc<dyn Fn(&K) -> Result<V, LoadError> + Send + Sync>;

/// Loads several entries in one round trip, which should be cheaper than
/// calling the single-key loader per key.
pub type LoadManyFn<K, V> = Arc<dyn Fn(&[K]) -> Vec<LoadedEntry<K, V>> + Send + Sync>;

/// One pre-resolved entry, as produced by a batch loader or a preload
/// producer.
pub struct LoadedEntry<K, V> {
  pub key: K,
  pub result: Result<V, LoadError>,
}

/// Which entries the background reload driver refreshes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutomaticReload {
  /// No background refresh; entries reload lazily on access.
  Disabled,
  /// Refresh only entries that were read since their last load. Untouched
  /// entries are left to age out and reload lazily if accessed again.
  AccessedEntries,
  /// Refresh every cached entry on its reload deadline.
  AllEntries,
}

/// Construction parameters for a [`crate::Cache`].
pub struct Params<K, V> {
  /// Identifier used in metric labels and log fields. Must be non-empty.
  pub name: String,
  /// Terminates the cache's background tasks when cancelled. Outstanding
  /// reads complete normally; the cached data stays in place.
  pub cancel: CancelToken,
  /// Registry the cache metrics are registered against. When absent, no
  /// metrics are emitted and the memory sampler is not started.
  pub metrics_registry: Option<Registry>,
  /// Single-key loader backing cache misses and reloads.
  pub load_one: LoadOneFn<K, V>,
  /// Batch loader. Reserved: the core never invokes it; embedders use it to
  /// produce the preload stream.
  pub load_many: Option<LoadManyFn<K, V>>,
  /// Stream of pre-loaded entries drained once, at startup, until the sender
  /// disconnects or the cancel token fires.
  pub preload: Option<Receiver<LoadedEntry<K, V>>>,
  pub timeouts: Timeouts,
  pub automatic_reload: AutomaticReload,
}

impl<K, V> Params<K, V> {
  pub(crate) fn check(&self) -> Result<(), BuildError> {
    if self.name.is_empty() {
      return Err(BuildError::EmptyName);
    }

    self.timeouts.check()
  }
}
