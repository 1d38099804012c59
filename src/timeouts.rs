use crate::error::BuildError;

use std::time::Duration;

/// Residency and refresh timing for cached entries.
///
/// Every duration here is randomized by [`Timeouts::randomizer`] each time it
/// is materialized into a concrete deadline.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timeouts {
  /// Entry TTL (time to live). When the time since the entry's last load
  /// exceeds this value, the entry is removed from the cache.
  ///
  /// Each time an entry is reloaded and its data was accessed at least once
  /// since the previous load, the TTL is renewed. If the reload fails or the
  /// entry was never accessed, the TTL stays where it was.
  ///
  /// For optimal self-maintenance the TTL should be at least twice
  /// [`Timeouts::reload_interval`].
  pub ttl: Duration,

  /// TTL for an entry that was not found in the backing store (or should act
  /// as not found).
  ///
  /// If set to zero, not-found entries are not cached.
  pub not_found_ttl: Duration,

  /// TTL for an entry whose very first load failed with an error other than
  /// not-found. Does not apply to reloads, which keep serving the previous
  /// value instead.
  ///
  /// If set to zero, such entries are not cached.
  pub error_ttl: Duration,

  /// How often an entry should be reloaded, i.e. how long its data stays
  /// fresh in the cache.
  ///
  /// When an entry is invalidated, an immediate background reload is only
  /// triggered when automatic reload is enabled; otherwise the reload happens
  /// on the next access.
  pub reload_interval: Duration,

  /// How much deadlines are randomized: 0 means none, 0.1 means ±10 %, and
  /// so on up to 1. A concrete TTL is drawn as `ttl ± ttl * randomizer`,
  /// freshly per deadline, which decorrelates reload stampedes across keys.
  pub randomizer: f64,

  /// How often the cache recomputes its approximate memory footprint.
  ///
  /// If set to zero, the footprint is not tracked.
  pub memsize_update: Duration,
}

impl Timeouts {
  pub(crate) fn check(&self) -> Result<(), BuildError> {
    if self.ttl.is_zero() {
      return Err(BuildError::ZeroTtl);
    }

    if self.reload_interval.is_zero() {
      return Err(BuildError::ZeroReloadInterval);
    }

    if self.reload_interval > self.ttl {
      return Err(BuildError::ReloadIntervalExceedsTtl);
    }

    if !(0.0..=1.0).contains(&self.randomizer) {
      return Err(BuildError::RandomizerOutOfRange);
    }

    Ok(())
  }
}
