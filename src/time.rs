use once_cell::sync::Lazy;
use rand::Rng;
use std::time::{Duration, Instant};

// The single, static reference point for all deadline arithmetic in the
// cache. Initialized lazily on first use; all timestamps are milliseconds
// elapsed since this epoch.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the current time as milliseconds since the cache epoch.
#[inline]
pub(crate) fn now_millis() -> i64 {
  CACHE_EPOCH.elapsed().as_millis() as i64
}

/// Randomizes `d` by up to `randomizer * d` in either direction.
///
/// `randomizer` is a factor in `[0, 1]`; 0 returns `d` unchanged. Fresh
/// randomness is drawn on every call so that repeated deadlines for different
/// keys spread out instead of firing in lockstep.
pub(crate) fn randomize_duration(d: Duration, randomizer: f64) -> Duration {
  if randomizer == 0.0 {
    return d;
  }

  let mut rng = rand::thread_rng();
  let delta = d.mul_f64(rng.gen::<f64>() * randomizer);
  if rng.gen_bool(0.5) {
    d + delta
  } else {
    d.saturating_sub(delta)
  }
}
