#![allow(dead_code)]

use lazy_cache::{AutomaticReload, CancelToken, LoadError, LoadOneFn, NotFound, Params, Timeouts};

use std::fmt;
use std::sync::Once;
use std::time::{Duration, Instant};

pub const CACHE_TIMEOUTS: Timeouts = Timeouts {
  ttl: Duration::from_secs(7),
  not_found_ttl: Duration::from_secs(5),
  error_ttl: Duration::from_secs(1),
  reload_interval: Duration::from_secs(3),
  randomizer: 0.0,
  memsize_update: Duration::ZERO,
};

pub fn init_tracing() {
  static INIT: Once = Once::new();
  INIT.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::WARN)
      .with_test_writer()
      .try_init();
  });
}

/// Minimal params: no metrics, no batch loader, no preloading.
pub fn base_params<K, V>(
  name: &str,
  load_one: LoadOneFn<K, V>,
  timeouts: Timeouts,
  automatic_reload: AutomaticReload,
) -> Params<K, V> {
  init_tracing();
  Params {
    name: name.to_string(),
    cancel: CancelToken::new(),
    metrics_registry: None,
    load_one,
    load_many: None,
    preload: None,
    timeouts,
    automatic_reload,
  }
}

/// Sleeps until `offset` past `start`, keeping scripted timelines aligned
/// even when earlier assertions took a while.
pub fn sleep_until(start: Instant, offset: Duration) {
  let elapsed = start.elapsed();
  if let Some(remaining) = offset.checked_sub(elapsed) {
    std::thread::sleep(remaining);
  }
}

/// An error that carries [`NotFound`] in its cause chain rather than being
/// the sentinel itself.
#[derive(Debug)]
pub struct RowMissing;

impl fmt::Display for RowMissing {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "row lookup came back empty")
  }
}

impl std::error::Error for RowMissing {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&NotFound)
  }
}

pub fn wrapped_not_found() -> LoadError {
  Box::new(RowMissing)
}
