mod common;

use common::{base_params, sleep_until, CACHE_TIMEOUTS};
use lazy_cache::prometheus::Registry;
use lazy_cache::{AutomaticReload, Cache, LoadOneFn, Measurable, Timeouts};

use std::sync::Arc;
use std::time::{Duration, Instant};

struct Payload {
  bytes: u64,
}

impl Measurable for Payload {
  fn mem_size(&self) -> u64 {
    self.bytes
  }
}

fn gauge_value(registry: &Registry, name: &str) -> i64 {
  registry
    .gather()
    .iter()
    .find(|family| family.get_name() == name)
    .map(|family| family.get_metric()[0].get_gauge().get_value() as i64)
    .unwrap_or_default()
}

#[test]
fn sampler_tracks_measurable_footprints() {
  let timeouts = Timeouts {
    memsize_update: Duration::from_secs(1),
    ..CACHE_TIMEOUTS
  };

  let load_one: LoadOneFn<i32, Payload> = Arc::new(|key| {
    let bytes = match key {
      0 => 10_000,
      1 => 100,
      _ => 1_000,
    };
    Ok(Payload { bytes })
  });

  let registry = Registry::new();
  let mut params = base_params("memsize", load_one, timeouts, AutomaticReload::Disabled);
  params.metrics_registry = Some(registry.clone());
  let cache = Cache::new(params).expect("cache construction failed");

  let start = Instant::now();
  assert_eq!(cache.memory_usage(), 0);

  // Staggered loads, offset from the sampler's whole-second ticks: the
  // entries expire at ~7.3s, ~8.5s and ~10.3s, so successive samples see the
  // footprint shrink in three steps.
  sleep_until(start, Duration::from_millis(300));
  assert!(cache.get(&0).is_some());
  sleep_until(start, Duration::from_millis(1_500));
  assert!(cache.get(&1).is_some());
  sleep_until(start, Duration::from_millis(3_300));
  assert!(cache.get(&2).is_some());

  sleep_until(start, Duration::from_millis(4_400));
  assert_eq!(cache.memory_usage(), 11_100);
  assert_eq!(gauge_value(&registry, "lazy_cache_memory_usage"), 11_100);

  sleep_until(start, Duration::from_millis(8_250));
  assert_eq!(cache.memory_usage(), 1_100, "key 0 expired");

  sleep_until(start, Duration::from_millis(9_400));
  assert_eq!(cache.memory_usage(), 1_000, "key 1 expired");

  sleep_until(start, Duration::from_millis(11_400));
  assert_eq!(cache.memory_usage(), 0, "all entries expired");
  assert_eq!(gauge_value(&registry, "lazy_cache_memory_usage"), 0);
}

#[test]
fn sampler_is_disabled_without_a_registry() {
  let timeouts = Timeouts {
    memsize_update: Duration::from_millis(100),
    ..CACHE_TIMEOUTS
  };
  let load_one: LoadOneFn<i32, Payload> = Arc::new(|_| Ok(Payload { bytes: 42 }));
  let cache = Cache::new(base_params(
    "memsize_off",
    load_one,
    timeouts,
    AutomaticReload::Disabled,
  ))
  .expect("cache construction failed");

  assert!(cache.get(&0).is_some());
  std::thread::sleep(Duration::from_millis(400));
  assert_eq!(cache.memory_usage(), 0, "no registry, no sampling");
}
