use prometheus::{IntCounter, IntGauge, Opts, Registry};

const SUBSYSTEM: &str = "lazy_cache";
const NAME_LABEL: &str = "name";

/// The cache's named counters and gauges, registered against the embedder's
/// registry. Every metric carries a constant `name` label equal to the cache
/// name, so several caches can share one registry.
pub(crate) struct Metrics {
  pub(crate) items_count: IntGauge,
  pub(crate) automatic_loads: IntCounter,
  pub(crate) lazy_loads: IntCounter,
  pub(crate) error_loads: IntCounter,
  pub(crate) reads_count: IntCounter,
  pub(crate) received_invalidations: IntCounter,
  pub(crate) memory_usage: IntGauge,
}

impl Metrics {
  pub(crate) fn new(cache_name: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
    let items_count = IntGauge::with_opts(opts(
      "items_count",
      "Current number of cached items",
      cache_name,
    ))?;
    registry.register(Box::new(items_count.clone()))?;

    let automatic_loads = IntCounter::with_opts(opts(
      "automatic_loads",
      "Total number of automatic item loads",
      cache_name,
    ))?;
    registry.register(Box::new(automatic_loads.clone()))?;

    let lazy_loads = IntCounter::with_opts(opts(
      "lazy_loads",
      "Total number of lazy item loads (triggered by user request)",
      cache_name,
    ))?;
    registry.register(Box::new(lazy_loads.clone()))?;

    let error_loads = IntCounter::with_opts(opts(
      "error_loads",
      "Count of item loads which ended with an error (except not found)",
      cache_name,
    ))?;
    registry.register(Box::new(error_loads.clone()))?;

    let reads_count = IntCounter::with_opts(opts(
      "reads_count",
      "Total number of item reads",
      cache_name,
    ))?;
    registry.register(Box::new(reads_count.clone()))?;

    let received_invalidations = IntCounter::with_opts(opts(
      "received_invalidations",
      "Total number of received invalidations",
      cache_name,
    ))?;
    registry.register(Box::new(received_invalidations.clone()))?;

    let memory_usage = IntGauge::with_opts(opts(
      "memory_usage",
      "Current memory usage in bytes by cache",
      cache_name,
    ))?;
    registry.register(Box::new(memory_usage.clone()))?;

    Ok(Self {
      items_count,
      automatic_loads,
      lazy_loads,
      error_loads,
      reads_count,
      received_invalidations,
      memory_usage,
    })
  }
}

fn opts(name: &str, help: &str, cache_name: &str) -> Opts {
  Opts::new(name, help)
    .subsystem(SUBSYSTEM)
    .const_label(NAME_LABEL, cache_name)
}
