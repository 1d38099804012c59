//! Lazy, self-refreshing, in-memory key/value cache for read-heavy workloads.
//!
//! The cache sits between callers and an expensive loader (database, remote
//! RPC, file lookup), serving recent values from memory. Entries are loaded
//! on first access, refreshed in the background on a jittered interval, and
//! evicted once their TTL passes without a renewing load. Reads of fresh
//! entries never block; a stale entry blocks its readers for at most one
//! loader call, and at most one loader call per key is ever in flight.
//!
//! Not-found results are negative-cached with their own TTL, and a failed
//! reload keeps serving the previously cached value ("serve stale on error").
//! `get` never returns an error: a missing key and a sick backing store both
//! manifest as an absent value, and the difference shows up in the metrics.
//!
//! ```no_run
//! use lazy_cache::{AutomaticReload, Cache, CancelToken, Params, Timeouts};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let cancel = CancelToken::new();
//! let cache: Cache<u64, String> = Cache::new(Params {
//!   name: "users".to_string(),
//!   cancel: cancel.clone(),
//!   metrics_registry: None,
//!   load_one: Arc::new(|id| Ok(format!("user_{id}"))),
//!   load_many: None,
//!   preload: None,
//!   timeouts: Timeouts {
//!     ttl: Duration::from_secs(600),
//!     not_found_ttl: Duration::from_secs(60),
//!     error_ttl: Duration::from_secs(5),
//!     reload_interval: Duration::from_secs(120),
//!     randomizer: 0.1,
//!     memsize_update: Duration::ZERO,
//!   },
//!   automatic_reload: AutomaticReload::AccessedEntries,
//! })?;
//!
//! assert_eq!(cache.get(&7).as_deref(), Some(&"user_7".to_string()));
//! cancel.cancel();
//! # Ok::<(), lazy_cache::BuildError>(())
//! ```

mod cache;
mod cancel;
mod entry;
mod error;
mod memsize;
mod metrics;
mod params;
mod time;
mod timeouts;
mod watcher;

pub use cache::Cache;
pub use cancel::CancelToken;
pub use error::{is_not_found, BuildError, LoadError, NotFound};
pub use memsize::Measurable;
pub use params::{AutomaticReload, LoadManyFn, LoadOneFn, LoadedEntry, Params};
pub use timeouts::Timeouts;

// Re-exported so embedders and tests name the same registry types the cache
// was built against.
pub use prometheus;
