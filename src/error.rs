use thiserror::Error;

/// Boxed error type returned by loader callables.
///
/// Any error whose cause chain contains [`NotFound`] is treated as an
/// authoritative "entry does not exist" and enables negative caching; every
/// other error is a generic load failure.
pub type LoadError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Sentinel error signalling that the backing store has no entry for a key.
///
/// Loaders return it directly (`Err(NotFound.into())`) or wrapped anywhere in
/// a cause chain; [`is_not_found`] finds it either way.
#[derive(Debug, Error)]
#[error("entry not found")]
pub struct NotFound;

/// Walks the cause chain of `err` looking for the [`NotFound`] sentinel.
pub fn is_not_found(err: &LoadError) -> bool {
  let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err.as_ref());
  while let Some(e) = current {
    if e.is::<NotFound>() {
      return true;
    }
    current = e.source();
  }
  false
}

/// Errors rejected at cache construction time.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("cache name must not be empty")]
  EmptyName,
  #[error("TTL must be greater than zero")]
  ZeroTtl,
  #[error("reload interval must be greater than zero")]
  ZeroReloadInterval,
  #[error("reload interval must be less than or equal to TTL")]
  ReloadIntervalExceedsTtl,
  #[error("randomizer must be within [0, 1]")]
  RandomizerOutOfRange,
  #[error("metrics registration failed: {0}")]
  Metrics(#[from] prometheus::Error),
}
