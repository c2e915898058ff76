use thiserror::Error;

/// An error returned by the [`RefreshingCache`](crate::cache::RefreshingCache).
///
/// The cache does not produce errors of its own. The only failure callers can observe is the
/// [`WorkloadSource`](crate::source::WorkloadSource) failing while a synchronous refresh was
/// required.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Listing workloads from the source failed.
    ///
    /// The cached snapshot was left untouched.
    #[error("failed to list workloads")]
    SourceFetchFailed(#[source] anyhow::Error),
}

impl CacheError {
    /// Returns the error reported by the source.
    pub fn source_error(&self) -> &anyhow::Error {
        match self {
            CacheError::SourceFetchFailed(err) => err,
        }
    }
}
