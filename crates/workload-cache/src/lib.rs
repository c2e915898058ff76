//! A demand-driven cache of the workloads known to a container runtime.
//!
//! Listing all workloads from a container runtime is expensive, yet components like the status
//! reporter want an up-to-date picture many times per second. The [`RefreshingCache`] sits in
//! front of a [`WorkloadSource`] and serves reads from an in-memory snapshot. While it is being
//! read, a background task keeps the snapshot fresh; once reads stop, so does the task.
//!
//! ```no_run
//! # use workload_cache::{RefreshingCache, WorkloadSource};
//! # async fn run(source: impl WorkloadSource) -> anyhow::Result<()> {
//! let cache = RefreshingCache::with_defaults(source);
//! for workload in cache.read().await?.iter() {
//!     println!("{}", workload.full_name());
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod metrics;

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod source;
pub mod types;

pub use cache::{RefreshingCache, Snapshot, WorkloadCache};
pub use config::{CacheConfig, Config};
pub use error::CacheError;
pub use source::WorkloadSource;
pub use types::{Container, ContainerState, Workload};

/// Sets up logging and metrics for the process embedding the cache.
///
/// Installs global state, so this must be called at most once.
pub fn init(config: &Config) -> anyhow::Result<()> {
    logging::init_logging(config);
    metrics::init_metrics(&config.metrics)
}
