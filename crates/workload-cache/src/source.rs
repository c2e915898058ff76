use std::sync::Arc;

use futures::future::BoxFuture;

use crate::types::Workload;

/// The runtime capability that enumerates all workloads.
///
/// Listing workloads is assumed to be expensive. Implementations may be slow and may fail,
/// and the [`RefreshingCache`](crate::cache::RefreshingCache) makes sure it is only called
/// when there is actual demand for fresh data.
pub trait WorkloadSource: Send + Sync + 'static {
    /// Returns the full, ordered list of workloads currently known to the runtime.
    ///
    /// When `include_exited` is `false`, workloads without any live container are left out.
    fn list_workloads(&self, include_exited: bool) -> BoxFuture<'_, anyhow::Result<Vec<Workload>>>;
}

impl<S: WorkloadSource> WorkloadSource for Arc<S> {
    fn list_workloads(&self, include_exited: bool) -> BoxFuture<'_, anyhow::Result<Vec<Workload>>> {
        (**self).list_workloads(include_exited)
    }
}
