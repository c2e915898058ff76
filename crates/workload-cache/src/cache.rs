use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::source::WorkloadSource;
use crate::types::Workload;

/// The interface upstream code uses to get at the current workloads.
///
/// [`RefreshingCache`] is the production implementation. Depending on this trait instead makes it
/// easy to substitute a fixed list of workloads in tests of the calling code.
pub trait WorkloadCache: Send + Sync {
    /// Returns a recent snapshot of all workloads, see [`RefreshingCache::read`].
    fn get_workloads(&self) -> BoxFuture<'_, Result<Arc<[Workload]>, CacheError>>;

    /// Makes sure the snapshot is at least as new as `watermark`, see
    /// [`RefreshingCache::force_refresh_if_older`].
    fn force_update_if_older(&self, watermark: Instant) -> BoxFuture<'_, Result<(), CacheError>>;
}

/// A consistent view of the cached workloads together with the time they were fetched.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub workloads: Arc<[Workload]>,
    pub refreshed_at: Instant,
}

/// Which code path triggered a fetch. Only used to tag metrics and logs.
#[derive(Clone, Copy, Debug)]
enum FetchPath {
    Read,
    Force,
    Refresher,
}

impl FetchPath {
    fn as_str(self) -> &'static str {
        match self {
            FetchPath::Read => "read",
            FetchPath::Force => "force",
            FetchPath::Refresher => "refresher",
        }
    }
}

#[derive(Debug)]
struct CacheState {
    /// When the current `snapshot` was fetched, `None` if nothing was fetched yet.
    last_refreshed_at: Option<Instant>,
    snapshot: Arc<[Workload]>,
    /// Whether a background refresher is running. Guards against spawning a second one.
    refresher_active: bool,
    /// The background refresher stops once it sees a successful fetch after this point in time.
    refresher_deadline: Option<Instant>,
}

impl CacheState {
    fn new() -> Self {
        Self {
            last_refreshed_at: None,
            snapshot: Arc::from(Vec::new()),
            refresher_active: false,
            refresher_deadline: None,
        }
    }

    fn is_stale(&self, now: Instant, config: &CacheConfig) -> bool {
        self.last_refreshed_at
            .is_none_or(|refreshed_at| now.duration_since(refreshed_at) > config.staleness_threshold)
    }

    /// Replaces the snapshot. Workloads and timestamp always change together.
    fn store(&mut self, workloads: Vec<Workload>, refreshed_at: Instant) {
        metric!(gauge("workloads.snapshot.size") = workloads.len() as u64);
        self.snapshot = workloads.into();
        self.last_refreshed_at = Some(refreshed_at);
    }

    fn extend_deadline(&mut self, deadline: Instant) {
        if self.refresher_deadline.is_none_or(|current| current < deadline) {
            self.refresher_deadline = Some(deadline);
        }
    }
}

struct Inner<S> {
    source: S,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl<S: WorkloadSource> Inner<S> {
    /// Lists the workloads from the source, returning them along with the time they were fetched.
    async fn fetch(&self, path: FetchPath) -> anyhow::Result<(Vec<Workload>, Instant)> {
        let started = Instant::now();
        let result = self.source.list_workloads(false).await;
        let fetched_at = Instant::now();

        metric!(
            timer("workloads.fetch.duration") = fetched_at - started,
            "path" => path.as_str(),
        );
        metric!(
            counter("workloads.fetch") += 1,
            "path" => path.as_str(),
            "status" => if result.is_ok() { "ok" } else { "error" },
        );

        result.map(|workloads| (workloads, fetched_at))
    }

    /// The body of the background refresher.
    ///
    /// Keeps the snapshot up to date until a successful fetch finds the deadline expired. Failed
    /// fetches are skipped entirely, they neither touch the snapshot nor check the deadline.
    async fn run_refresher(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            let (workloads, fetched_at) = match self.fetch(FetchPath::Refresher).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    tracing::warn!(
                        error = &*err as &dyn std::error::Error,
                        "Background workload refresh failed"
                    );
                    continue;
                }
            };

            let mut state = self.state.lock().await;
            let expired = state
                .refresher_deadline
                .is_none_or(|deadline| Instant::now() > deadline);
            if expired {
                state.refresher_active = false;
            }
            tracing::trace!(workloads = workloads.len(), "Refreshed workloads in background");
            state.store(workloads, fetched_at);
            drop(state);

            if expired {
                metric!(counter("workloads.refresher.stopped") += 1);
                tracing::debug!("No recent reads, stopping background workload refresher");
                return;
            }
        }
    }
}

/// A cache of all workloads that refreshes itself while it is being read.
///
/// Listing workloads from the [`WorkloadSource`] is expensive, so reads are served from an
/// in-memory snapshot. The snapshot is refreshed:
///
/// - synchronously by [`read`](Self::read), when it is older than the staleness threshold,
/// - synchronously by [`force_refresh_if_older`](Self::force_refresh_if_older), when it
///   predates the given watermark,
/// - by a background refresher, which polls the source for as long as reads keep coming in.
///
/// The background refresher is started on demand by [`read`](Self::read) and stops by itself
/// once no read happened for [`idle_horizon`](CacheConfig::idle_horizon). At most one refresher
/// runs per cache at any time. Errors in the background are logged and skipped; callers only
/// ever see errors from the synchronous refreshes they triggered themselves.
///
/// The cache is a cheap handle to shared state and can be cloned freely.
pub struct RefreshingCache<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RefreshingCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for RefreshingCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RefreshingCache");
        debug.field("config", &self.inner.config);
        if let Ok(state) = self.inner.state.try_lock() {
            debug
                .field("workloads", &state.snapshot.len())
                .field("last_refreshed_at", &state.last_refreshed_at)
                .field("refresher_active", &state.refresher_active);
        }
        debug.finish()
    }
}

impl<S: WorkloadSource> RefreshingCache<S> {
    /// Creates an empty cache.
    ///
    /// Nothing is fetched and no task is spawned until the first read.
    pub fn new(source: S, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                state: Mutex::new(CacheState::new()),
            }),
        }
    }

    /// Creates an empty cache with the default timings.
    pub fn with_defaults(source: S) -> Self {
        Self::new(source, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the cached workloads.
    ///
    /// If the snapshot is older than the staleness threshold, or was never populated, the source is
    /// queried first and this waits for it. Every call marks the cache as in demand, which keeps the
    /// background refresher alive for another idle horizon, and starts one if none is running.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::SourceFetchFailed`] if a synchronous refresh was necessary and failed.
    /// In that case the cache is left exactly as it was and no refresher is started.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn read(&self) -> Result<Arc<[Workload]>, CacheError> {
        let mut state = self.inner.state.lock().await;

        let is_stale = state.is_stale(Instant::now(), &self.inner.config);
        if is_stale {
            tracing::debug!("Workload snapshot is stale, refreshing");
            let (workloads, fetched_at) = self
                .inner
                .fetch(FetchPath::Read)
                .await
                .map_err(CacheError::SourceFetchFailed)?;
            state.store(workloads, fetched_at);
        }
        metric!(
            counter("workloads.read") += 1,
            "fetched" => if is_stale { "true" } else { "false" },
        );

        state.extend_deadline(Instant::now() + self.inner.config.idle_horizon);
        if !state.refresher_active {
            state.refresher_active = true;
            self.spawn_refresher();
        }

        Ok(Arc::clone(&state.snapshot))
    }

    /// Refreshes the snapshot if it was fetched before `watermark`.
    ///
    /// This is meant for callers that just changed the state of the runtime and need the cache to
    /// reflect that change. It does not count as a read, and neither starts nor prolongs the
    /// background refresher.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::SourceFetchFailed`] if the refresh failed, leaving the cache untouched.
    pub async fn force_refresh_if_older(&self, watermark: Instant) -> Result<(), CacheError> {
        let mut state = self.inner.state.lock().await;

        if state
            .last_refreshed_at
            .is_some_and(|refreshed_at| refreshed_at >= watermark)
        {
            return Ok(());
        }

        tracing::debug!("Workload snapshot predates watermark, refreshing");
        let (workloads, fetched_at) = self
            .inner
            .fetch(FetchPath::Force)
            .await
            .map_err(CacheError::SourceFetchFailed)?;
        state.store(workloads, fetched_at);

        Ok(())
    }

    /// Returns the current snapshot without refreshing it or counting as a read.
    ///
    /// Returns `None` if nothing was fetched yet.
    pub async fn peek(&self) -> Option<Snapshot> {
        let state = self.inner.state.lock().await;
        state.last_refreshed_at.map(|refreshed_at| Snapshot {
            workloads: Arc::clone(&state.snapshot),
            refreshed_at,
        })
    }

    /// Whether the background refresher is currently running.
    pub async fn is_refreshing(&self) -> bool {
        self.inner.state.lock().await.refresher_active
    }

    fn spawn_refresher(&self) {
        metric!(counter("workloads.refresher.started") += 1);
        tracing::debug!("Starting background workload refresher");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_refresher());
    }
}

impl<S: WorkloadSource> WorkloadCache for RefreshingCache<S> {
    fn get_workloads(&self) -> BoxFuture<'_, Result<Arc<[Workload]>, CacheError>> {
        Box::pin(self.read())
    }

    fn force_update_if_older(&self, watermark: Instant) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(self.force_refresh_if_older(watermark))
    }
}
