//! Helpers for testing the workload cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Run tests with a paused clock (`#[tokio::test(start_paused = true)]`). The cache is all about
//!    timing, and [`MockSource::set_latency`] relies on virtual time to stay fast and deterministic.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use workload_cache::{Container, ContainerState, Workload, WorkloadSource};

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `workload_cache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("workload_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a workload with the given ID and name in the `default` namespace.
pub fn workload(id: &str, name: &str) -> Workload {
    Workload {
        id: id.to_owned(),
        name: name.to_owned(),
        namespace: "default".to_owned(),
        containers: vec![container(name)],
    }
}

/// Creates a running container named `name`.
pub fn container(name: &str) -> Container {
    Container {
        id: format!("{name}-container"),
        name: name.to_owned(),
        image: format!("registry.local/{name}:latest"),
        hash: 0,
        created: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        state: ContainerState::Running,
    }
}

/// A [`WorkloadSource`] whose responses are controlled by the test.
///
/// Returns the workloads last passed to [`set_workloads`](Self::set_workloads), and counts every
/// call, including failed ones.
#[derive(Debug, Default)]
pub struct MockSource {
    workloads: Mutex<Vec<Workload>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    include_exited: Mutex<Vec<bool>>,
}

impl MockSource {
    pub fn new(workloads: Vec<Workload>) -> Arc<Self> {
        let source = Self::default();
        source.set_workloads(workloads);
        Arc::new(source)
    }

    pub fn set_workloads(&self, workloads: Vec<Workload>) {
        *self.workloads.lock().unwrap() = workloads;
    }

    /// Makes all subsequent calls fail until called again with `false`.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every call take `latency` before it returns.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Total number of calls to [`list_workloads`](WorkloadSource::list_workloads) so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The `include_exited` flag of every call so far, in order.
    pub fn include_exited_flags(&self) -> Vec<bool> {
        self.include_exited.lock().unwrap().clone()
    }
}

impl WorkloadSource for MockSource {
    fn list_workloads(&self, include_exited: bool) -> BoxFuture<'_, anyhow::Result<Vec<Workload>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.include_exited.lock().unwrap().push(include_exited);
        let latency = *self.latency.lock().unwrap();

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("container runtime is not responding");
            }
            Ok(self.workloads.lock().unwrap().clone())
        })
    }
}
