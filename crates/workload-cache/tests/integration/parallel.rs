use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{self, Instant};

use workload_cache::{CacheConfig, RefreshingCache, Workload, WorkloadSource};
use workload_cache_test as test;

/// Returns a single workload whose ID is the number of the call.
#[derive(Default)]
struct GenerationSource {
    calls: AtomicUsize,
}

impl GenerationSource {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WorkloadSource for GenerationSource {
    fn list_workloads(&self, _include_exited: bool) -> BoxFuture<'_, anyhow::Result<Vec<Workload>>> {
        Box::pin(async move {
            let generation = self.calls.fetch_add(1, Ordering::SeqCst);
            time::sleep(Duration::from_millis(2)).await;
            Ok(vec![test::workload(&generation.to_string(), "web")])
        })
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_parallel_reads() {
    test::setup();
    let source = Arc::new(GenerationSource::default());
    let config = CacheConfig {
        staleness_threshold: Duration::from_secs(30),
        idle_horizon: Duration::from_millis(500),
        poll_interval: POLL_INTERVAL,
    };
    let cache = RefreshingCache::new(Arc::clone(&source), config);

    // a burst of readers on an empty cache is served by a single fetch
    let readers: Vec<_> = (0..64)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.read().await.map(|w| w[0].id.clone()) })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.await.unwrap().unwrap(), "0");
    }
    assert_eq!(source.calls(), 1);

    // keep reading and peeking from many threads while the refresher runs
    let started = Instant::now();
    let stop = started + Duration::from_secs(1);
    let calls_before = source.calls();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                while Instant::now() < stop {
                    cache.read().await.unwrap();
                    time::sleep(Duration::from_millis(5)).await;
                }
            })
        })
        .collect();
    let peekers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while Instant::now() < stop {
                    let snapshot = cache.peek().await.unwrap();
                    let generation: usize = snapshot.workloads[0].id.parse().unwrap();
                    seen.push((generation, snapshot.refreshed_at));
                    time::sleep(Duration::from_millis(1)).await;
                }
                seen
            })
        })
        .collect();

    for reader in readers {
        reader.await.unwrap();
    }
    let mut refreshed_at = BTreeMap::new();
    for peeker in peekers {
        for (generation, at) in peeker.await.unwrap() {
            match refreshed_at.entry(generation) {
                Entry::Occupied(entry) => assert_eq!(*entry.get(), at, "generation {generation}"),
                Entry::Vacant(entry) => {
                    entry.insert(at);
                }
            }
        }
    }

    // every generation was observed with exactly one timestamp, and later generations are newer
    let times: Vec<_> = refreshed_at.values().collect();
    assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));

    // a single refresher cannot fetch more often than once per poll interval
    let background_calls = (source.calls() - calls_before) as u128;
    let bound = started.elapsed().as_millis() / POLL_INTERVAL.as_millis() + 1;
    assert!(background_calls >= 1);
    assert!(background_calls <= bound, "{background_calls} > {bound}");

    // once reads stop, the refresher winds down and leaves the source alone
    time::sleep(Duration::from_millis(1500)).await;
    assert!(!cache.is_refreshing().await);
    let calls = source.calls();
    time::sleep(Duration::from_millis(600)).await;
    assert_eq!(source.calls(), calls);
}
