use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};

use workload_cache::RefreshingCache;
use workload_cache::config::Metrics;
use workload_cache::metrics::init_metrics;
use workload_cache_test::{self as test, MockSource};

/// Reads all datagrams that arrive at `socket` until it goes quiet.
fn receive_all(socket: &UdpSocket) -> Vec<String> {
    let mut received = Vec::new();
    let mut buf = [0; 1024];
    while let Ok(len) = socket.recv(&mut buf) {
        received.push(String::from_utf8_lossy(&buf[..len]).into_owned());
    }
    received
}

fn assert_emitted(received: &[String], name: &str, tags: &[&str]) {
    let found = received.iter().any(|line| {
        line.starts_with(&format!("workload_cache_test.{name}:"))
            && tags.iter().all(|tag| line.contains(tag))
    });
    assert!(found, "{name} {tags:?} not in {received:#?}");
}

// This is the only test configuring the global statsd client. Other tests running in parallel may
// report to the same socket, so assertions only check for the presence of metrics.
#[tokio::test(start_paused = true)]
async fn test_metrics_reported_to_statsd() {
    test::setup();
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();

    let config = Metrics {
        statsd: Some(socket.local_addr().unwrap().to_string()),
        prefix: "workload_cache_test".into(),
        custom_tags: BTreeMap::from([("node".to_owned(), "worker-1".to_owned())]),
    };
    init_metrics(&config).unwrap();

    let source = MockSource::new(vec![test::workload("1", "web")]);
    let cache = RefreshingCache::with_defaults(Arc::clone(&source));
    cache.read().await.unwrap();
    cache.read().await.unwrap();
    time::sleep(Duration::from_secs(3)).await;
    assert!(!cache.is_refreshing().await);

    source.fail(true);
    assert!(cache.force_refresh_if_older(Instant::now()).await.is_err());

    let received = receive_all(&socket);
    assert_emitted(&received, "workloads.read", &["fetched:true", "node:worker-1"]);
    assert_emitted(&received, "workloads.read", &["fetched:false"]);
    assert_emitted(&received, "workloads.fetch", &["path:read", "status:ok"]);
    assert_emitted(&received, "workloads.fetch", &["path:refresher", "status:ok"]);
    assert_emitted(&received, "workloads.fetch", &["path:force", "status:error"]);
    assert_emitted(&received, "workloads.fetch.duration", &["path:read"]);
    assert_emitted(&received, "workloads.snapshot.size", &[]);
    assert_emitted(&received, "workloads.refresher.started", &[]);
    assert_emitted(&received, "workloads.refresher.stopped", &[]);
}
