//! Manager lifecycle over real streams: update swaps graphs and
//! hot-replaces resources without losing in-flight borrows.

use std::time::Duration;

use weir_engine::config::parse_stream_str;
use weir_engine::metrics::noop;
use weir_engine::{Environment, StreamManager, StreamState};

fn counting_config(interval: &str) -> weir_engine::config::StreamConfig {
    parse_stream_str(&format!(
        r#"
input:
  generate:
    mapping: tick ${{! count("n") }}
    interval: {interval}
pipeline:
  processors:
    - cache:
        resource: store
        operator: set
        key: ${{! content() }}
output:
  drop: {{}}
cache_resources:
  - label: store
    memory: {{}}
shutdown_timeout: 2s
"#
    ))
    .unwrap()
}

#[tokio::test]
async fn update_swaps_graph_and_replaces_resources() {
    let mgr = StreamManager::new(Environment::with_defaults(), noop());
    mgr.create("ticker", &counting_config("5ms")).await.unwrap();
    assert_eq!(
        mgr.read("ticker").await.unwrap().state,
        StreamState::Running
    );

    // Let a few messages land in the cache resource.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let resources = mgr.resources();
    assert!(resources.probe_cache("store").await);

    // Update re-declares the same cache label: replace, not collide.
    mgr.update("ticker", &counting_config("7ms"), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(
        mgr.read("ticker").await.unwrap().state,
        StreamState::Running
    );

    // The replaced instance starts empty and keeps filling from the new
    // graph.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cache = resources.access_cache("store").await.unwrap();
    assert!(cache.get("tick 1").await.is_ok());
    drop(cache);

    assert!(mgr.stop(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn delete_drains_within_timeout() {
    let mgr = StreamManager::new(Environment::with_defaults(), noop());
    mgr.create("short", &counting_config("5ms")).await.unwrap();
    mgr.delete("short", Duration::from_secs(2)).await.unwrap();
    assert!(mgr.streams().await.is_empty());
    assert!(mgr.stop(Duration::from_secs(1)).await);
}
