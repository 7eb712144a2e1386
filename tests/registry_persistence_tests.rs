use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use murmur::client::CoordinationClient;
use murmur::coordination::{
    CoordinatorServer, JsonFileStore, ManualTimeSource, ServerRegistry, SnapshotStore, TimeSource,
};
use murmur::settings::Settings;

const T0: f64 = 1_700_000_000.0;

#[tokio::test]
async fn test_reload_restores_records_and_counter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reference_data.json");
    let time = Arc::new(ManualTimeSource::new(T0));

    let mut registry = ServerRegistry::load(Arc::new(JsonFileStore::new(&path)), time.clone()).await;
    assert_eq!(registry.register("a").await, 1);
    assert_eq!(registry.register("b").await, 2);
    drop(registry);

    let mut reloaded = ServerRegistry::load(Arc::new(JsonFileStore::new(&path)), time.clone()).await;
    assert_eq!(reloaded.next_rank(), 3);
    assert_eq!(reloaded.get("a").unwrap().rank, 1);
    assert_eq!(reloaded.get("b").unwrap().rank, 2);
    assert_eq!(reloaded.register("c").await, 3);
}

#[tokio::test]
async fn test_eviction_is_persisted_and_rank_not_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reference_data.json");
    let time = Arc::new(ManualTimeSource::new(T0));

    let mut registry = ServerRegistry::load(Arc::new(JsonFileStore::new(&path)), time.clone()).await;
    registry.register("a").await;
    registry.register("b").await;
    time.advance(Duration::from_secs(90));
    registry.register("c").await;

    let evicted = registry
        .evict_stale(time.now(), Duration::from_secs(60))
        .await;
    assert_eq!(evicted, vec!["a".to_string(), "b".to_string()]);

    let snapshot = JsonFileStore::new(&path).load().await.unwrap().unwrap();
    assert_eq!(snapshot.servers.len(), 1);
    assert!(snapshot.servers.contains_key("c"));
    assert_eq!(snapshot.next_rank, 4);
}

#[tokio::test]
async fn test_heartbeat_is_not_flushed_until_next_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reference_data.json");
    let time = Arc::new(ManualTimeSource::new(T0));

    let mut registry = ServerRegistry::load(Arc::new(JsonFileStore::new(&path)), time.clone()).await;
    registry.register("a").await;
    time.advance(Duration::from_secs(10));
    assert!(registry.heartbeat("a"));

    let snapshot = JsonFileStore::new(&path).load().await.unwrap().unwrap();
    assert_eq!(snapshot.servers["a"].last_heartbeat, T0);

    registry.save().await;
    let snapshot = JsonFileStore::new(&path).load().await.unwrap().unwrap();
    assert_eq!(snapshot.servers["a"].last_heartbeat, T0 + 10.0);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reference_data.json");
    std::fs::write(&path, "{\"servers\": [1, 2").unwrap();

    let time = Arc::new(ManualTimeSource::new(T0));
    let mut registry = ServerRegistry::load(Arc::new(JsonFileStore::new(&path)), time).await;
    assert!(registry.is_empty());
    assert_eq!(registry.register("a").await, 1);
}

#[tokio::test]
async fn test_unwritable_snapshot_does_not_fail_requests() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the file should be makes every rename fail
    let path = dir.path().join("occupied");
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();

    let time = Arc::new(ManualTimeSource::new(T0));
    let mut registry = ServerRegistry::load(Arc::new(JsonFileStore::new(&path)), time).await;
    assert_eq!(registry.register("a").await, 1);
    assert_eq!(registry.register("b").await, 2);
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_coordinator_flushes_snapshot_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data/reference_data.json");
    let settings = Settings {
        listen_address: "127.0.0.1".to_string(),
        coordinator_port: 0,
        http_port: None,
        snapshot_path: path.clone(),
        ..Settings::default()
    };
    let time = Arc::new(ManualTimeSource::new(T0));

    let server = CoordinatorServer::bind(
        &settings,
        Arc::new(JsonFileStore::new(&path)),
        time.clone(),
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(server.run(cancel.clone()));

    let mut client = CoordinationClient::new(addr, Duration::from_secs(2));
    client.rank("server-1").await.unwrap();
    time.advance(Duration::from_secs(5));
    client.heartbeat("server-1").await.unwrap();

    cancel.cancel();
    running.await.unwrap().unwrap();

    let snapshot = JsonFileStore::new(&path).load().await.unwrap().unwrap();
    // The heartbeat only reached disk through the shutdown flush
    assert_eq!(snapshot.servers["server-1"].last_heartbeat, T0 + 5.0);
    assert_eq!(snapshot.next_rank, 2);
}
