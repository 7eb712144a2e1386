use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use murmur::client::{CoordinationClient, HeartbeatAgent};
use murmur::coordination::{
    CoordinationRequest, CoordinationResponse, CoordinatorHandle, CoordinatorServer,
    ManualTimeSource, MemoryStore, RequestData,
};
use murmur::error::MurmurError;
use murmur::settings::Settings;
use murmur::transport::TcpConnection;

const T0: f64 = 1_700_000_000.0;
const TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    addr: std::net::SocketAddr,
    handle: CoordinatorHandle,
    time: Arc<ManualTimeSource>,
    cancel: CancellationToken,
}

async fn start_coordinator() -> Running {
    let settings = Settings {
        listen_address: "127.0.0.1".to_string(),
        coordinator_port: 0,
        http_port: None,
        ..Settings::default()
    };
    let time = Arc::new(ManualTimeSource::new(T0));
    let server = CoordinatorServer::bind(&settings, Arc::new(MemoryStore::new()), time.clone())
        .await
        .unwrap();
    let running = Running {
        addr: server.local_addr(),
        handle: server.handle(),
        time,
        cancel: CancellationToken::new(),
    };
    tokio::spawn(server.run(running.cancel.clone()));
    running
}

#[tokio::test]
async fn test_ranks_are_sequential_and_idempotent() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);

    for (expected, identity) in ["a", "b", "c", "d"].iter().enumerate() {
        assert_eq!(client.rank(identity).await.unwrap(), expected as u64 + 1);
    }
    // Asking again returns the same rank
    assert_eq!(client.rank("b").await.unwrap(), 2);
    assert_eq!(coordinator.handle.stats().await.unwrap().next_rank, 5);

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_list_respects_active_window() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);

    client.rank("early").await.unwrap();
    coordinator.time.advance(Duration::from_secs(31));
    client.rank("late").await.unwrap();

    let listed = client.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].identity, "late");
    assert_eq!(listed[0].rank, 2);

    // A heartbeat brings the early server back into the window
    client.heartbeat("early").await.unwrap();
    let ranks: Vec<u64> = client.list().await.unwrap().iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![1, 2]);

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_heartbeat_for_unknown_identity_is_acknowledged() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);

    client.heartbeat("never-registered").await.unwrap();
    assert!(client.list().await.unwrap().is_empty());

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_evicted_server_gets_new_rank() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);

    assert_eq!(client.rank("server-1").await.unwrap(), 1);
    coordinator.time.advance(Duration::from_secs(61));
    coordinator.handle.evict_stale().await.unwrap();

    assert_eq!(client.rank("server-1").await.unwrap(), 2);
    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_client_clock_moves_past_server_clock() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);

    client.rank("a").await.unwrap();
    client.list().await.unwrap();
    let server_clock = coordinator.handle.stats().await.unwrap().clock;
    // Every reply is observed, so the client is always ahead of what it saw
    assert!(client.clock().current() >= server_clock);
    assert!(client.clock().current() > 2);

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_unknown_service_and_missing_identity_keep_connection_usable() {
    let coordinator = start_coordinator().await;
    let mut conn = TcpConnection::connect(coordinator.addr, TIMEOUT).await.unwrap();

    let unknown = CoordinationRequest {
        service: "login".to_string(),
        data: RequestData::default(),
    };
    let reply = conn.request(&unknown.encode().unwrap()).await.unwrap();
    let response = CoordinationResponse::decode(&reply).unwrap();
    assert_eq!(response.service, "login");
    assert!(response.is_error());

    let anonymous = CoordinationRequest {
        service: "rank".to_string(),
        data: RequestData::default(),
    };
    let reply = conn.request(&anonymous.encode().unwrap()).await.unwrap();
    let response = CoordinationResponse::decode(&reply).unwrap();
    assert!(response.is_error());
    assert_eq!(response.data.rank, None);

    let garbage = conn.request(b"\xc1").await.unwrap();
    let response = CoordinationResponse::decode(&garbage).unwrap();
    assert_eq!(response.service, "unknown");

    // Same connection still serves valid requests
    let list = CoordinationRequest {
        service: "list".to_string(),
        data: RequestData::default(),
    };
    let reply = conn.request(&list.encode().unwrap()).await.unwrap();
    let response = CoordinationResponse::decode(&reply).unwrap();
    assert_eq!(response.data.list, Some(vec![]));
    assert!(!response.is_error());

    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_remote_errors_surface_in_client() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);

    let result = client.rank("  ").await;
    assert!(matches!(result, Err(MurmurError::Remote(_))));
    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_client_fails_once_coordinator_stops() {
    let coordinator = start_coordinator().await;
    let mut client = CoordinationClient::new(coordinator.addr, TIMEOUT);
    client.rank("a").await.unwrap();

    coordinator.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.list().await.is_err());
}

#[tokio::test]
async fn test_heartbeat_agent_registers_and_finds_coordinator() {
    let coordinator = start_coordinator().await;
    let mut other = CoordinationClient::new(coordinator.addr, TIMEOUT);
    other.rank("first").await.unwrap();

    let agent = HeartbeatAgent::new(
        "second",
        CoordinationClient::new(coordinator.addr, TIMEOUT),
        Duration::from_millis(50),
    );
    let mut view = agent.subscribe();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(agent.run(cancel.clone()));

    let fleet = tokio::time::timeout(
        TIMEOUT,
        view.wait_for(|fleet| fleet.coordinator.is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(fleet.rank, Some(2));
    // Highest active rank is the agent itself
    assert_eq!(fleet.coordinator.unwrap().identity, "second");
    assert_eq!(fleet.servers.len(), 2);

    cancel.cancel();
    running.await.unwrap();
    coordinator.cancel.cancel();
}

#[tokio::test]
async fn test_heartbeat_agent_registers_again_after_eviction() {
    let coordinator = start_coordinator().await;
    let agent = HeartbeatAgent::new(
        "solo",
        CoordinationClient::new(coordinator.addr, TIMEOUT),
        Duration::from_millis(200),
    );
    let mut view = agent.subscribe();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(agent.run(cancel.clone()));

    tokio::time::timeout(TIMEOUT, view.wait_for(|fleet| fleet.rank == Some(1)))
        .await
        .unwrap()
        .unwrap();

    // A long partition: the coordinator forgets us between two heartbeats
    coordinator.time.advance(Duration::from_secs(90));
    coordinator.handle.evict_stale().await.unwrap();
    assert_eq!(coordinator.handle.stats().await.unwrap().servers, 0);

    // The next list refresh notices and the agent takes a fresh rank
    let fleet = tokio::time::timeout(
        Duration::from_secs(5),
        view.wait_for(|fleet| fleet.rank == Some(2)),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(fleet.coordinator.unwrap().identity, "solo");
    let active = coordinator.handle.active_servers().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rank, 2);

    cancel.cancel();
    running.await.unwrap();
    coordinator.cancel.cancel();
}
