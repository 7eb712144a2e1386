mod base;
mod servers;

use std::borrow::Cow;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use base::AboutResponse;
pub use servers::{ServersResponse, StatsResponse};

use crate::coordination::CoordinatorHandle;

/// Build the status API; every query goes through the coordinator loop
pub fn api(coordinator: CoordinatorHandle) -> Router {
    Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        .route(paths::coordinator::SERVERS, routing::get(servers::active_servers))
        .route(paths::coordinator::STATS, routing::get(servers::stats))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::coordination::{CoordinatorServer, ManualTimeSource, MemoryStore};
    use crate::settings::Settings;

    async fn running_coordinator() -> (CoordinatorHandle, CancellationToken) {
        let settings = Settings {
            listen_address: "127.0.0.1".to_string(),
            coordinator_port: 0,
            ..Settings::default()
        };
        let server = CoordinatorServer::bind(
            &settings,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualTimeSource::new(1_700_000_000.0)),
        )
        .await
        .unwrap();
        let handle = server.handle();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (handle, cancel)
    }

    async fn get(app: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let (handle, cancel) = running_coordinator().await;
        let (status, body) = get(api(handle), paths::base::HEALTH).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_about_names_the_role() {
        let (handle, cancel) = running_coordinator().await;
        let (status, body) = get(api(handle), paths::base::ABOUT).await;

        assert_eq!(status, StatusCode::OK);
        let parsed: AboutResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.name, crate::cli::APP_NAME);
        assert_eq!(parsed.mode, "coordinator");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_servers_empty_registry() {
        let (handle, cancel) = running_coordinator().await;
        let (status, body) = get(api(handle), paths::coordinator::SERVERS).await;

        assert_eq!(status, StatusCode::OK);
        let parsed: ServersResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.servers.is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stats() {
        let (handle, cancel) = running_coordinator().await;
        let (status, body) = get(api(handle), paths::coordinator::STATS).await;

        assert_eq!(status, StatusCode::OK);
        let parsed: StatsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.service.next_rank, 1);
        assert_eq!(parsed.service.requests_handled, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stopped_coordinator_is_unavailable() {
        let (handle, cancel) = running_coordinator().await;
        cancel.cancel();
        // Let the loop exit and drop its command receiver
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (status, _) = get(api(handle.clone()), paths::coordinator::STATS).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = get(api(handle), paths::base::HEALTH).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
