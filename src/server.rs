//! Process entry: run the service selected by the run mode
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api;
use crate::coordination::{CoordinatorServer, JsonFileStore, SystemTimeSource};
use crate::error::{MurmurError, Result};
use crate::relay::RelayBroker;
use crate::settings::{RunMode, Settings};

/// Run until `cancel` fires or a listener fails
pub async fn run(settings: Settings, cancel: CancellationToken) -> Result<()> {
    settings.validate()?;
    info!("Starting {} in {} mode", crate::settings::APP_NAME, settings.run_mode);
    match settings.run_mode {
        RunMode::Coordinator => run_coordinator(&settings, cancel).await,
        RunMode::Broker => run_broker(&settings, cancel).await,
    }
}

async fn run_coordinator(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let store = Arc::new(JsonFileStore::new(settings.snapshot_path.clone()));
    let server = CoordinatorServer::bind(settings, store, Arc::new(SystemTimeSource)).await?;
    let handle = server.handle();

    let http_shutdown = cancel.child_token();
    let http_task = match settings.http_addr()? {
        Some(http_addr) => {
            let listener = TcpListener::bind(http_addr).await.map_err(|e| {
                MurmurError::Transport(format!("Socket bind failed on {}: {}", http_addr, e))
            })?;
            info!("Status API listening on {}", http_addr);
            let router = api::api(handle);
            let shutdown = http_shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                {
                    error!("Status API failed: {}", e);
                }
            }))
        }
        None => None,
    };

    let outcome = server.run(cancel).await;

    http_shutdown.cancel();
    if let Some(task) = http_task {
        let _ = task.await;
    }
    outcome
}

async fn run_broker(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let broker = RelayBroker::bind(
        settings.relay_publish_addr()?,
        settings.relay_subscribe_addr()?,
        settings.relay_capacity,
    )
    .await?;
    broker.run(cancel).await
}
