use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::{event, instrument, Level};

use crate::coordination::{CoordinatorHandle, ServerEntry, ServiceStats};
use crate::error::Result;
use crate::transport::FrozenReceiverStats;

#[derive(Debug, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub service: ServiceStats,
    pub connections: FrozenReceiverStats,
}

#[instrument(skip(state), level = "debug")]
pub async fn active_servers(
    State(state): State<CoordinatorHandle>,
) -> Result<axum::Json<ServersResponse>> {
    let servers = state.active_servers().await.map_err(|err| {
        event!(
            Level::ERROR,
            message = "Failed listing active servers",
            err = format!("{:?}", err)
        );
        err
    })?;
    Ok(axum::Json(ServersResponse { servers }))
}

#[instrument(skip(state), level = "debug")]
pub async fn stats(State(state): State<CoordinatorHandle>) -> Result<axum::Json<StatsResponse>> {
    let service = state.stats().await?;
    Ok(axum::Json(StatsResponse {
        service,
        connections: state.receiver_stats(),
    }))
}
