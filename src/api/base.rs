use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cli::{APP_NAME, APP_VERSION};
use crate::coordination::CoordinatorHandle;
use crate::error::Result;
use crate::settings::RunMode;

pub async fn root() -> String {
    format!("{} {} ({})", APP_NAME, APP_VERSION, RunMode::Coordinator)
}

/// Healthy only while the coordinator loop still answers commands
#[instrument(skip(state), level = "debug")]
pub async fn health(State(state): State<CoordinatorHandle>) -> Result<&'static str> {
    state.stats().await?;
    Ok("OK")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AboutResponse {
    pub name: String,
    pub version: String,
    pub mode: String,
}

#[instrument]
pub async fn about() -> axum::Json<AboutResponse> {
    axum::Json(AboutResponse {
        name: APP_NAME.to_string(),
        version: APP_VERSION.to_string(),
        mode: RunMode::Coordinator.to_string(),
    })
}
