use super::ApiResponse;
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use spinfeed::error::Result;
use spinfeed::{AccessCredential, ConnectionStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub connection: ConnectionStatus,
    pub roulettes: usize,
    pub subscribers: usize,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub roulettes: usize,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub accepted: bool,
    pub reconnecting: bool,
}

/// GET /api/status
async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    let client = &state.client;
    Json(ApiResponse::cached(StatusResponse {
        connection: client.get_status(),
        roulettes: client.get_all_roulettes().len(),
        subscribers: client.subscriber_count(),
        stream_url: state.config.stream.url.clone(),
    }))
}

/// POST /api/refresh
async fn refresh(State(state): State<AppState>) -> Result<Json<ApiResponse<RefreshResponse>>> {
    let roulettes = state.client.force_update().await?;
    Ok(Json(ApiResponse::fresh(RefreshResponse {
        roulettes: roulettes.len(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })))
}

/// POST /api/access
async fn supply_access(
    State(state): State<AppState>,
    Json(credential): Json<AccessCredential>,
) -> Result<Json<ApiResponse<AccessResponse>>> {
    let reconnecting = state.client.supply_credential(credential)?;
    Ok(Json(ApiResponse::fresh(AccessResponse {
        accepted: true,
        reconnecting,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/refresh", post(refresh))
        .route("/api/access", post(supply_access))
}
