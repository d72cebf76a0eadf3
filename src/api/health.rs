use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    stream_connected: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.client.get_status().connected;
    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        stream_connected: connected,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
