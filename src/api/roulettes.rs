use super::ApiResponse;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use spinfeed::error::{AppError, Result};
use spinfeed::{DetailedRoulette, EntityFilter, RouletteEntity, SpinResult, SpinStats};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Comma-separated ids or names.
    pub only: Option<String>,
    /// Include only tables currently running.
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub id: String,
    pub display_name: String,
    pub history: Vec<SpinResult>,
    pub stats: SpinStats,
}

/// GET /api/roulettes
async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ApiResponse<Vec<RouletteEntity>>> {
    let mut roulettes = state.client.get_all_roulettes();

    if let Some(only) = query.only.as_deref() {
        let filter = EntityFilter::new(only.split(','));
        if !filter.is_empty() {
            roulettes = filter.apply(&roulettes);
        }
    }
    if query.active {
        roulettes.retain(|r| r.is_active);
    }

    Json(ApiResponse::cached(roulettes))
}

/// GET /api/roulettes/:key/history
async fn history(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<HistoryResponse>>> {
    let roulette = state
        .client
        .get_roulette(&key)
        .ok_or_else(|| AppError::NotFound(format!("roulette '{}'", key)))?;

    let stats = SpinStats::from_history(&roulette.history);
    let mut history = roulette.history;
    if let Some(limit) = query.limit {
        history.truncate(limit);
    }

    Ok(Json(ApiResponse::cached(HistoryResponse {
        id: roulette.id,
        display_name: roulette.display_name,
        history,
        stats,
    })))
}

/// GET /api/roulettes/:key/detailed
async fn detailed(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<DetailedRoulette>>> {
    let detailed = state.client.fetch_detailed(&key).await?;
    Ok(Json(ApiResponse::fresh(detailed)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/:key/history", get(history))
        .route("/:key/detailed", get(detailed))
}
