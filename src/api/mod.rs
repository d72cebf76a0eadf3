pub mod health;
pub mod roulettes;
pub mod status;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub meta: ApiMeta,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    /// Served from the local cache rather than a fresh fetch.
    pub cached: bool,
}

impl<T> ApiResponse<T> {
    pub fn cached(data: T) -> Self {
        Self {
            data,
            meta: ApiMeta { cached: true },
        }
    }

    pub fn fresh(data: T) -> Self {
        Self {
            data,
            meta: ApiMeta { cached: false },
        }
    }
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(status::router())
        .nest("/api/roulettes", roulettes::router())
}
