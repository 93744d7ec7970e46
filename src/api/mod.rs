//! Management API module
//!
//! Small HTTP surface next to the WebSocket relay:
//! - Liveness check
//! - Session and page statistics
//!
//! Built with Axum, sharing the relay's application state.

pub mod response;

use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::response::{ApiResponse, PageStats, StatsResponse};
use crate::{AppState, VERSION};

/// API version prefix
pub const API_VERSION: &str = "v1";

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats));

    Router::new()
        .nest(&format!("/api/{}", API_VERSION), api_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Session statistics endpoint
async fn stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatsResponse>> {
    let counts = state.registry.page_counts();
    let stats = StatsResponse {
        server: state.config.server_name.clone(),
        version: VERSION.to_string(),
        sessions: state.registry.len(),
        unscoped: counts.unscoped,
        pages: counts
            .pages
            .into_iter()
            .map(|(page_id, sessions)| PageStats { page_id, sessions })
            .collect(),
    };

    Json(ApiResponse::success("Relay statistics", stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use tokio::sync::{broadcast, mpsc};

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[tokio::test]
    async fn test_stats_counts_pages() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(AppState::new(ServerConfig::default(), shutdown_tx));

        let mut receivers = Vec::new();
        for page in [Some("docs"), Some("docs"), None] {
            let (tx, rx) = mpsc::channel(1);
            receivers.push(rx);
            let session = state
                .registry
                .open_session("127.0.0.1:9000".parse().unwrap(), tx);
            if let Some(page) = page {
                session.adopt_page(page.to_string());
            }
        }

        let Json(response) = stats(State(state)).await;
        let data = response.data.unwrap();
        assert!(response.success);
        assert_eq!(data.sessions, 3);
        assert_eq!(data.unscoped, 1);
        assert_eq!(data.pages.len(), 1);
        assert_eq!(data.pages[0].page_id, "docs");
        assert_eq!(data.pages[0].sessions, 2);

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["pages"][0]["pageId"], "docs");
    }
}
