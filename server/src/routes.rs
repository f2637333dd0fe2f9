use axum::{extract::State, routing::get, Json, Router};

use crate::dm::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /health -- Liveness plus the number of users currently online.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "online": state.registry.online_count(),
    }))
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/message", get(ws_handler::ws_upgrade))
        .route("/api/messages/history", get(history::get_history))
        .route(
            "/api/messages/undelivered/{user_id}",
            get(history::get_undelivered),
        )
        .with_state(state)
}
