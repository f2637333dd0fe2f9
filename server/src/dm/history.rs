//! REST endpoints for reading stored messages.
//!
//! Live delivery happens over the WebSocket; these are how a client catches
//! up on what it missed while offline.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::db::models::PersistedMessage;
use crate::error::StoreError;
use crate::state::AppState;
use crate::ws::UserId;

/// Default page size for conversation history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for conversation history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub user_id_1: UserId,
    #[serde(default)]
    pub user_id_2: UserId,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl HistoryQuery {
    fn page(&self) -> (u32, u32) {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (limit, self.offset.unwrap_or(0))
    }
}

fn internal_error(e: StoreError) -> StatusCode {
    tracing::error!(error = %e, "Message store query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// GET /api/messages/history?user_id_1=&user_id_2=&limit=&offset=
/// Messages between two users in either direction, newest first.
pub async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<PersistedMessage>>, StatusCode> {
    if params.user_id_1 == 0 || params.user_id_2 == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (limit, offset) = params.page();
    let messages = state
        .store
        .get_conversation(params.user_id_1, params.user_id_2, limit, offset)
        .await
        .map_err(internal_error)?;

    Ok(Json(messages))
}

/// GET /api/messages/undelivered/{user_id}
/// Messages addressed to the user that were never delivered live, oldest first.
pub async fn get_undelivered(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<PersistedMessage>>, StatusCode> {
    if user_id == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let messages = state
        .store
        .get_undelivered(user_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(messages))
}
