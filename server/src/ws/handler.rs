use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::state::AppState;
use crate::ws::session;

/// GET /api/message
/// WebSocket upgrade endpoint. Authentication happens in-band: the first
/// frame must identify the user, see `session::authenticate`.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::serve_socket(socket, state))
}
