use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::KeepaliveSettings;
use crate::dm::store::MessageStore;
use crate::ws::protocol::InboundMessage;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Durable message storage
    pub store: Arc<dyn MessageStore>,
    /// Active WebSocket connection per user
    pub registry: Arc<ConnectionRegistry>,
    /// Producer side of the dispatcher's inbound queue
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub keepalive: KeepaliveSettings,
}
