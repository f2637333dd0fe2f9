//! JSON wire format spoken over the WebSocket.
//!
//! Inbound: one `{"user_id": ..}` authentication frame, then chat frames
//! `{"sender_id", "receiver_id", "content", "created_at"?}`.
//! Outbound: `connected` acknowledgment, delivered messages and
//! `delivery_confirmation` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dm::MessageId;
use crate::error::{HandshakeError, ValidationError};
use crate::ws::UserId;

/// First frame on every connection. No other field is interpreted.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub user_id: UserId,
}

/// Decode the authentication frame into the identity bound to the session.
pub fn parse_auth(payload: &[u8]) -> Result<UserId, HandshakeError> {
    let auth: AuthRequest = serde_json::from_slice(payload)
        .map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    if auth.user_id == 0 {
        return Err(HandshakeError::Malformed("missing user_id".to_string()));
    }
    Ok(auth.user_id)
}

/// Chat frame as the client sends it; absent fields decode to their zero value.
#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    sender_id: UserId,
    #[serde(default)]
    receiver_id: UserId,
    #[serde(default)]
    content: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// A validated chat message on its way to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Decode and validate a chat frame, stamping `created_at` when the client
/// left it out. Self-addressed messages are valid.
pub fn parse_inbound(payload: &[u8]) -> Result<InboundMessage, ValidationError> {
    let wire: WireMessage = serde_json::from_slice(payload)?;

    if wire.sender_id == 0 {
        return Err(ValidationError::MissingSender);
    }
    if wire.receiver_id == 0 {
        return Err(ValidationError::MissingReceiver);
    }
    if wire.content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }

    Ok(InboundMessage {
        sender_id: wire.sender_id,
        receiver_id: wire.receiver_id,
        content: wire.content,
        created_at: wire.created_at.unwrap_or_else(Utc::now),
    })
}

/// Payload written to the recipient's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl DeliveredMessage {
    pub fn new(id: MessageId, message: &InboundMessage) -> Self {
        Self {
            id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

/// Server-originated events, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once after a successful handshake.
    Connected {
        user_id: UserId,
        time: DateTime<Utc>,
    },
    /// Sent to the sender when the recipient's write succeeded.
    DeliveryConfirmation {
        message_time: DateTime<Utc>,
        recipient_id: UserId,
        delivered_at: DateTime<Utc>,
    },
}

impl ServerEvent {
    pub fn connected(user_id: UserId) -> Self {
        ServerEvent::Connected {
            user_id,
            time: Utc::now(),
        }
    }

    pub fn delivery_confirmation(message: &InboundMessage) -> Self {
        ServerEvent::DeliveryConfirmation {
            message_time: message.created_at,
            recipient_id: message.receiver_id,
            delivered_at: Utc::now(),
        }
    }
}
