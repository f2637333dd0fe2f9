//! Error taxonomy for the relay.
//!
//! Handshake and validation errors stay at the session boundary. Transport
//! errors tear a connection down. Store errors drop the message before any
//! delivery attempt. None of them are retried.

use std::time::Duration;

use thiserror::Error;

use crate::dm::MessageId;

/// Failures of the durable message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("message {0} not found")]
    NotFound(MessageId),

    #[error("{0}")]
    Unavailable(String),
}

/// Failures writing to (or closing) a live connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(#[from] axum::Error),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection already released")]
    Released,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures while waiting for the authentication frame.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no authentication frame within {0:?}")]
    Timeout(Duration),

    #[error("malformed authentication frame: {0}")]
    Malformed(String),

    #[error("transport error during authentication: {0}")]
    Transport(#[from] axum::Error),

    #[error("connection closed before authenticating")]
    Closed,
}

/// Reasons an inbound chat frame is discarded.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("undecodable message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing sender_id")]
    MissingSender,

    #[error("missing receiver_id")]
    MissingReceiver,

    #[error("empty content")]
    EmptyContent,
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("read_timeout_secs ({read_timeout}) must be greater than ping_interval_secs ({ping_interval})")]
    DeadlineNotAbovePing { read_timeout: u64, ping_interval: u64 },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
