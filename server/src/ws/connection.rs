use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::TransportError;
use crate::ws::UserId;

/// Write half of a WebSocket, boxed so tests can substitute their own sink.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Close code sent to a connection replaced by a newer login for the same user.
pub const CLOSE_REPLACED: u16 = 4000;

/// Unique per accepted connection (UUIDv7, so ids sort by accept time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why something outside the session asked it to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A newer connection registered for the same user.
    Evicted,
    /// The dispatcher failed to write a message to this connection.
    DeliveryFailed,
    /// The health monitor could not send a ping.
    PingFailed,
}

/// A live, authenticated connection.
///
/// Owned by its session; the registry and the dispatcher only hold `Arc`
/// references. Every write goes through `sink`, so frames to one connection
/// are never interleaved.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    sink: Mutex<FrameSink>,
    shutdown: watch::Sender<Option<ShutdownReason>>,
    released: AtomicBool,
    last_activity_ms: AtomicI64,
}

impl Connection {
    pub fn new(user_id: UserId, sink: FrameSink) -> Arc<Self> {
        let (shutdown, _) = watch::channel(None);
        Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            sink: Mutex::new(sink),
            shutdown,
            released: AtomicBool::new(false),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Record inbound activity on this connection.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Serialize `event` as JSON and write it as a text frame.
    pub async fn send_json<T: Serialize>(
        &self,
        event: &T,
        write_timeout: Duration,
    ) -> Result<(), TransportError> {
        let text = serde_json::to_string(event)?;
        self.send(Message::Text(text.into()), write_timeout).await
    }

    /// Transport-level keepalive probe.
    pub async fn ping(&self, write_timeout: Duration) -> Result<(), TransportError> {
        self.send(Message::Ping(Vec::new().into()), write_timeout)
            .await
    }

    async fn send(&self, msg: Message, write_timeout: Duration) -> Result<(), TransportError> {
        if self.is_released() {
            return Err(TransportError::Released);
        }
        let mut sink = self.sink.lock().await;
        write_frame(&mut sink, msg, write_timeout).await
    }

    /// Exclusive access to the write side. Every other write, dispatcher
    /// deliveries included, waits until the returned writer is dropped.
    pub async fn writer(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            conn: self,
            sink: self.sink.lock().await,
        }
    }

    /// Ask the owning session to tear down. Only the first reason is kept.
    /// Never blocks and never touches the socket, so it is safe to call with
    /// the registry lock held.
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        *self.shutdown.borrow()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<Option<ShutdownReason>> {
        self.shutdown.subscribe()
    }

    /// Resolves with the reason once shutdown has been requested. Holds no
    /// borrow of the watch value across an await point, so it can sit in a
    /// `select!` whose other arms await.
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        let mut rx = self.shutdown.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                // The sender lives in `self`, so this cannot happen while borrowed.
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Close the underlying socket. Runs at most once per connection; later
    /// calls return `false` without touching the transport.
    pub async fn release(&self, frame: Option<CloseFrame>, write_timeout: Duration) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut sink = self.sink.lock().await;
        let closed = timeout(write_timeout, async {
            if frame.is_some() {
                sink.send(Message::Close(frame)).await?;
            }
            sink.close().await
        })
        .await;

        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(
                    connection_id = %self.id,
                    user_id = %self.user_id,
                    error = %e,
                    "Close on release failed"
                );
            }
            Err(_) => {
                tracing::debug!(
                    connection_id = %self.id,
                    user_id = %self.user_id,
                    "Close on release timed out"
                );
            }
        }
        true
    }
}

/// Locked write side of a [`Connection`], see [`Connection::writer`].
pub struct ConnectionWriter<'a> {
    conn: &'a Connection,
    sink: MutexGuard<'a, FrameSink>,
}

impl ConnectionWriter<'_> {
    pub async fn send_json<T: Serialize>(
        &mut self,
        event: &T,
        write_timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.conn.is_released() {
            return Err(TransportError::Released);
        }
        let text = serde_json::to_string(event)?;
        write_frame(&mut self.sink, Message::Text(text.into()), write_timeout).await
    }
}

async fn write_frame(
    sink: &mut FrameSink,
    msg: Message,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    timeout(write_timeout, sink.send(msg))
        .await
        .map_err(|_| TransportError::Timeout(write_timeout))??;
    Ok(())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("released", &self.is_released())
            .finish()
    }
}
