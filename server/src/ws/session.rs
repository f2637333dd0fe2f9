//! Per-connection session: authentication handshake, read loop, teardown.
//!
//! Phases run `Connecting → Authenticating → Active → Closing → Closed`.
//! A failed handshake jumps straight to `Closed` without registering.
//! Everything that can end an active session (read error, expired deadline,
//! client close, eviction, failed ping, failed delivery) funnels into one
//! teardown that unregisters the connection and releases the socket.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};

use crate::error::{HandshakeError, TransportError};
use crate::state::AppState;
use crate::ws::connection::{Connection, FrameSink, ShutdownReason, CLOSE_REPLACED};
use crate::ws::health::spawn_health_monitor;
use crate::ws::protocol::{self, ServerEvent};
use crate::ws::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// Why an active session ended.
#[derive(Debug)]
pub enum CloseReason {
    ReadError(axum::Error),
    DeadlineExpired,
    ClientClosed,
    StreamEnded,
    Shutdown(ShutdownReason),
    DispatcherUnavailable,
    AckFailed(TransportError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ReadError(e) => write!(f, "read error: {e}"),
            CloseReason::DeadlineExpired => f.write_str("read deadline expired"),
            CloseReason::ClientClosed => f.write_str("closed by client"),
            CloseReason::StreamEnded => f.write_str("stream ended"),
            CloseReason::Shutdown(reason) => write!(f, "shutdown requested: {reason:?}"),
            CloseReason::DispatcherUnavailable => f.write_str("dispatcher unavailable"),
            CloseReason::AckFailed(e) => write!(f, "acknowledgment failed: {e}"),
        }
    }
}

impl CloseReason {
    /// Close frame to send on release, if the socket is still worth writing to.
    fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            CloseReason::Shutdown(ShutdownReason::Evicted) => Some(CloseFrame {
                code: CLOSE_REPLACED,
                reason: "replaced by newer connection".into(),
            }),
            CloseReason::DeadlineExpired => Some(CloseFrame {
                code: close_code::AWAY,
                reason: "read deadline expired".into(),
            }),
            CloseReason::DispatcherUnavailable => Some(CloseFrame {
                code: close_code::AGAIN,
                reason: "server shutting down".into(),
            }),
            _ => None,
        }
    }
}

/// Entry point for an upgraded socket.
pub async fn serve_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    run_session(Box::pin(sink), stream, state).await;
}

/// Drive one connection from handshake to close.
pub async fn run_session<S>(mut sink: FrameSink, mut stream: S, state: AppState)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let keepalive = state.keepalive;
    let mut phase = SessionPhase::Connecting;
    transition(&mut phase, SessionPhase::Authenticating, None);

    let user_id = match authenticate(&mut stream, keepalive.auth_timeout).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket authentication failed");
            let _ = timeout(keepalive.write_timeout, sink.close()).await;
            transition(&mut phase, SessionPhase::Closed, None);
            return;
        }
    };

    let conn = Connection::new(user_id, sink);
    tracing::info!(
        user_id = %user_id,
        connection_id = %conn.id(),
        "User connected via WebSocket"
    );

    let mut session = Session {
        conn,
        state,
        phase,
    };
    let reason = session.activate(&mut stream).await;
    session.teardown(reason).await;
}

/// Wait for the authentication frame and return the identity it carries.
/// Control frames are skipped but do not extend the timeout.
pub async fn authenticate<S>(stream: &mut S, auth_timeout: Duration) -> Result<UserId, HandshakeError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let deadline = Instant::now() + auth_timeout;
    loop {
        let frame = timeout_at(deadline, stream.next())
            .await
            .map_err(|_| HandshakeError::Timeout(auth_timeout))?;

        match frame {
            None | Some(Ok(Message::Close(_))) => return Err(HandshakeError::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => return protocol::parse_auth(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => return protocol::parse_auth(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
        }
    }
}

fn transition(phase: &mut SessionPhase, next: SessionPhase, user_id: Option<UserId>) {
    tracing::trace!(user_id = ?user_id, from = ?*phase, to = ?next, "Session phase change");
    *phase = next;
}

struct Session {
    conn: Arc<Connection>,
    state: AppState,
    phase: SessionPhase,
}

impl Session {
    fn enter(&mut self, next: SessionPhase) {
        transition(&mut self.phase, next, Some(self.conn.user_id()));
    }

    /// Register, acknowledge, then read until something ends the session.
    async fn activate<S>(&mut self, stream: &mut S) -> CloseReason
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        // Holding the writer across registration keeps any delivery the
        // dispatcher attempts from landing before the acknowledgment.
        let conn = self.conn.clone();
        let mut writer = conn.writer().await;
        self.state.registry.register(conn.clone());
        self.enter(SessionPhase::Active);

        let ack = ServerEvent::connected(conn.user_id());
        let acked = writer
            .send_json(&ack, self.state.keepalive.write_timeout)
            .await;
        drop(writer);
        if let Err(e) = acked {
            return CloseReason::AckFailed(e);
        }

        let health = spawn_health_monitor(self.conn.clone(), self.state.keepalive);
        let reason = self.read_loop(stream).await;
        health.abort();
        reason
    }

    async fn read_loop<S>(&self, stream: &mut S) -> CloseReason
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let read_timeout = self.state.keepalive.read_timeout;
        let mut deadline = Instant::now() + read_timeout;

        loop {
            let frame = tokio::select! {
                biased;
                reason = self.conn.wait_for_shutdown() => return CloseReason::Shutdown(reason),
                frame = timeout_at(deadline, stream.next()) => frame,
            };

            let msg = match frame {
                Err(_) => return CloseReason::DeadlineExpired,
                Ok(None) => return CloseReason::StreamEnded,
                Ok(Some(Err(e))) => return CloseReason::ReadError(e),
                Ok(Some(Ok(msg))) => msg,
            };

            // Any inbound frame, pongs included, proves the peer is alive.
            deadline = Instant::now() + read_timeout;
            self.conn.touch();

            match msg {
                Message::Text(text) => {
                    if let Err(reason) = self.forward(text.as_str().as_bytes()).await {
                        return reason;
                    }
                }
                Message::Binary(data) => {
                    if let Err(reason) = self.forward(&data).await {
                        return reason;
                    }
                }
                Message::Pong(_) => {
                    tracing::trace!(user_id = %self.conn.user_id(), "Pong received");
                }
                // The transport answers pings on its own
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %self.conn.user_id(),
                        reason = ?frame,
                        "Client initiated close"
                    );
                    return CloseReason::ClientClosed;
                }
            }
        }
    }

    /// Validate a chat frame and hand it to the dispatcher. Invalid frames are
    /// logged and dropped; the session stays active.
    async fn forward(&self, payload: &[u8]) -> Result<(), CloseReason> {
        let message = match protocol::parse_inbound(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.conn.user_id(),
                    error = %e,
                    "Discarding invalid message"
                );
                return Ok(());
            }
        };

        let (sender_id, receiver_id) = (message.sender_id, message.receiver_id);
        // A full queue must not hide an eviction or a failed ping.
        let sent = tokio::select! {
            biased;
            reason = self.conn.wait_for_shutdown() => return Err(CloseReason::Shutdown(reason)),
            sent = self.state.inbound_tx.send(message) => sent,
        };
        if sent.is_err() {
            tracing::error!(
                user_id = %self.conn.user_id(),
                "Dispatcher is gone, closing connection"
            );
            return Err(CloseReason::DispatcherUnavailable);
        }

        tracing::debug!(
            sender_id = %sender_id,
            receiver_id = %receiver_id,
            "Message queued for delivery"
        );
        Ok(())
    }

    async fn teardown(&mut self, reason: CloseReason) {
        self.enter(SessionPhase::Closing);

        self.state.registry.unregister(&self.conn);
        self.conn
            .release(reason.close_frame(), self.state.keepalive.write_timeout)
            .await;

        self.enter(SessionPhase::Closed);
        tracing::info!(
            user_id = %self.conn.user_id(),
            connection_id = %self.conn.id(),
            last_activity = %self.conn.last_activity(),
            reason = %reason,
            "WebSocket session closed"
        );
    }
}
