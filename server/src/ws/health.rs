use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::KeepaliveSettings;
use crate::ws::connection::{Connection, ShutdownReason};

/// Spawn the keepalive probe for an active connection.
///
/// Sends a ping every `ping_interval`. A failed or timed-out ping asks the
/// session to shut down. The session's read deadline is what actually
/// detects a silent peer: pongs renew it, so a peer that stops answering
/// lets it expire.
pub fn spawn_health_monitor(conn: Arc<Connection>, keepalive: KeepaliveSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping_timer = interval(keepalive.ping_interval);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            tokio::select! {
                _ = conn.wait_for_shutdown() => break,
                _ = ping_timer.tick() => {
                    if let Err(e) = conn.ping(keepalive.write_timeout).await {
                        tracing::warn!(
                            user_id = %conn.user_id(),
                            connection_id = %conn.id(),
                            error = %e,
                            "Ping failed, closing connection"
                        );
                        conn.shutdown(ShutdownReason::PingFailed);
                        break;
                    }
                }
            }
        }
    })
}
