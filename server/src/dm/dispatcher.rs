//! The single persist-then-deliver decision point.
//!
//! All sessions push validated messages into one bounded channel; one task
//! drains it, so each message is persisted, looked up and written before the
//! next one is considered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dm::store::MessageStore;
use crate::dm::MessageId;
use crate::ws::protocol::{DeliveredMessage, InboundMessage, ServerEvent};
use crate::ws::registry::ConnectionRegistry;
use crate::ws::connection::ShutdownReason;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Persistence failed; nothing was delivered.
    Dropped,
    /// Persisted; recipient offline.
    Stored { message_id: MessageId },
    /// Written to the recipient. `confirmed` is whether the sender got a
    /// delivery confirmation.
    Delivered { message_id: MessageId, confirmed: bool },
    /// Persisted, but the write to the recipient failed and its connection
    /// was torn down.
    DeliveryFailed { message_id: MessageId },
}

pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
}

/// Create the inbound channel and spawn the dispatcher draining it.
pub fn spawn_dispatcher(
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
    capacity: usize,
) -> (mpsc::Sender<InboundMessage>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let dispatcher = Dispatcher::new(store, registry, write_timeout);
    let handle = tokio::spawn(dispatcher.run(rx));
    (tx, handle)
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            write_timeout,
        }
    }

    /// Consume messages until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<InboundMessage>) {
        tracing::info!("Message dispatcher started and waiting for messages");

        while let Some(message) = rx.recv().await {
            let (sender_id, receiver_id) = (message.sender_id, message.receiver_id);
            let outcome = self.dispatch(message).await;
            tracing::debug!(
                sender_id = %sender_id,
                receiver_id = %receiver_id,
                outcome = ?outcome,
                "Message dispatched"
            );
        }

        tracing::info!("Message dispatcher stopped");
    }

    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        // Durability precedes delivery: an unpersisted message is never sent.
        let message_id = match self.store.create(&message).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    sender_id = %message.sender_id,
                    receiver_id = %message.receiver_id,
                    error = %e,
                    "Failed to save message, dropping it"
                );
                return DispatchOutcome::Dropped;
            }
        };

        let Some(recipient) = self.registry.lookup(message.receiver_id) else {
            tracing::info!(
                receiver_id = %message.receiver_id,
                message_id = message_id,
                "Recipient offline, message saved to database only"
            );
            return DispatchOutcome::Stored { message_id };
        };

        let delivered = DeliveredMessage::new(message_id, &message);
        if let Err(e) = recipient.send_json(&delivered, self.write_timeout).await {
            tracing::warn!(
                receiver_id = %message.receiver_id,
                connection_id = %recipient.id(),
                message_id = message_id,
                error = %e,
                "Failed to deliver message, dropping recipient connection"
            );
            self.registry.unregister(&recipient);
            recipient.shutdown(ShutdownReason::DeliveryFailed);
            recipient.release(None, self.write_timeout).await;
            return DispatchOutcome::DeliveryFailed { message_id };
        }

        tracing::info!(
            receiver_id = %message.receiver_id,
            message_id = message_id,
            "Message delivered"
        );

        // Only feeds the undelivered-messages query; live delivery already happened.
        if let Err(e) = self.store.mark_delivered(message_id).await {
            tracing::warn!(
                message_id = message_id,
                error = %e,
                "Failed to mark message as delivered"
            );
        }

        let confirmed = self.confirm_to_sender(&message).await;
        DispatchOutcome::Delivered {
            message_id,
            confirmed,
        }
    }

    async fn confirm_to_sender(&self, message: &InboundMessage) -> bool {
        let Some(sender) = self.registry.lookup(message.sender_id) else {
            return false;
        };

        let confirmation = ServerEvent::delivery_confirmation(message);
        match sender.send_json(&confirmation, self.write_timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    sender_id = %message.sender_id,
                    error = %e,
                    "Failed to send delivery confirmation"
                );
                false
            }
        }
    }
}
