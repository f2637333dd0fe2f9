//! Durable storage for direct messages.
//!
//! The dispatcher only relies on `create` succeeding before it attempts
//! delivery. `mark_delivered` is best-effort metadata consumed by the
//! undelivered-messages query.

use async_trait::async_trait;
use chrono::Utc;

use crate::db::models::{to_millis, PersistedMessage};
use crate::db::DbPool;
use crate::dm::MessageId;
use crate::error::StoreError;
use crate::ws::protocol::InboundMessage;
use crate::ws::UserId;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message with `is_delivered = false` and return its id.
    async fn create(&self, message: &InboundMessage) -> Result<MessageId, StoreError>;

    /// Messages addressed to `user_id` that were never delivered live, oldest first.
    async fn get_undelivered(&self, user_id: UserId) -> Result<Vec<PersistedMessage>, StoreError>;

    async fn mark_delivered(&self, message_id: MessageId) -> Result<(), StoreError>;

    /// Messages exchanged between two users in either direction, newest first.
    async fn get_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PersistedMessage>, StoreError>;
}

/// `MessageStore` backed by the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the locked connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }
}

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, content, is_delivered, created_at, updated_at";

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, message: &InboundMessage) -> Result<MessageId, StoreError> {
        let message = message.clone();
        self.with_conn(move |conn| {
            let now = to_millis(&Utc::now());
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, is_delivered, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                rusqlite::params![
                    message.sender_id as i64,
                    message.receiver_id as i64,
                    message.content,
                    to_millis(&message.created_at),
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_undelivered(&self, user_id: UserId) -> Result<Vec<PersistedMessage>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver_id = ?1 AND is_delivered = 0
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let messages = stmt
                .query_map(rusqlite::params![user_id as i64], PersistedMessage::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }

    async fn mark_delivered(&self, message_id: MessageId) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_delivered = 1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![to_millis(&Utc::now()), message_id],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(message_id));
            }
            Ok(())
        })
        .await
    }

    async fn get_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PersistedMessage>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3 OFFSET ?4"
            ))?;
            let messages = stmt
                .query_map(
                    rusqlite::params![user_a as i64, user_b as i64, limit, offset],
                    PersistedMessage::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }
}
