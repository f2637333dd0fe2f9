//! Database row types.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dm::MessageId;
use crate::ws::UserId;

/// A stored direct message. `is_delivered` starts false and is flipped by the
/// dispatcher after a successful live write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub is_delivered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Timestamps are stored as Unix milliseconds.
pub fn to_millis(time: &DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl PersistedMessage {
    /// Map a row selected as
    /// `id, sender_id, receiver_id, content, is_delivered, created_at, updated_at`.
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let sender_id: i64 = row.get(1)?;
        let receiver_id: i64 = row.get(2)?;
        Ok(Self {
            id: row.get(0)?,
            sender_id: sender_id as UserId,
            receiver_id: receiver_id as UserId,
            content: row.get(3)?,
            is_delivered: row.get(4)?,
            created_at: from_millis(row.get(5)?),
            updated_at: from_millis(row.get(6)?),
        })
    }
}
