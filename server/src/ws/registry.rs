//! Who is online, and on which connection.
//!
//! Both views (connection → user, user → connection) live behind one mutex
//! and are always updated together. Nothing here performs I/O: evicting an
//! older connection only signals its session, which closes the socket itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ws::connection::{Connection, ConnectionId, ShutdownReason};
use crate::ws::UserId;

#[derive(Default)]
struct RegistryMaps {
    owners: HashMap<ConnectionId, UserId>,
    active: HashMap<UserId, Arc<Connection>>,
}

/// At most one live connection per user.
#[derive(Default)]
pub struct ConnectionRegistry {
    maps: Mutex<RegistryMaps>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryMaps> {
        // Every critical section leaves both maps consistent, so a panic
        // elsewhere cannot leave them half-updated.
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `conn` the active connection for its user. A different connection
    /// already registered for that user is removed and told to shut down;
    /// it is returned to the caller.
    pub fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let user_id = conn.user_id();
        let conn_id = conn.id();

        let evicted = {
            let mut maps = self.lock();
            let previous = maps.active.insert(user_id, conn);
            maps.owners.insert(conn_id, user_id);
            match previous {
                Some(old) if old.id() != conn_id => {
                    maps.owners.remove(&old.id());
                    Some(old)
                }
                _ => None,
            }
        };

        if let Some(old) = &evicted {
            tracing::info!(
                user_id = %user_id,
                old_connection = %old.id(),
                new_connection = %conn_id,
                "User already connected, evicting old connection"
            );
            old.shutdown(ShutdownReason::Evicted);
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %conn_id,
            "Connection registered"
        );
        evicted
    }

    /// Remove `conn` from both views. The user's entry is only removed while
    /// it still points at this exact connection, so a late teardown of an old
    /// connection never drops a newer registration. Unknown connections are a
    /// no-op. Returns whether anything was removed.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let conn_id = conn.id();
        let mut maps = self.lock();

        let Some(user_id) = maps.owners.remove(&conn_id) else {
            return false;
        };

        let is_current = maps
            .active
            .get(&user_id)
            .is_some_and(|current| current.id() == conn_id);
        if is_current {
            maps.active.remove(&user_id);
        }
        drop(maps);

        tracing::debug!(
            user_id = %user_id,
            connection_id = %conn_id,
            "Connection unregistered"
        );
        true
    }

    /// The live connection for `user_id`, if any.
    pub fn lookup(&self, user_id: UserId) -> Option<Arc<Connection>> {
        self.lock().active.get(&user_id).cloned()
    }

    pub fn is_registered(&self, conn: &Connection) -> bool {
        self.lock().owners.contains_key(&conn.id())
    }

    /// Number of users currently online.
    pub fn online_count(&self) -> usize {
        self.lock().active.len()
    }
}
