pub mod connection;
pub mod handler;
pub mod health;
pub mod protocol;
pub mod registry;
pub mod session;

/// End-user identifier. Zero means "absent".
pub type UserId = u64;
