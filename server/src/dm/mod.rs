pub mod dispatcher;
pub mod history;
pub mod store;

/// Store-assigned message identifier.
pub type MessageId = i64;
