// src/store/mod.rs
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{ChatSessionSummary, Message};

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored {field} is malformed: {details}")]
    Corrupt { field: &'static str, details: String },
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Where sessions are listed and loaded from.
///
/// `get_session_messages` returns an empty list for an unknown id rather than an error.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<ChatSessionSummary>, StoreError>;
    async fn get_session_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;
}
