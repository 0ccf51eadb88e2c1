// src/store/sqlite.rs
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{SessionStore, StoreError};
use crate::session::{ChatSessionSummary, Citation, Message, Role};

/// Session history persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        log::info!("Opening session database: {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let store = SqliteSessionStore { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        log::info!("Running database migrations...");
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                preview TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                is_error INTEGER NOT NULL DEFAULT 0,
                citations TEXT, -- JSON array of Citation
                PRIMARY KEY (session_id, id),
                FOREIGN KEY (session_id) REFERENCES sessions (id) ON DELETE CASCADE
            );",
        )
        .execute(&self.pool)
        .await?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    pub async fn save_session(&self, summary: &ChatSessionSummary) -> Result<(), StoreError> {
        log::debug!("Saving session to DB: {}", summary.id);
        // An upsert, not REPLACE: REPLACE deletes the row and cascades to its messages.
        sqlx::query(
            "INSERT INTO sessions (id, title, preview, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                preview = excluded.preview,
                updated_at = excluded.updated_at",
        )
        .bind(&summary.id)
        .bind(&summary.title)
        .bind(&summary.preview)
        .bind(summary.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends after the session's last message; a message already stored keeps its position
    /// and is updated in place. Loading messages are not persisted.
    pub async fn append_message(&self, session_id: &str, message: &Message) -> Result<(), StoreError> {
        if message.is_loading {
            log::debug!("Skipping pending message {} for session {}", message.id, session_id);
            return Ok(());
        }
        log::debug!("Saving message to DB for session {}: {}", session_id, message.id);
        let citations = match &message.citations {
            Some(citations) => Some(serde_json::to_string(citations).map_err(|e| StoreError::Corrupt {
                field: "citations",
                details: e.to_string(),
            })?),
            None => None,
        };

        sqlx::query(
            "INSERT INTO messages (id, session_id, seq, role, content, timestamp, is_error, citations)
             VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?), ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, id) DO UPDATE SET
                role = excluded.role,
                content = excluded.content,
                timestamp = excluded.timestamp,
                is_error = excluded.is_error,
                citations = excluded.citations",
        )
        .bind(&message.id)
        .bind(session_id)
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.timestamp.timestamp_millis())
        .bind(message.is_error)
        .bind(citations)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::Unavailable("session database is closed".to_string()));
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn session_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sessions").fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn list_sessions(&self) -> Result<Vec<ChatSessionSummary>, StoreError> {
        self.ensure_open()?;
        log::debug!("Loading all sessions from DB");
        let rows = sqlx::query("SELECT id, title, preview, updated_at FROM sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(ChatSessionSummary {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                preview: row.try_get("preview")?,
                updated_at: from_millis(row.try_get("updated_at")?)?,
            });
        }
        log::info!("Loaded {} sessions from DB", sessions.len());
        Ok(sessions)
    }

    async fn get_session_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        self.ensure_open()?;
        log::debug!("Loading messages for session ID: {}", session_id);
        let rows = sqlx::query(
            "SELECT id, role, content, timestamp, is_error, citations FROM messages
             WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role")?;
            let citations: Option<String> = row.try_get("citations")?;
            messages.push(Message {
                id: row.try_get("id")?,
                role: parse_role(&role)?,
                content: row.try_get("content")?,
                timestamp: from_millis(row.try_get("timestamp")?)?,
                is_loading: false,
                is_error: row.try_get("is_error")?,
                citations: citations.as_deref().map(parse_citations).transpose()?,
            });
        }
        Ok(messages)
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        field: "timestamp",
        details: millis.to_string(),
    })
}

fn parse_role(raw: &str) -> Result<Role, StoreError> {
    match raw {
        "user" => Ok(Role::User),
        "model" => Ok(Role::Model),
        "system" => Ok(Role::System),
        other => Err(StoreError::Corrupt { field: "role", details: other.to_string() }),
    }
}

fn parse_citations(raw: &str) -> Result<Vec<Citation>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt { field: "citations", details: e.to_string() })
}
