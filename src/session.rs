use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WELCOME_TEXT: &str = "您好！我是您的知识产权法律助手。我可以为您提供关于专利、商标、版权及商业秘密等方面的法律咨询。\n\n请问您今天遇到了什么法律问题？\n(例如：\"如何申请软件著作权？\" 或 \"收到商标侵权警告信该怎么办？\")";
pub const NEW_CHAT_TEXT: &str = "已开启新的会话。请问您有什么新的知识产权问题需要咨询？";
pub const LOAD_FAILED_TEXT: &str = "加载历史记录失败，请重试。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }
}

/// A reference attached to an answer. Order is display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Citation {
    pub fn new(title: impl Into<String>, uri: impl Into<String>) -> Self {
        Citation { title: title.into(), uri: uri.into(), snippet: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_loading: false,
            is_error: false,
            citations: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Message::new(Role::Model, text)
    }

    /// Placeholder for an answer that has not arrived yet.
    pub fn pending_assistant() -> Self {
        Message { is_loading: true, ..Message::new(Role::Model, String::new()) }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Message { is_error: true, ..Message::new(Role::Model, text) }
    }

    pub fn welcome() -> Self {
        Message::model(WELCOME_TEXT)
    }

    pub fn new_chat_welcome() -> Self {
        Message::model(NEW_CHAT_TEXT)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = Some(citations);
        self
    }

    pub fn citations(&self) -> &[Citation] {
        self.citations.as_deref().unwrap_or_default()
    }
}

/// Sidebar entry for a persisted session; the messages are fetched on selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub preview: String,
}

/// Most recently updated first.
pub fn sort_by_recent(sessions: &mut [ChatSessionSummary]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

pub fn format_relative_time(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = (now - updated_at).num_hours();
    let days = hours / 24;
    if hours < 1 {
        "刚刚".to_string()
    } else if hours < 24 {
        format!("{}小时前", hours)
    } else if days < 7 {
        format!("{}天前", days)
    } else {
        updated_at.with_timezone(&Local).format("%Y/%m/%d").to_string()
    }
}
