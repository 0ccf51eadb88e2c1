// src/llm/mod.rs
pub mod mock;
pub mod openai_client;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{Citation, Message};

pub use mock::MockLegalAnswerService;
pub use openai_client::OpenAiAnswerService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("the model returned no answer")]
    Empty,
    #[error("answer service not configured: {0}")]
    NotConfigured(String),
    #[error("answer service unavailable: {0}")]
    Unavailable(String),
}

/// Produces the assistant's reply for `utterance` given the conversation so far.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn answer(&self, history: &[Message], utterance: &str) -> Result<Answer, AnswerError>;
}
