use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Answer, AnswerError, AnswerService};
use crate::config::AnswerConfig;
use crate::session::{Message as AppMessage, Role as AppRole};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const SYSTEM_PROMPT: &str = "你是一名专业的中国知识产权法律助手，熟悉专利、商标、著作权及商业秘密相关法律法规。请用简体中文、以 Markdown 格式回答，并提醒用户重大事项应咨询执业律师。";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Deserialize, Debug)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

/// Chat-completions backend. Replies carry no citations.
pub struct OpenAiAnswerService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiAnswerService {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| OPENAI_API_URL.to_string()).trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AnswerConfig) -> Result<Self, AnswerError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AnswerError::NotConfigured("OpenAI API key not configured".to_string()))?;
        Ok(Self::new(api_key, config.model.clone(), config.base_url.clone()))
    }

    /// Prior turns plus the new question. Placeholders and error notices are left out.
    pub fn convert_messages(history: &[AppMessage], utterance: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() }];
        messages.extend(
            history
                .iter()
                .filter(|m| !m.is_loading && !m.is_error && !m.content.is_empty())
                .map(|m| ChatMessage {
                    role: match m.role {
                        AppRole::User => "user",
                        AppRole::Model => "assistant",
                        AppRole::System => "system",
                    }
                    .to_string(),
                    content: m.content.clone(),
                }),
        );
        messages.push(ChatMessage { role: "user".to_string(), content: utterance.to_string() });
        messages
    }
}

#[async_trait]
impl AnswerService for OpenAiAnswerService {
    async fn answer(&self, history: &[AppMessage], utterance: &str) -> Result<Answer, AnswerError> {
        let request_payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(history, utterance),
        };
        log::info!("Sending {} messages to LLM (model: {})...", request_payload.messages.len(), self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request_payload)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            log::warn!("OpenAI API unavailable: {}", status);
            return Err(AnswerError::Unavailable(status.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI API Error: {} - {}", status, body);
            return Err(AnswerError::Api { status: status.as_u16(), body });
        }

        let chat_response = response.json::<ChatCompletionResponse>().await?;
        log::debug!("Received OpenAI response: {:?}", chat_response);
        let text = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AnswerError::Empty)?;
        Ok(Answer { text, citations: Vec::new() })
    }
}
