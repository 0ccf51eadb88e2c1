// src/timeline.rs
use crate::session::{Citation, Message};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("an assistant reply is already pending (message {0})")]
    PendingExists(String),
}

/// Ordered messages of the active conversation. Insertion order is chronological.
///
/// Holds at most one loading message at a time; the append operations refuse to add a
/// second placeholder instead of queueing it.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new(initial: Message) -> Self {
        Timeline { messages: vec![initial] }
    }

    #[cfg(test)]
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Timeline { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn pending(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_loading)
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> Message {
        let message = Message::user(text);
        self.messages.push(message.clone());
        message
    }

    pub fn append_pending_assistant(&mut self) -> Result<Message, TimelineError> {
        self.ensure_no_pending()?;
        let message = Message::pending_assistant();
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Appends the user message and its reply placeholder together, or neither.
    pub fn append_exchange(&mut self, text: impl Into<String>) -> Result<(Message, Message), TimelineError> {
        self.ensure_no_pending()?;
        let user = self.append_user(text);
        let pending = self.append_pending_assistant()?;
        Ok((user, pending))
    }

    /// Returns false and leaves the timeline untouched when `id` is not present.
    pub fn resolve_assistant(&mut self, id: &str, content: String, citations: Vec<Citation>) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.is_loading = false;
                message.is_error = false;
                message.content = content;
                message.citations = Some(citations);
                true
            }
            None => false,
        }
    }

    pub fn fail_assistant(&mut self, id: &str, content: String) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.is_loading = false;
                message.is_error = true;
                message.content = content;
                message.citations = None;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self, initial: Message) {
        self.messages = vec![initial];
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    fn ensure_no_pending(&self) -> Result<(), TimelineError> {
        match self.pending() {
            Some(pending) => Err(TimelineError::PendingExists(pending.id.clone())),
            None => Ok(()),
        }
    }
}
