//! Chat message types
//!
//! A transcript is an ordered sequence of `ChatMessage` values keyed by
//! `(user_id, session_id)`. The assistant message for a chat is created lazily
//! at the first delivered token and stays incomplete until a completion signal
//! arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Coarse message classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    CompleteResponse,
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,

    /// Extracted thinking interior, present once a retroactive move has fired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(default)]
    pub has_thinking: bool,

    pub chat_id: String,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,

    /// A message marked complete is never mutated again
    pub is_complete: bool,
    #[serde(default)]
    pub token_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// Original name of an uploaded file the prompt referenced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_file_name: Option<String>,
}

impl ChatMessage {
    /// A freshly submitted user prompt, not yet paired with a completion
    pub fn user_prompt(
        user_id: &str,
        session_id: &str,
        chat_id: &str,
        content: String,
        temp_file_name: Option<String>,
    ) -> Self {
        Self {
            role: MessageRole::User,
            content,
            thinking_content: None,
            has_thinking: false,
            chat_id: chat_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            message_type: MessageType::Text,
            is_complete: false,
            token_count: 0,
            completion_timestamp: None,
            temp_file_name,
        }
    }

    /// An assistant message created lazily at the first delivered token
    pub fn assistant_partial(user_id: &str, session_id: &str, chat_id: &str) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            thinking_content: None,
            has_thinking: false,
            chat_id: chat_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            message_type: MessageType::Text,
            is_complete: false,
            token_count: 0,
            completion_timestamp: None,
            temp_file_name: None,
        }
    }
}
