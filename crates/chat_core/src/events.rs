//! Push-channel events
//!
//! Every payload shares the envelope fields `type`, `content`, `chat_id`,
//! `session_id`, `instance_id`, `timestamp`; event-specific additions live on
//! the variant. Field casing follows the wire contract, which mixes snake and
//! camel case per event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageRole;

/// How a chat reached its terminal event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionType {
    Done,
    UserStopped,
    TimeoutStopped,
}

/// Event-specific payload, discriminated by the `type` envelope field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEventKind {
    HistoryStart,
    History {
        role: MessageRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_file_name: Option<String>,
    },
    HistoryEnd,
    Stream {
        #[serde(skip_serializing_if = "Option::is_none")]
        token_number: Option<u64>,
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(rename = "isPendingThinking", skip_serializing_if = "Option::is_none")]
        is_pending_thinking: Option<bool>,
    },
    Thinking {
        #[serde(rename = "isThinking")]
        is_thinking: bool,
    },
    ThinkingComplete,
    MoveToThinking {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "pendingTokens")]
        pending_tokens: Vec<String>,
    },
    Complete {
        completion_type: CompletionType,
        total_tokens: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    #[serde(rename = "cleanup-generation")]
    CleanupGeneration {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "chatId")]
        chat_id: String,
        #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
        reason: String,
    },
}

/// One push-channel payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushEvent {
    #[serde(flatten)]
    pub kind: PushEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub chat_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn new(
        kind: PushEventKind,
        content: Option<String>,
        session_id: &str,
        chat_id: &str,
        instance_id: Option<&str>,
    ) -> Self {
        Self {
            kind,
            content,
            chat_id: chat_id.to_string(),
            session_id: session_id.to_string(),
            instance_id: instance_id.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    /// A token delivered to the main lane
    pub fn stream(
        content: String,
        token_number: u64,
        session_id: &str,
        chat_id: &str,
        instance_id: Option<&str>,
    ) -> Self {
        Self::new(
            PushEventKind::Stream {
                token_number: Some(token_number),
                message_id: None,
                is_pending_thinking: None,
            },
            Some(content),
            session_id,
            chat_id,
            instance_id,
        )
    }

    /// The terminal event, emitted at most once per chat
    pub fn complete(
        completion_type: CompletionType,
        total_tokens: u64,
        reason: Option<String>,
        session_id: &str,
        chat_id: &str,
        instance_id: Option<&str>,
    ) -> Self {
        Self::new(
            PushEventKind::Complete {
                completion_type,
                total_tokens,
                reason,
            },
            None,
            session_id,
            chat_id,
            instance_id,
        )
    }

    pub fn error(
        message: String,
        error_code: Option<String>,
        session_id: &str,
        chat_id: &str,
        instance_id: Option<&str>,
    ) -> Self {
        Self::new(
            PushEventKind::Error { error_code },
            Some(message),
            session_id,
            chat_id,
            instance_id,
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, PushEventKind::Complete { .. })
    }
}
