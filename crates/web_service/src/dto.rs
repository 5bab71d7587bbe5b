//! Request/response DTOs for the HTTP endpoints

use serde::{Deserialize, Serialize};

use chat_core::message::{ChatMessage, MessageRole};
use upstream_client::ChatFlags;

/// Body of `POST /chat`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamRequest {
    pub user_id: String,
    pub session_id: String,
    pub chat_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub flags: ChatFlags,
    #[serde(default)]
    pub temp_file_paths: Vec<String>,
}

/// Body of `POST /stop`
#[derive(Debug, Clone, Deserialize)]
pub struct StopRequest {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub cleanup_completed: bool,
}

/// Body of `POST /sessionName`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionNameRequest {
    pub user_id: String,
}

/// Body of `POST /sessionhistory`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionHistoryRequest {
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Serialize)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_file_name: Option<String>,
}

impl From<ChatMessage> for HistoryMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content,
            chat_id: msg.chat_id,
            thinking_content: msg.thinking_content,
            temp_file_name: msg.temp_file_name,
        }
    }
}

/// Body of `POST /chatsession`
#[derive(Debug, Clone, Deserialize)]
pub struct NewSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct NewSessionResponse {
    pub session_id: String,
    pub window_management: WindowManagement,
}

#[derive(Debug, Default, Serialize)]
pub struct WindowManagement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_session: Option<DeletedSession>,
}

#[derive(Debug, Serialize)]
pub struct DeletedSession {
    pub session_id: String,
    pub title: String,
}

/// Body of `POST /nextchatid`
#[derive(Debug, Clone, Deserialize)]
pub struct NextChatIdRequest {
    pub user_id: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct NextChatIdResponse {
    pub chat_id: String,
}

/// Query of `GET /sessioncount`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCountQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionCountResponse {
    pub count: usize,
}

/// Body of `POST /login`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    #[serde(default)]
    pub last_upstream_session_id: u64,
    #[serde(default)]
    pub personalized_files: Vec<String>,
}
