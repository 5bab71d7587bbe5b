//! Upstream wire contracts

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boolean flag set carried on every chat submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatFlags {
    #[serde(default)]
    pub summarize_flag: bool,
    #[serde(default)]
    pub codebase_search_flag: bool,
    #[serde(default)]
    pub personalize_flag: bool,
    #[serde(default)]
    pub temp_file_flag: bool,
    #[serde(default)]
    pub first_chat_flag: bool,
    #[serde(default)]
    pub web_search_flag: bool,
}

/// Chat submission payload
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub chat_id: String,
    pub session_id: String,
    pub llm_model_id: String,
    #[serde(flatten)]
    pub flags: ChatFlags,
    pub prompt: String,
    pub temp_file_paths: Vec<String>,
    pub room_id: String,
}

/// Parsed chat reply
///
/// Upstream replies vary: the body may wrap the fields in a `response` object,
/// `is_complete` may be a bool or the string `"true"`, and `SESSION_NAME` only
/// appears on the first chat of a session. Parsing is lenient; a reply that
/// cannot be interpreted means "no completion signal", not a failure.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub is_complete: bool,
    pub content: String,
    pub session_name: Option<String>,
}

impl ChatReply {
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let inner = value.get("response").unwrap_or(&value);

        let is_complete = match inner.get("is_complete") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        let content = inner
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let session_name = inner
            .get("SESSION_NAME")
            .or_else(|| inner.get("session_name"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(Self {
            is_complete,
            content,
            session_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_reply() {
        let reply = ChatReply::parse(
            r#"{"response": {"is_complete": "True", "content": "ok", "SESSION_NAME": "Debugging crash"}}"#,
        )
        .unwrap();
        assert!(reply.is_complete);
        assert_eq!(reply.content, "ok");
        assert_eq!(reply.session_name.as_deref(), Some("Debugging crash"));
    }

    #[test]
    fn parses_flat_reply_without_name() {
        let reply = ChatReply::parse(r#"{"is_complete": true, "content": ""}"#).unwrap();
        assert!(reply.is_complete);
        assert!(reply.session_name.is_none());
    }

    #[test]
    fn malformed_body_is_none() {
        assert!(ChatReply::parse("not json").is_none());
    }

    #[test]
    fn chat_request_flattens_flags() {
        let request = ChatRequest {
            user_id: "u1".to_string(),
            chat_id: "1".to_string(),
            session_id: "19".to_string(),
            llm_model_id: "deepseek-r1".to_string(),
            flags: ChatFlags {
                first_chat_flag: true,
                ..Default::default()
            },
            prompt: "hi".to_string(),
            temp_file_paths: vec![],
            room_id: "chat_u1_19_1".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["first_chat_flag"], true);
        assert_eq!(value["web_search_flag"], false);
        assert_eq!(value["room_id"], "chat_u1_19_1");
    }
}
