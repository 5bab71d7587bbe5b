//! Bus payload decoding
//!
//! Tokens, content fragments, completion statuses, and session-index payloads
//! share queues and are discriminated structurally: a `type` field when
//! present, field inspection otherwise (`data` means token, `content` means
//! content fragment, `sessions` or pair arrays mean index). Shapes that fit
//! nothing are kept as `Other` and ignored by consumers.

use serde_json::Value;

/// One entry of a session-index payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub title: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// One token of an active generation
    Token {
        data: String,
        chat_id: Option<String>,
    },
    /// A content fragment (alternate token shape)
    Content {
        content: String,
        chat_id: Option<String>,
    },
    /// Explicit completion signal
    Done,
    /// Upstream's latest-N session list
    SessionIndex(Vec<SessionIndexEntry>),
    /// Unrecognized payload, ignored by consumers
    Other(Value),
}

impl BusMessage {
    pub fn decode(value: &Value) -> Self {
        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            match kind {
                "token" => {
                    if let Some(data) = value.get("data").and_then(Value::as_str) {
                        return BusMessage::Token {
                            data: data.to_string(),
                            chat_id: field_as_string(value, "chat_id"),
                        };
                    }
                }
                "status" => {
                    if value.get("token").and_then(Value::as_str) == Some("done") {
                        return BusMessage::Done;
                    }
                }
                "completion" => {
                    if value.get("status").and_then(Value::as_str) == Some("done") {
                        return BusMessage::Done;
                    }
                }
                _ => {}
            }
        }

        // Structural fallback
        if let Some(data) = value.get("data").and_then(Value::as_str) {
            return BusMessage::Token {
                data: data.to_string(),
                chat_id: field_as_string(value, "chat_id"),
            };
        }
        if let Some(content) = value.get("content").and_then(Value::as_str) {
            return BusMessage::Content {
                content: content.to_string(),
                chat_id: field_as_string(value, "chat_id"),
            };
        }
        if let Some(entries) = decode_session_index(value) {
            return BusMessage::SessionIndex(entries);
        }

        BusMessage::Other(value.clone())
    }

    /// Chat id carried by the payload, if any. Messages without one (status,
    /// index) are not subject to chat-id filtering.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            BusMessage::Token { chat_id, .. } | BusMessage::Content { chat_id, .. } => {
                chat_id.as_deref()
            }
            _ => None,
        }
    }
}

fn field_as_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Session-index shapes: a direct array of `[sid, title]` pairs, an object
/// `{user_id, sessions: [{s_id, s_name, created_at?}]}`, or an array of such
/// objects.
fn decode_session_index(value: &Value) -> Option<Vec<SessionIndexEntry>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            if items.iter().all(|item| item.is_array()) {
                let mut entries = Vec::with_capacity(items.len());
                for pair in items {
                    let pair = pair.as_array()?;
                    if pair.len() < 2 {
                        return None;
                    }
                    entries.push(SessionIndexEntry {
                        session_id: scalar_to_string(&pair[0])?,
                        title: scalar_to_string(&pair[1])?,
                        created_at: None,
                    });
                }
                return Some(entries);
            }
            if items.iter().all(|item| item.get("sessions").is_some()) {
                let mut entries = Vec::new();
                for item in items {
                    entries.extend(decode_sessions_object(item)?);
                }
                return Some(entries);
            }
            None
        }
        Value::Object(_) if value.get("sessions").is_some() => decode_sessions_object(value),
        _ => None,
    }
}

fn decode_sessions_object(value: &Value) -> Option<Vec<SessionIndexEntry>> {
    let sessions = value.get("sessions")?.as_array()?;
    let mut entries = Vec::with_capacity(sessions.len());
    for session in sessions {
        entries.push(SessionIndexEntry {
            session_id: field_as_string(session, "s_id")?,
            title: field_as_string(session, "s_name")?,
            created_at: field_as_string(session, "created_at"),
        });
    }
    Some(entries)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
