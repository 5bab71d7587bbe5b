//! Transcript store
//!
//! Ordered message log keyed by `(user_id, session_id)`. The tail of a chat
//! either ends with a paired (user, assistant-complete) or is scrubbed of its
//! incomplete messages by the stop/timeout paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use chat_core::message::{ChatMessage, MessageRole, MessageType};

type TranscriptKey = (String, String);

#[derive(Clone, Default)]
pub struct TranscriptStore {
    messages: Arc<RwLock<HashMap<TranscriptKey, Vec<ChatMessage>>>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, session_id: &str) -> TranscriptKey {
        (user_id.to_string(), session_id.to_string())
    }

    pub async fn append(&self, message: ChatMessage) {
        let key = Self::key(&message.user_id, &message.session_id);
        self.messages.write().await.entry(key).or_default().push(message);
    }

    pub async fn snapshot(&self, user_id: &str, session_id: &str) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .get(&Self::key(user_id, session_id))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_empty(&self, user_id: &str, session_id: &str) -> bool {
        self.messages
            .read()
            .await
            .get(&Self::key(user_id, session_id))
            .map(Vec::is_empty)
            .unwrap_or(true)
    }

    /// Distinct chat ids with a user prompt in this session
    pub async fn chat_count(&self, user_id: &str, session_id: &str) -> usize {
        self.messages
            .read()
            .await
            .get(&Self::key(user_id, session_id))
            .map(|list| {
                list.iter()
                    .filter(|m| m.role == MessageRole::User)
                    .map(|m| m.chat_id.as_str())
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0)
    }

    /// Append one token to the chat's assistant message, creating it lazily
    pub async fn append_assistant_token(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: &str,
        token: &str,
    ) {
        let mut messages = self.messages.write().await;
        let list = messages.entry(Self::key(user_id, session_id)).or_default();

        match list
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && m.chat_id == chat_id && !m.is_complete)
        {
            Some(assistant) => {
                assistant.content.push_str(token);
                assistant.token_count += 1;
            }
            None => {
                let mut assistant = ChatMessage::assistant_partial(user_id, session_id, chat_id);
                assistant.content.push_str(token);
                assistant.token_count = 1;
                list.push(assistant);
            }
        }
    }

    /// Record the extracted thinking interior on the chat's assistant message
    pub async fn set_thinking(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: &str,
        interior: &str,
    ) {
        let mut messages = self.messages.write().await;
        let list = messages.entry(Self::key(user_id, session_id)).or_default();

        match list
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && m.chat_id == chat_id && !m.is_complete)
        {
            Some(assistant) => {
                assistant.thinking_content = Some(interior.to_string());
                assistant.has_thinking = true;
            }
            None => {
                let mut assistant = ChatMessage::assistant_partial(user_id, session_id, chat_id);
                assistant.thinking_content = Some(interior.to_string());
                assistant.has_thinking = true;
                list.push(assistant);
            }
        }
    }

    /// Canonical completion: finalize the assistant message and its paired prompt
    pub async fn finalize_chat(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: &str,
        total_tokens: u64,
    ) {
        let mut messages = self.messages.write().await;
        let Some(list) = messages.get_mut(&Self::key(user_id, session_id)) else {
            return;
        };

        let now = Utc::now();
        if let Some(assistant) = list
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && m.chat_id == chat_id && !m.is_complete)
        {
            assistant.is_complete = true;
            assistant.message_type = MessageType::CompleteResponse;
            assistant.completion_timestamp = Some(now);
            assistant.token_count = total_tokens;
        }

        // Walk backwards to the unpaired prompt for this chat
        if let Some(user) = list
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::User && m.chat_id == chat_id && !m.is_complete)
        {
            user.is_complete = true;
        }
    }

    /// Stop/timeout scrub: drop every incomplete message of the chat, both roles
    pub async fn scrub_incomplete(&self, user_id: &str, session_id: &str, chat_id: &str) {
        let mut messages = self.messages.write().await;
        if let Some(list) = messages.get_mut(&Self::key(user_id, session_id)) {
            let before = list.len();
            list.retain(|m| m.chat_id != chat_id || m.is_complete);
            let removed = before - list.len();
            if removed > 0 {
                log::info!(
                    "Scrubbed {} incomplete message(s) for chat {} in session {}",
                    removed,
                    chat_id,
                    session_id
                );
            }
        }
    }

    /// Session-wide scrub for stops that do not pin a chat
    pub async fn scrub_all_incomplete(&self, user_id: &str, session_id: &str) {
        let mut messages = self.messages.write().await;
        if let Some(list) = messages.get_mut(&Self::key(user_id, session_id)) {
            list.retain(|m| m.is_complete);
        }
    }

    /// Eviction support
    pub async fn drop_session(&self, user_id: &str, session_id: &str) {
        self.messages
            .write()
            .await
            .remove(&Self::key(user_id, session_id));
    }

    /// Logout reset
    pub async fn flush(&self) {
        self.messages.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_prompt(chat_id: &str) -> TranscriptStore {
        let store = TranscriptStore::new();
        store
            .append(ChatMessage::user_prompt(
                "u1",
                "19",
                chat_id,
                "hi".to_string(),
                None,
            ))
            .await;
        store
    }

    #[tokio::test]
    async fn assistant_message_created_lazily() {
        let store = store_with_prompt("1").await;
        store.append_assistant_token("u1", "19", "1", "Hel").await;
        store.append_assistant_token("u1", "19", "1", "lo").await;

        let transcript = store.snapshot("u1", "19").await;
        assert_eq!(transcript.len(), 2);
        let assistant = &transcript[1];
        assert_eq!(assistant.content, "Hello");
        assert_eq!(assistant.token_count, 2);
        assert!(!assistant.is_complete);
    }

    #[tokio::test]
    async fn finalize_pairs_user_and_assistant() {
        let store = store_with_prompt("1").await;
        store.append_assistant_token("u1", "19", "1", "Hello world").await;
        store.finalize_chat("u1", "19", "1", 3).await;

        let transcript = store.snapshot("u1", "19").await;
        assert!(transcript[0].is_complete, "user prompt paired");
        let assistant = &transcript[1];
        assert!(assistant.is_complete);
        assert_eq!(assistant.token_count, 3);
        assert_eq!(assistant.message_type, MessageType::CompleteResponse);
        assert!(assistant.completion_timestamp.is_some());
    }

    #[tokio::test]
    async fn scrub_removes_both_sides_of_incomplete_chat() {
        let store = store_with_prompt("1").await;
        store.append_assistant_token("u1", "19", "1", "partial").await;
        store.finalize_chat("u1", "19", "1", 1).await;

        store
            .append(ChatMessage::user_prompt(
                "u1",
                "19",
                "2",
                "second".to_string(),
                None,
            ))
            .await;
        store.append_assistant_token("u1", "19", "2", "orphan").await;
        store.scrub_incomplete("u1", "19", "2").await;

        let transcript = store.snapshot("u1", "19").await;
        assert_eq!(transcript.len(), 2);
        assert!(transcript.iter().all(|m| m.chat_id == "1"));
        assert!(transcript.iter().all(|m| m.is_complete));
    }

    #[tokio::test]
    async fn completed_messages_survive_scrub() {
        let store = store_with_prompt("1").await;
        store.append_assistant_token("u1", "19", "1", "done").await;
        store.finalize_chat("u1", "19", "1", 1).await;
        store.scrub_incomplete("u1", "19", "1").await;
        assert_eq!(store.snapshot("u1", "19").await.len(), 2);
    }

    #[tokio::test]
    async fn chat_count_tracks_distinct_prompts() {
        let store = store_with_prompt("1").await;
        assert_eq!(store.chat_count("u1", "19").await, 1);
        store
            .append(ChatMessage::user_prompt(
                "u1",
                "19",
                "2",
                "again".to_string(),
                None,
            ))
            .await;
        assert_eq!(store.chat_count("u1", "19").await, 2);
        // A retry of the same chat id does not inflate the count
        store
            .append(ChatMessage::user_prompt(
                "u1",
                "19",
                "2",
                "retry".to_string(),
                None,
            ))
            .await;
        assert_eq!(store.chat_count("u1", "19").await, 2);
    }

    #[tokio::test]
    async fn thinking_interior_lands_on_assistant() {
        let store = store_with_prompt("1").await;
        store.append_assistant_token("u1", "19", "1", "Because").await;
        store.set_thinking("u1", "19", "1", "why?").await;

        let transcript = store.snapshot("u1", "19").await;
        let assistant = &transcript[1];
        assert_eq!(assistant.thinking_content.as_deref(), Some("why?"));
        assert!(assistant.has_thinking);
    }
}
