//! Room fingerprints
//!
//! A room is the addressing unit for push delivery:
//! `chat_{user_id}_{session_id}_{chat_id}` with an optional `_{instance_id}`
//! suffix disambiguating rapid resubmissions of the same triple.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room {
    pub user_id: String,
    pub session_id: String,
    pub chat_id: String,
    pub instance_id: Option<String>,
}

impl Room {
    pub fn new(user_id: &str, session_id: &str, chat_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            chat_id: chat_id.to_string(),
            instance_id: None,
        }
    }

    pub fn with_instance(mut self, instance_id: Option<&str>) -> Self {
        self.instance_id = instance_id.map(str::to_string);
        self
    }

    /// Fingerprint without the instance suffix, for wildcard delivery
    pub fn prefix(&self) -> String {
        format!("chat_{}_{}_{}", self.user_id, self.session_id, self.chat_id)
    }

    pub fn fingerprint(&self) -> String {
        match &self.instance_id {
            Some(instance) => format!("{}_{}", self.prefix(), instance),
            None => self.prefix(),
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}
