use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::UserSettings;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation history.
///
/// `provider`/`model` record which backend produced an assistant message;
/// they are informational and never influence routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            provider: None,
            model: None,
            timestamp: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// A conversation session: ordered, append-only message history plus
/// defaults that apply to every request made from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    messages: Vec<ChatMessage>,
    /// Session defaults; fields left unset fall through to the user's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<UserSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            messages: Vec::new(),
            settings: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, stamping it if it carries no timestamp.
    pub fn push(&mut self, mut message: ChatMessage) {
        let now = Utc::now();
        message.timestamp.get_or_insert(now);
        self.messages.push(message);
        self.updated_at = now;
    }

    pub fn with_settings(mut self, settings: UserSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Session defaults layered over `user`.
    ///
    /// A session that picks its own provider without a model drops the
    /// user's model, which belongs to the user's provider.
    pub fn settings_over(&self, user: Option<&UserSettings>) -> UserSettings {
        let mut effective = user.cloned().unwrap_or_default();
        let Some(session) = &self.settings else {
            return effective;
        };
        if session.default_provider.is_some()
            && session.default_model.is_none()
            && session.default_provider != effective.default_provider
        {
            effective.default_model = None;
        }
        effective.merge(session.clone());
        effective
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
