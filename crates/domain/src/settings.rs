use serde::{Deserialize, Serialize};

use crate::chat::Correlation;
use crate::error::Result;

/// Per-user defaults owned by the account service.
///
/// Every field is optional so a partially configured user still routes:
/// the normalizer falls back to model defaults for anything unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_thread: Option<String>,
}

impl UserSettings {
    /// Overlay the fields set in `update`, leaving the rest untouched.
    pub fn merge(&mut self, update: UserSettings) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if update.$field.is_some() { self.$field = update.$field; })*
            };
        }
        take!(
            default_provider,
            default_model,
            temperature,
            max_tokens,
            assistant_id,
            provider_thread,
            session_thread
        );
    }

    pub fn correlation(&self) -> Correlation {
        Correlation {
            assistant_id: self.assistant_id.clone(),
            provider_thread: self.provider_thread.clone(),
            session_thread: self.session_thread.clone(),
        }
    }
}

/// Read/update access to per-user defaults.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_defaults(&self, user_id: &str) -> Result<Option<UserSettings>>;

    /// Apply a partial update and return the stored record.
    async fn save_defaults(&self, user_id: &str, update: UserSettings) -> Result<UserSettings>;
}
