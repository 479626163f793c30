use serde::{Deserialize, Serialize};

/// Capability flags every provider advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default = "d_true")]
    pub supports_system_prompt: bool,
    /// Largest context window across this provider's models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u32>,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: false,
            supports_system_prompt: true,
            max_context_tokens: None,
        }
    }
}

fn d_true() -> bool {
    true
}
