pub mod anthropic;
pub mod call;
pub mod canned;
pub mod clients;
pub mod dispatch;
pub mod google;
pub mod normalize;
pub mod openai_compat;
pub mod registry;
pub mod retry;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use clients::ProviderClients;
pub use dispatch::{ChatStream, Dispatcher};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use traits::{CompletionRequest, CompletionResponse, LlmProvider};
pub use util::resolve_api_key;
