pub mod chat;
pub mod error;
pub mod providers;
pub mod settings;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router. No auth middleware: the account service in front
/// of this gateway owns identity.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(providers::health))
        // Catalog
        .route("/v1/models", get(providers::list_models))
        .route("/v1/models/readiness", get(providers::readiness))
        // Chat
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        // Per-user defaults
        .route(
            "/v1/users/:user_id/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
}
