//! `GET/PUT /v1/users/:user_id/settings`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use ag_domain::settings::UserSettings;

use super::error::ApiError;
use crate::state::AppState;

pub async fn get_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = state.settings.get_defaults(&user_id).await?;
    let is_stored = stored.is_some();
    let settings = stored.unwrap_or_else(|| state.config.defaults.user_settings());

    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "stored": is_stored,
        "settings": settings,
    })))
}

/// Merge the supplied fields onto the user's record (or the configured
/// defaults for a new user). The store rejects a merged record the catalog
/// does not accept, and nothing is saved.
pub async fn put_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<UserSettings>,
) -> Result<impl IntoResponse, ApiError> {
    let saved = state.settings.save_defaults(&user_id, update).await?;
    tracing::info!(
        user_id = %user_id,
        provider = ?saved.default_provider,
        model = ?saved.default_model,
        "user settings updated"
    );

    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "stored": true,
        "settings": saved,
    })))
}
