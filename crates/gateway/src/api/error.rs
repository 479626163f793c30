//! Mapping of dispatch errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use ag_domain::error::{DispatchError, Error, ErrorKind};

/// Nginx's "client closed request"; no standard code exists.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Handler error: renders as `{ "error": ErrorBody }` with a status
/// derived from the error kind.
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self(e)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(DispatchError::new(e))
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnknownProvider | ErrorKind::UnknownModel => StatusCode::NOT_FOUND,
        ErrorKind::InvalidParameter | ErrorKind::ContextOverflow => StatusCode::BAD_REQUEST,
        ErrorKind::AuthError | ErrorKind::UnknownError => StatusCode::BAD_GATEWAY,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            tracing::warn!(
                status = status.as_u16(),
                kind = %self.0.kind(),
                provider = ?self.0.provider,
                attempts = self.0.attempts,
                error = %self.0,
                "chat request failed"
            );
        }
        (status, Json(serde_json::json!({ "error": self.0.body() }))).into_response()
    }
}
