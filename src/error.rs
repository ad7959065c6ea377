use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::media::service::MediaError;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Upstream(MediaError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "{msg}"),
            Self::Upstream(e) => write!(f, "{e}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Upstream(e) => match e {
                MediaError::Staging(_) | MediaError::Registration(_) | MediaError::Validation(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
                }
                MediaError::Transient(_)
                | MediaError::Transfer { .. }
                | MediaError::ProtocolInvariant(_) => {
                    tracing::error!("{self}");
                    (StatusCode::BAD_GATEWAY, self.to_string())
                }
            },
        };

        if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), "{message}");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<MediaError> for AppError {
    fn from(e: MediaError) -> Self {
        Self::Upstream(e)
    }
}
