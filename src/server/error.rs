//! HTTP error mapping: structured JSON bodies with stable status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{error, warn};
use serde::Serialize;

use crate::chat::ChatError;
use crate::services::gemini::ModelError;
use crate::services::tts::TtsError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String },
    NotFound { message: String },
    Conflict { message: String },
    BadGateway { message: String, details: Option<String> },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>, details: Option<String>) -> Self {
        Self::BadGateway {
            message: message.into(),
            details,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, details) = match self {
            Self::BadGateway { message, details } => (message, details),
            Self::BadRequest { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::Internal { message } => (message, None),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("api error ({}): {}", status, message);
        } else if status == StatusCode::BAD_GATEWAY {
            warn!("upstream error ({}): {}", status, message);
        }

        (status, Json(ErrorBody { error: message, details })).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound { message } => Self::NotFound { message },
            ChatError::InvalidInput { message } => Self::BadRequest { message },
            ChatError::SessionBusy { message } => Self::Conflict { message },
            ChatError::Locked { message }
            | ChatError::Database { message }
            | ChatError::Internal { message } => Self::Internal { message },
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::MissingApiKey => Self::internal(err.to_string()),
            ModelError::Upstream { status, detail } => Self::bad_gateway(
                format!("Model upstream error (status {})", status),
                (!detail.is_empty()).then_some(detail),
            ),
            ModelError::Request { .. } | ModelError::EmptyResponse => {
                Self::bad_gateway(err.to_string(), None)
            }
        }
    }
}

impl From<TtsError> for ApiError {
    fn from(err: TtsError) -> Self {
        match err {
            TtsError::MissingApiKey => Self::internal(err.to_string()),
            TtsError::Upstream { status, detail } => Self::bad_gateway(
                format!("TTS upstream error (status {})", status),
                (!detail.is_empty()).then_some(detail),
            ),
            TtsError::Request { .. } | TtsError::EmptyResponse => {
                Self::bad_gateway(err.to_string(), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_error_status_mapping() {
        assert_eq!(
            ApiError::from(ChatError::not_found("x")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ChatError::invalid_input("x")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ChatError::session_busy("x")).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ChatError::locked("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_failures_map_to_bad_gateway() {
        assert_eq!(
            ApiError::from(ModelError::upstream(429, "quota")).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(ModelError::MissingApiKey).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(TtsError::request("refused")).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
