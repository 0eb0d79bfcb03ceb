//! Error types of the HTTP layer and their mapping onto responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use agam::error::{ConvertError, DispatchError, MergeError};

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] agam::ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] agam::logging::LoggingError),

    #[error("Startup failed: {0}")]
    Startup(#[from] agam::AgamError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Errors returned by request handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("{message}")]
    Multipart { status: StatusCode, message: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self::Multipart {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

fn dispatch_status(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::NotReady { .. } => StatusCode::BAD_REQUEST,
        DispatchError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::StreamingMode => StatusCode::NOT_FOUND,
        DispatchError::Convert(
            ConvertError::InvalidInputType(_) | ConvertError::UnsupportedFormat(_),
        ) => StatusCode::BAD_REQUEST,
        DispatchError::Merge(
            MergeError::InsufficientInputs { .. }
            | MergeError::UnsupportedType(_)
            | MergeError::TypeMismatch { .. },
        ) => StatusCode::BAD_REQUEST,
        DispatchError::Convert(_)
        | DispatchError::Merge(_)
        | DispatchError::Storage(_)
        | DispatchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(e) => dispatch_status(e),
            Self::Multipart { status, .. } => *status,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
