//! Mapping of failures to HTTP responses.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use clamrest_clamd::ClamdError;
use tracing::{error, warn};

use crate::types::ErrorResponse;

/// Errors returned by route handlers. Rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Clamd(#[from] ClamdError),

    #[error("No file attached")]
    NoFile,

    #[error("invalid upload: {}", .0.body_text())]
    Multipart(#[from] MultipartError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Clamd(e) => clamd_status(e),
            ApiError::NoFile => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn clamd_status(err: &ClamdError) -> StatusCode {
    if err.is_connection_error() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if err.is_configuration_error() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match err {
        ClamdError::UploadRejected { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        // The request body broke off mid-upload.
        ClamdError::SourceRead(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        } else if !matches!(self, ApiError::NotFound(_) | ApiError::MethodNotAllowed) {
            warn!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_clamd_error_statuses() {
        let cases = [
            (
                ClamdError::SocketNotFound(PathBuf::from("/tmp/clamd.sock")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ClamdError::Timeout(Duration::from_secs(1)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ClamdError::UploadRejected {
                    sent: 10,
                    daemon_reply: None,
                    source: io::Error::from(io::ErrorKind::BrokenPipe),
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ClamdError::InvalidBufferSize(2),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ClamdError::Io(io::Error::other("boom")),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_no_file_message() {
        let err = ApiError::NoFile;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No file attached");
    }
}
