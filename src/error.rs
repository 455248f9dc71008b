use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Structured error response body.
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// API-facing error type. Internal detail is logged, never returned.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    UnsupportedMedia(String),
    RateLimited,
    NoContent(String),
    UpstreamUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorBody {
                    code: "PAYLOAD_TOO_LARGE",
                    message: msg,
                },
            ),
            ApiError::UnsupportedMedia(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ErrorBody {
                    code: "UNSUPPORTED_MEDIA_TYPE",
                    message: msg,
                },
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    code: "RATE_LIMITED",
                    message: "Too many requests. Slow down and retry shortly.".into(),
                },
            ),
            ApiError::NoContent(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    code: "NO_EXTRACTABLE_CONTENT",
                    message: msg,
                },
            ),
            ApiError::UpstreamUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "UPSTREAM_UNAVAILABLE",
                    message: msg,
                },
            ),
            ApiError::Internal(detail) => {
                tracing::error!("Internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

/// Failure from an external service (parser, embedding, completion APIs).
///
/// The transient/permanent split drives retry behavior: transient failures
/// are retried with backoff and, once exhausted, left to queue redelivery;
/// permanent failures terminate the document.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} request failed ({status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{service} transport error: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned a malformed payload: {detail}")]
    Malformed {
        service: &'static str,
        detail: String,
    },
    #[error("i/o error talking to {service}: {source}")]
    Io {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Transport { .. } => true,
            UpstreamError::Malformed { .. } => false,
            UpstreamError::Io { .. } => false,
        }
    }
}

/// Classified failure of one ingestion stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Worth retrying: the message is left unacked so the queue redelivers it.
    #[error("transient failure: {0}")]
    Transient(anyhow::Error),
    /// Never retried: the document is marked FAILED and the message acked.
    #[error("permanent failure: {0}")]
    Permanent(anyhow::Error),
}

impl StageError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        StageError::Transient(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        StageError::Permanent(err.into())
    }
}

impl From<UpstreamError> for StageError {
    fn from(err: UpstreamError) -> Self {
        if err.is_transient() {
            StageError::Transient(err.into())
        } else {
            StageError::Permanent(err.into())
        }
    }
}
