use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::transcript::UpstreamError;

/// The fixed set of failures a caller can see. Each kind carries a stable
/// wire code, message and HTTP status; nothing else crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    NoTranscript,
    VideoUnavailable,
    RateLimited,
    InternalError,
}

impl ErrorKind {
    #[cfg(test)]
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::InvalidRequest,
        ErrorKind::Unauthorized,
        ErrorKind::NoTranscript,
        ErrorKind::VideoUnavailable,
        ErrorKind::RateLimited,
        ErrorKind::InternalError,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NoTranscript => "no_transcript",
            ErrorKind::VideoUnavailable => "video_unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InternalError => "internal_error",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => {
                "Invalid request: format must be 'text' or 'json' and video id must be a valid identifier."
            }
            ErrorKind::Unauthorized => "Missing or invalid API key.",
            ErrorKind::NoTranscript => "No transcript or captions available for this video.",
            ErrorKind::VideoUnavailable => "Video unavailable.",
            ErrorKind::RateLimited => "Upstream rate limit reached. Try again later.",
            ErrorKind::InternalError => "Internal error.",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NoTranscript | ErrorKind::VideoUnavailable => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl From<&UpstreamError> for ErrorKind {
    fn from(err: &UpstreamError) -> Self {
        match err {
            UpstreamError::NoTranscript => ErrorKind::NoTranscript,
            UpstreamError::VideoUnavailable => ErrorKind::VideoUnavailable,
            UpstreamError::RateLimited => ErrorKind::RateLimited,
            UpstreamError::InvalidVideoId => ErrorKind::InvalidRequest,
            UpstreamError::Unknown(_) => ErrorKind::InternalError,
        }
    }
}

/// Why a resolution failed, with the detail that only goes to the logs.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("cache contract violated: {0}")]
    Cache(#[from] CacheError),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ResolveError::Upstream(err) => ErrorKind::from(err),
            ResolveError::Cache(_) => ErrorKind::InternalError,
        }
    }
}
