use http::StatusCode;
use pokekit_http::HttpError;
use std::time::Duration;
use thiserror::Error;

/// Specialization of a 4xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    RateLimited,
    Other,
}

impl ClientErrorKind {
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::UnprocessableEntity,
            429 => Self::RateLimited,
            _ => Self::Other,
        }
    }
}

/// Error taxonomy surfaced by every `pokekit` operation
///
/// `Clone` so a single outcome can be handed to every caller that joined
/// the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiError {
    /// DNS, connect, reset or other network-level failure
    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// 4xx response; never retried
    #[error("client error {status}: {message}")]
    Client {
        status: StatusCode,
        kind: ClientErrorKind,
        message: String,
    },

    /// 5xx response that survived every retry
    #[error("server error {status}: {message}")]
    Server { status: StatusCode, message: String },

    /// Response body could not be read or decoded
    #[error("failed to decode response: {message}")]
    Decode { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// A reference selected for expansion already carries the side-channel key
    #[error("reserved key `__expanded__` already present at `{path}`")]
    ReservedKey { path: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ApiError {
    /// Build the taxonomy member for a non-success status.
    #[must_use]
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if status.is_server_error() {
            Self::Server { status, message }
        } else if status.is_client_error() {
            Self::Client {
                status,
                kind: ClientErrorKind::from_status(status),
                message,
            }
        } else {
            Self::Decode {
                message: format!("unexpected status {status}: {message}"),
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the transport would retry this outcome
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Server { .. }
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Client {
                kind: ClientErrorKind::NotFound,
                ..
            }
        )
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Client {
                kind: ClientErrorKind::RateLimited,
                ..
            }
        )
    }

    /// 502, 503 and 504
    #[must_use]
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Server { status, .. }
                if matches!(status.as_u16(), 502..=504)
        )
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Timeout(after) => Self::Timeout { after },
            HttpError::HttpStatus {
                status,
                body_preview,
                ..
            } => Self::from_status(status, body_preview),
            HttpError::Transport(_)
            | HttpError::Tls(_)
            | HttpError::Overloaded
            | HttpError::ServiceClosed => Self::Connection {
                message: err.to_string(),
            },
            HttpError::Json(_) | HttpError::BodyTooLarge { .. } => Self::Decode {
                message: err.to_string(),
            },
            other => Self::InvalidRequest {
                message: other.to_string(),
            },
        }
    }
}

impl From<figment::Error> for ApiError {
    fn from(err: figment::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
