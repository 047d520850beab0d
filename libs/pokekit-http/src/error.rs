use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed
    ParseError,
    /// URL has no host
    MissingAuthority,
    /// URL has no scheme
    MissingScheme,
}

/// Errors produced by the HTTP transport
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// A single attempt did not complete within its timeout
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Network-level failure (DNS, connect, reset, truncated body)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-2xx status surfaced by a checked body read
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Query encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Concurrency limit reached (fail-fast)
    #[error("Service overloaded: concurrency limit reached")]
    Overloaded,

    /// The buffer worker is gone
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// `reason` is diagnostic only; match on `kind`.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// HTTP status carried by the error, if any
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            HttpError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl Error for Refused {}

    #[test]
    fn transport_error_keeps_source() {
        let err = HttpError::Transport(Box::new(Refused));
        let source = err.source().unwrap();
        assert!(source.downcast_ref::<Refused>().is_some());
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn status_only_for_http_status() {
        let err = HttpError::HttpStatus {
            status: http::StatusCode::NOT_FOUND,
            body_preview: "Not Found".to_owned(),
            content_type: None,
        };
        assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));
        assert_eq!(HttpError::Overloaded.status(), None);
        assert_eq!(
            HttpError::Timeout(Duration::from_secs(1)).status(),
            None
        );
    }
}
