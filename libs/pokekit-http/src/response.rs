use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;

/// Maximum body preview kept in `HttpError::HttpStatus` (8 KiB)
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Boxed, already-decompressed response body.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// HTTP response wrapper with body-reading helpers
///
/// All body reads enforce the configured `max_body_size` on decompressed bytes.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Read the body without a status check.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Read the body, turning non-2xx into `HttpError::HttpStatus`.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if status is not 2xx.
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        checked_body(self.inner, self.max_body_size).await
    }

    /// Parse the body as JSON with a status check.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if status is not 2xx.
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    /// Returns `HttpError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = checked_body(self.inner, self.max_body_size).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Read the body as lossy UTF-8 with a status check.
    ///
    /// # Errors
    /// Same as [`HttpResponse::checked_bytes`].
    pub async fn text(self) -> Result<String, HttpError> {
        let body = checked_body(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Collect the body of `response` into memory.
///
/// Runs inside each attempt so the attempt deadline covers the body and a
/// connection lost mid-body surfaces as a retryable `HttpError::Transport`.
/// Non-2xx bodies are capped at the preview limit; an oversized one is
/// replaced by a placeholder so the status still reaches the caller.
///
/// # Errors
/// Returns `HttpError::Transport` if the body stream fails.
/// Returns `HttpError::BodyTooLarge` if a 2xx body exceeds `max_body_size`.
pub async fn buffer_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Response<ResponseBody>, HttpError> {
    let (parts, body) = response.into_parts();
    let success = parts.status.is_success();
    let limit = if success {
        max_body_size
    } else {
        max_body_size.min(ERROR_BODY_PREVIEW_LIMIT)
    };

    let bytes = match collect_limited(body, limit).await {
        Ok(bytes) => bytes,
        Err(HttpError::BodyTooLarge { .. }) if !success => {
            Bytes::from_static(OVERSIZED_PREVIEW.as_bytes())
        }
        Err(e) => return Err(e),
    };

    Ok(Response::from_parts(parts, full_body(bytes)))
}

fn full_body(bytes: Bytes) -> ResponseBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

const OVERSIZED_PREVIEW: &str = "<body too large for preview>";

async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Bytes, HttpError> {
    let status = response.status();
    if status.is_success() {
        return read_body_limited(response, max_body_size).await;
    }

    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    // A huge error body must not hide the status.
    let preview_limit = max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
    let body_preview = match read_body_limited(response, preview_limit).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(HttpError::BodyTooLarge { .. }) => OVERSIZED_PREVIEW.to_owned(),
        Err(e) => return Err(e),
    };

    Err(HttpError::HttpStatus {
        status,
        body_preview,
        content_type,
    })
}

async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    collect_limited(response.into_body(), limit).await
}

async fn collect_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(body);
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(HttpError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn response(status: StatusCode, body: &'static str) -> HttpResponse {
        let body: ResponseBody = Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
            .boxed();
        HttpResponse {
            inner: Response::builder()
                .status(status)
                .header("content-type", "text/plain")
                .body(body)
                .unwrap(),
            max_body_size: 64,
        }
    }

    #[tokio::test]
    async fn json_on_success() {
        let value: serde_json::Value = response(StatusCode::OK, r#"{"id":25}"#)
            .json()
            .await
            .unwrap();
        assert_eq!(value["id"], 25);
    }

    #[tokio::test]
    async fn non_success_carries_preview() {
        let err = response(StatusCode::NOT_FOUND, "Not Found")
            .json::<serde_json::Value>()
            .await
            .unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                content_type,
            } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body_preview, "Not Found");
                assert_eq!(content_type.as_deref(), Some("text/plain"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let big = "x".repeat(100).leak();
        let err = response(StatusCode::OK, big).bytes().await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 64, actual: 100 }));
    }

    #[tokio::test]
    async fn oversized_error_body_still_reports_status() {
        let big = "x".repeat(100).leak();
        let err = response(StatusCode::BAD_GATEWAY, big).text().await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn buffered_oversized_error_keeps_status() {
        let big = "x".repeat(100).leak();
        let buffered = buffer_body(response(StatusCode::BAD_GATEWAY, big).inner, 64)
            .await
            .unwrap();
        assert_eq!(buffered.status(), StatusCode::BAD_GATEWAY);

        let resp = HttpResponse {
            inner: buffered,
            max_body_size: 64,
        };
        match resp.text().await.unwrap_err() {
            HttpError::HttpStatus { body_preview, .. } => {
                assert_eq!(body_preview, OVERSIZED_PREVIEW);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn buffered_oversized_success_rejected() {
        let big = "x".repeat(100).leak();
        let err = buffer_body(response(StatusCode::OK, big).inner, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 64, actual: 100 }));
    }
}
