use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use tower::Service;
use tower::buffer::Buffer;

pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// HTTP client over a tower middleware stack
///
/// `Clone + Send + Sync`; clones share the connection pool and the request
/// queue, so there is no need to wrap it in a mutex.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
}

impl HttpClient {
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Request builder for an arbitrary method.
    ///
    /// `url` must be absolute; `http://` requires
    /// [`TransportSecurity::AllowInsecureHttp`].
    pub fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            method,
            url.to_owned(),
            self.transport_security,
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    #[must_use]
    pub fn transport_security(&self) -> TransportSecurity {
        self.transport_security
    }
}

/// Map buffer errors to `HttpError`, unwrapping errors from the inner stack.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(error = %err, "buffer worker closed unexpectedly");
            HttpError::ServiceClosed
        }
    }
}

/// Poll the buffer once; a full queue fails fast with `Overloaded`.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let ready = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match ready {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{ExponentialBackoff, RetryConfig};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn test_client() -> HttpClient {
        HttpClientBuilder::new()
            .allow_insecure_http()
            .retry(None)
            .build()
            .unwrap()
    }

    fn retrying_client(max_retries: usize) -> HttpClient {
        HttpClientBuilder::new()
            .allow_insecure_http()
            .retry(Some(RetryConfig {
                max_retries,
                backoff: ExponentialBackoff::fast(),
                ..RetryConfig::default()
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn get_json() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v2/pokemon/25");
            then.status(200)
                .json_body(json!({"id": 25, "name": "pikachu"}));
        });

        let value: serde_json::Value = test_client()
            .get(&server.url("/api/v2/pokemon/25"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(value["name"], "pikachu");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn query_params_are_encoded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v2/pokemon")
                .query_param("limit", "5")
                .query_param("offset", "10")
                .query_param("q", "mr mime");
            then.status(200).json_body(json!({"results": []}));
        });

        let resp = test_client()
            .get(&server.url("/api/v2/pokemon"))
            .query(&[("limit", "5"), ("offset", "10")])
            .query(&[("q", "mr mime")])
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn user_agent_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/ua")
                .header("user-agent", crate::DEFAULT_USER_AGENT);
            then.status(200);
        });

        test_client().get(&server.url("/ua")).send().await.unwrap();
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("Not Found");
        });

        let err = retrying_client(3)
            .get(&server.url("/missing"))
            .send()
            .await
            .unwrap()
            .json::<serde_json::Value>()
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn server_error_retried_until_exhausted() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503).body("unavailable");
        });

        let resp = retrying_client(2)
            .get(&server.url("/flaky"))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn per_request_retry_override() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(500);
        });

        let resp = retrying_client(2)
            .get(&server.url("/flaky"))
            .retries(0)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.calls(), 1);

        let resp = test_client()
            .get(&server.url("/flaky"))
            .retries(1)
            .backoff(Duration::from_millis(1))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn per_request_timeout_override() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500));
        });

        let err = test_client()
            .get(&server.url("/slow"))
            .timeout(Duration::from_millis(50))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = retrying_client(1)
            .get(&format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Transport(_)), "got {err}");
    }

    #[tokio::test]
    async fn http_rejected_when_tls_only() {
        let client = HttpClientBuilder::new().build().unwrap();
        let err = client
            .get("http://localhost:9/")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { .. }));
    }

    #[tokio::test]
    async fn relative_url_rejected() {
        let err = test_client().get("/pokemon/25").send().await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: crate::InvalidUriKind::MissingAuthority,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_header_deferred_to_send() {
        let err = test_client()
            .get("http://localhost:9/")
            .header("bad header", "x")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderName(_)));
    }

    #[tokio::test]
    async fn concurrent_requests_share_client() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/ping");
            then.status(200).json_body(json!({"ok": true}));
        });

        let client = test_client();
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let client = client.clone();
                let url = server.url("/ping");
                tokio::spawn(async move { client.get(&url).send().await.map(|r| r.status()) })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), http::StatusCode::OK);
        }
        assert_eq!(mock.calls(), 20);
    }

    /// Serves `replies[n]` on the n-th connection (the last one repeats),
    /// holding each socket open for its delay before closing it.
    async fn raw_server(
        replies: Vec<(&'static str, Duration)>,
    ) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/pokemon/25", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (reply, hold) = replies[n.min(replies.len() - 1)];
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    if socket.read(&mut buf).await.is_err()
                        || socket.write_all(reply.as_bytes()).await.is_err()
                    {
                        return;
                    }
                    tokio::time::sleep(hold).await;
                });
            }
        });

        (url, connections)
    }

    const PARTIAL: &str =
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"id\":";
    const COMPLETE: &str =
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 9\r\n\r\n{\"id\":25}";

    #[tokio::test]
    async fn stalled_body_hits_attempt_timeout() {
        let (url, connections) = raw_server(vec![(PARTIAL, Duration::from_secs(30))]).await;
        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .retry(None)
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), client.get(&url).send())
            .await
            .expect("attempt deadline must cover the body");

        let err = result.unwrap_err();
        assert!(matches!(err, HttpError::Timeout(d) if d == Duration::from_millis(200)));
        assert_eq!(connections.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn truncated_body_is_retried() {
        let (url, connections) = raw_server(vec![
            (PARTIAL, Duration::ZERO),
            (COMPLETE, Duration::from_secs(1)),
        ])
        .await;

        let value: serde_json::Value = retrying_client(2)
            .get(&url)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(value["id"], 25);
        assert_eq!(connections.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn truncated_body_without_retries_is_transport_error() {
        let (url, _) = raw_server(vec![(PARTIAL, Duration::ZERO)]).await;
        let err = test_client().get(&url).send().await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)), "got {err}");
    }
}
