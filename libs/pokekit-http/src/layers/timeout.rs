use crate::config::RequestOverrides;
use crate::error::HttpError;
use http::Request;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

/// Bounds every attempt by a deadline.
///
/// The deadline is the request's [`RequestOverrides::timeout`] when present,
/// otherwise the client default. Sits inside the retry loop, so each retry
/// gets a fresh deadline and an elapsed attempt surfaces as
/// [`HttpError::Timeout`], which the retry layer treats as transient.
///
/// The client stack buffers bodies beneath this layer, so the deadline spans
/// the body as well as the headers.
#[derive(Clone, Copy)]
pub struct AttemptTimeoutLayer {
    default: Duration,
}

impl AttemptTimeoutLayer {
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self { default }
    }
}

impl<S> Layer<S> for AttemptTimeoutLayer {
    type Service = AttemptTimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AttemptTimeoutService {
            inner,
            default: self.default,
        }
    }
}

#[derive(Clone)]
pub struct AttemptTimeoutService<S> {
    inner: S,
    default: Duration,
}

impl<S, B> Service<Request<B>> for AttemptTimeoutService<S>
where
    S: Service<Request<B>, Error = HttpError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let limit = req
            .extensions()
            .get::<RequestOverrides>()
            .and_then(|o| o.timeout)
            .unwrap_or(self.default);
        let fut = self.inner.call(req);
        Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(HttpError::Timeout(limit)),
            }
        })
    }
}
