use crate::config::{ExponentialBackoff, RequestOverrides, RetryConfig, RetryTrigger};
use crate::error::HttpError;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Tower layer that retries transient failures with exponential backoff
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
}

impl RetryLayer {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service that implements the retry loop
///
/// Retries `Err(Transport | Timeout)` and `Ok(Response)` with a 5xx status.
/// Once retries are exhausted the last outcome is returned as is, so a
/// persistent 503 comes back as `Ok(Response)` and the caller decides how to
/// surface it.
///
/// A [`RequestOverrides`] extension on the request replaces `max_retries`
/// and the backoff base for that request only.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Consume the instance that was poll_ready'd.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        let (parts, body) = req.into_parts();
        let overrides = parts
            .extensions
            .get::<RequestOverrides>()
            .copied()
            .unwrap_or_default();
        let max_retries = overrides.max_retries.unwrap_or(self.config.max_retries);
        let backoff = match overrides.backoff {
            Some(initial) => ExponentialBackoff {
                initial,
                ..self.config.backoff.clone()
            },
            None => self.config.backoff.clone(),
        };
        let config = self.config.clone();
        let version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = Arc::new(parts);

        Box::pin(async move {
            let mut attempt = 0usize;
            loop {
                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = version;
                *req.extensions_mut() = extensions.clone();

                let mut svc = inner.clone();
                svc.ready().await?;

                match svc.call(req).await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        if attempt >= max_retries
                            || !config.should_retry(RetryTrigger::Status(status))
                        {
                            return Ok(resp);
                        }

                        let delay = calculate_backoff(&backoff, attempt);
                        if let Err(e) =
                            drain_response_body(resp, config.retry_response_drain_limit).await
                        {
                            tracing::debug!(
                                error = %e,
                                "failed to drain response body before retry"
                            );
                        }

                        tracing::debug!(
                            attempt = attempt + 1,
                            max_retries,
                            status,
                            uri = %parts.uri,
                            backoff_ms = delay.as_millis(),
                            "retrying request after server error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        if attempt >= max_retries || !config.should_retry(retry_trigger(&err)) {
                            return Err(err);
                        }

                        let delay = calculate_backoff(&backoff, attempt);
                        tracing::debug!(
                            attempt = attempt + 1,
                            max_retries,
                            error = %err,
                            uri = %parts.uri,
                            backoff_ms = delay.as_millis(),
                            "retrying request after error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                attempt += 1;
            }
        })
    }
}

/// Read and discard up to `limit` bytes so the connection can be reused.
async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<(), HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut drained = 0usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }

    Ok(())
}

fn retry_trigger(err: &HttpError) -> RetryTrigger {
    match err {
        HttpError::Transport(_) => RetryTrigger::TransportError,
        HttpError::Timeout(_) => RetryTrigger::Timeout,
        _ => RetryTrigger::NonRetryable,
    }
}

/// Delay before retry `attempt` (0-based).
///
/// Non-finite or negative multipliers fall back to 1.0.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let raw = backoff.initial.as_secs_f64() * multiplier.powi(exponent);
    let clamped = if raw.is_finite() {
        raw.clamp(0.0, max_secs)
    } else {
        max_secs
    };
    let delay = Duration::from_secs_f64(clamped);

    let delay = if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        delay + delay.mul_f64(factor)
    } else {
        delay
    };

    delay.min(Duration::from_secs_f64(max_secs))
}
