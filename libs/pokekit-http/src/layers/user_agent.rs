use crate::error::HttpError;
use http::{HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Adds a User-Agent header unless the request already has one
#[derive(Clone)]
pub struct UserAgentLayer {
    user_agent: HeaderValue,
}

impl UserAgentLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if `user_agent` is not a valid header value
    pub fn try_new(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        let user_agent = HeaderValue::from_str(user_agent.as_ref())?;
        Ok(Self { user_agent })
    }
}

impl<S> Layer<S> for UserAgentLayer {
    type Service = UserAgentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAgentService {
            inner,
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Clone)]
pub struct UserAgentService<S> {
    inner: S,
    user_agent: HeaderValue,
}

impl<S, B> Service<Request<B>> for UserAgentService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        req.headers_mut()
            .entry(http::header::USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct EchoUa;

    impl Service<Request<()>> for EchoUa {
        type Response = Option<HeaderValue>;
        type Error = std::convert::Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<()>) -> Self::Future {
            std::future::ready(Ok(req.headers().get(http::header::USER_AGENT).cloned()))
        }
    }

    #[tokio::test]
    async fn adds_missing_user_agent() {
        let svc = UserAgentLayer::try_new("pokekit-test/1.0").unwrap().layer(EchoUa);
        let ua = svc.oneshot(Request::new(())).await.unwrap();
        assert_eq!(ua.unwrap(), "pokekit-test/1.0");
    }

    #[tokio::test]
    async fn keeps_caller_user_agent() {
        let svc = UserAgentLayer::try_new("pokekit-test/1.0").unwrap().layer(EchoUa);
        let req = Request::builder()
            .header(http::header::USER_AGENT, "custom/2.0")
            .body(())
            .unwrap();
        let ua = svc.oneshot(req).await.unwrap();
        assert_eq!(ua.unwrap(), "custom/2.0");
    }

    #[test]
    fn rejects_control_characters() {
        assert!(UserAgentLayer::try_new("bad\x00agent").is_err());
    }
}
