use crate::error::ApiError;
use async_trait::async_trait;
use pokekit_http::{HttpClient, RequestOverrides};
use serde_json::Value;
use std::time::Duration;

/// One logical request: method, target, query parameters and per-call
/// overrides of the client's timeout and retry policy.
///
/// `target` is either an absolute URL or a path relative to the configured
/// base URL (`"pokemon/25"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: http::Method,
    pub target: String,
    pub params: Vec<(String, String)>,
    pub overrides: RequestOverrides,
}

impl RequestSpec {
    #[must_use]
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            target: target.into(),
            params: Vec::new(),
            overrides: RequestOverrides::default(),
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: usize) -> Self {
        self.overrides.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.overrides.backoff = Some(backoff);
        self
    }

    /// Same method and overrides aimed at `url`, which already carries its
    /// own query (a pagination cursor).
    pub(crate) fn follow(&self, url: &str) -> Self {
        Self {
            method: self.method.clone(),
            target: url.to_owned(),
            params: Vec::new(),
            overrides: self.overrides,
        }
    }
}

/// Executes one request and decodes the JSON body.
///
/// Implementations map every failure into [`ApiError`]; the cache layer
/// never sees transport-specific errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `spec.target` is always absolute when called by [`Poke`](crate::Poke).
    async fn execute(&self, spec: &RequestSpec) -> Result<Value, ApiError>;
}

/// [`Transport`] over the retrying `pokekit-http` client
#[derive(Clone)]
pub struct HttpTransport {
    client: HttpClient,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, spec: &RequestSpec) -> Result<Value, ApiError> {
        tracing::debug!(method = %spec.method, url = %spec.target, "sending request");
        let value = self
            .client
            .request(spec.method.clone(), &spec.target)
            .query(&spec.params)
            .overrides(spec.overrides)
            .send()
            .await?
            .json::<Value>()
            .await?;
        Ok(value)
    }
}
