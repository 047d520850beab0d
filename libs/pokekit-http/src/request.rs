use crate::client::{BufferedService, map_buffer_error, try_acquire_buffer_slot};
use crate::config::{RequestOverrides, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use serde::Serialize;
use std::time::Duration;
use tower::Service;

/// Request builder with a fluent API
///
/// Errors from `header()` and `query()` are deferred to [`send()`](RequestBuilder::send).
///
/// ```ignore
/// let resp = client
///     .get("https://pokeapi.co/api/v2/pokemon")
///     .query(&[("limit", "20"), ("offset", "40")])
///     .timeout(Duration::from_secs(3))
///     .retries(0)
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    query: Vec<String>,
    headers: Vec<(http::header::HeaderName, http::header::HeaderValue)>,
    overrides: RequestOverrides,
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        method: http::Method,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            overrides: RequestOverrides::default(),
            error: None,
            transport_security,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Append url-encoded query parameters. May be called repeatedly.
    pub fn query<T: Serialize + ?Sized>(mut self, params: &T) -> Self {
        if self.error.is_some() {
            return self;
        }

        match serde_urlencoded::to_string(params) {
            Ok(encoded) if encoded.is_empty() => {}
            Ok(encoded) => self.query.push(encoded),
            Err(e) => self.error = Some(HttpError::FormEncode(e)),
        }
        self
    }

    /// Per-attempt timeout for this request only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    /// Retries after the first attempt for this request only
    pub fn retries(mut self, retries: usize) -> Self {
        self.overrides.max_retries = Some(retries);
        self
    }

    /// Backoff base delay for this request only
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.overrides.backoff = Some(backoff);
        self
    }

    /// Apply a whole set of overrides; unset fields keep earlier values.
    pub fn overrides(mut self, overrides: RequestOverrides) -> Self {
        if let Some(timeout) = overrides.timeout {
            self.overrides.timeout = Some(timeout);
        }
        if let Some(retries) = overrides.max_retries {
            self.overrides.max_retries = Some(retries);
        }
        if let Some(backoff) = overrides.backoff {
            self.overrides.backoff = Some(backoff);
        }
        self
    }

    fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{}", self.url, self.query.join("&"))
    }

    fn validate_url(&self, url: &str) -> Result<http::Uri, HttpError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.transport_security {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Send the request.
    ///
    /// Returns `Ok` for every HTTP status once retries are exhausted; use
    /// [`HttpResponse::json`] or [`HttpResponse::checked_bytes`] to turn
    /// non-2xx into an error.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` for deferred builder errors, invalid URLs,
    /// transport failures, timeouts, and `Overloaded` when the queue is full.
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let url = self.full_url();
        let uri = self.validate_url(&url)?;

        let mut builder = Request::builder().method(self.method).uri(uri);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        if !self.overrides.is_empty() {
            builder = builder.extension(self.overrides);
        }
        let request = builder.body(Full::new(Bytes::new()))?;

        try_acquire_buffer_slot(&mut self.service).await?;

        let inner: Response<ResponseBody> =
            self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
        })
    }
}
