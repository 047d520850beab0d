use crate::cache::{FetchOptions, ResponseCache};
use crate::config::PokeConfig;
use crate::error::ApiError;
use crate::expand::{self, ExpandOptions, Expanded};
use crate::key::RequestKey;
use crate::pagination::{self, Page};
use crate::resource::Resource;
use crate::transport::{HttpTransport, RequestSpec, Transport};
use pokekit_http::HttpClientBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Async PokeAPI client
///
/// Cheap to clone; clones share the transport, the response cache and the
/// in-flight registry, so identical concurrent calls from any clone are
/// served by one network fetch.
///
/// ```ignore
/// let poke = pokekit::Poke::new()?;
/// let pikachu = poke.resource("pokemon").get("pikachu").await?;
/// println!("{}", pikachu["base_experience"]);
/// ```
#[derive(Clone)]
pub struct Poke {
    inner: Arc<Inner>,
}

struct Inner {
    config: PokeConfig,
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
}

impl Poke {
    /// Client with default settings against the public API.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the HTTP transport cannot be built.
    pub fn new() -> Result<Self, ApiError> {
        Self::from_config(PokeConfig::default())
    }

    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid or the
    /// HTTP transport cannot be built.
    pub fn from_config(config: PokeConfig) -> Result<Self, ApiError> {
        let config = config.validated()?;
        let client = HttpClientBuilder::with_config(config.http_config())
            .build()
            .map_err(|e| ApiError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Self::with_transport(Arc::new(HttpTransport::new(client)), config)
    }

    /// Client over a custom [`Transport`] (a fake in tests, a proxy, ...).
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: PokeConfig,
    ) -> Result<Self, ApiError> {
        let config = config.validated()?;
        tracing::debug!(
            base_url = %config.base_url,
            cache_ttl_ms = config.cache.ttl.as_millis(),
            cache_max_entries = config.cache.max_entries,
            "pokekit client created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                cache: ResponseCache::new(&config.cache),
                config,
                transport,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PokeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Absolute URL for `target`: absolute URLs pass through, anything else
    /// is appended to the base URL.
    #[must_use]
    pub fn resolve(&self, target: &str) -> String {
        if target.starts_with("https://") || target.starts_with("http://") {
            target.to_owned()
        } else {
            format!(
                "{}/{}",
                self.inner.config.base_url,
                target.trim_start_matches('/')
            )
        }
    }

    /// Cache key `spec` would be stored under
    ///
    /// # Errors
    /// Returns `ApiError::InvalidRequest` if the resolved URL is malformed.
    pub fn key_for(&self, spec: &RequestSpec) -> Result<RequestKey, ApiError> {
        RequestKey::for_request(
            &spec.method,
            &self.resolve(&spec.target),
            &spec.params,
            &self.inner.config.cache.ignored_params,
        )
    }

    /// Execute one request through the cache and the single-flight registry.
    ///
    /// # Errors
    /// Returns the transport's error, or `ApiError::InvalidRequest` if the
    /// target does not resolve to a valid URL.
    pub async fn fetch(
        &self,
        spec: &RequestSpec,
        options: &FetchOptions,
    ) -> Result<Arc<Value>, ApiError> {
        let resolved = RequestSpec {
            target: self.resolve(&spec.target),
            ..spec.clone()
        };
        let key = RequestKey::for_request(
            &resolved.method,
            &resolved.target,
            &resolved.params,
            &self.inner.config.cache.ignored_params,
        )?;

        self.inner
            .cache
            .get_or_fetch(&key, options, || self.inner.transport.execute(&resolved))
            .await
    }

    /// GET a path relative to the base URL, e.g. `"pokemon/pikachu"`.
    ///
    /// # Errors
    /// Returns `ApiError` if the fetch fails.
    pub async fn get_json(&self, path: &str) -> Result<Arc<Value>, ApiError> {
        self.fetch(&RequestSpec::get(path), &FetchOptions::default())
            .await
    }

    /// GET an absolute URL, typically the `url` of a [`NamedResource`](crate::NamedResource).
    ///
    /// # Errors
    /// Returns `ApiError` if the fetch fails.
    pub async fn get_by_url(&self, url: &str) -> Result<Arc<Value>, ApiError> {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ApiError::InvalidRequest {
                message: format!("'{url}' is not an absolute URL"),
            });
        }
        self.fetch(&RequestSpec::get(url), &FetchOptions::default())
            .await
    }

    /// # Errors
    /// Returns `ApiError::Decode` if the payload does not match `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.get_json(path).await?;
        decode(&value)
    }

    #[must_use]
    pub fn resource<'a>(&'a self, name: &'a str) -> Resource<'a> {
        Resource::new(self, name)
    }

    /// First page of `endpoint` with `limit` items starting at `offset`.
    ///
    /// # Errors
    /// Returns `ApiError` if the fetch fails or the body is not a list.
    pub async fn list_page<T>(
        &self,
        endpoint: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Page<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        self.list_page_with(endpoint, limit, offset, &FetchOptions::default())
            .await
    }

    /// # Errors
    /// Returns `ApiError` if the fetch fails or the body is not a list.
    pub async fn list_page_with<T>(
        &self,
        endpoint: &str,
        limit: u64,
        offset: u64,
        options: &FetchOptions,
    ) -> Result<Page<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        let request = RequestSpec::get(endpoint)
            .param("limit", limit.to_string())
            .param("offset", offset.to_string());
        pagination::fetch_page(self.clone(), request, *options).await
    }

    /// Attach referenced data to a copy of `value`.
    ///
    /// Individual reference failures are reported in
    /// [`Expanded::failures`] and do not fail the call.
    ///
    /// # Errors
    /// Returns `ApiError::InvalidRequest` for a malformed path filter and
    /// `ApiError::ReservedKey` if a selected reference already carries the
    /// side-channel key.
    pub async fn expand(
        &self,
        value: &Value,
        options: &ExpandOptions,
    ) -> Result<Expanded, ApiError> {
        expand::expand(self, value, options).await
    }

    /// Fetch the root described by `spec`, then expand it.
    ///
    /// # Errors
    /// Returns `ApiError` if the root fetch fails, plus everything
    /// [`Poke::expand`] returns.
    pub async fn expand_from(
        &self,
        spec: &RequestSpec,
        options: &ExpandOptions,
    ) -> Result<Expanded, ApiError> {
        let root = self.fetch(spec, &options.fetch).await?;
        self.expand(&root, options).await
    }
}

impl fmt::Debug for Poke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poke")
            .field("base_url", &self.inner.config.base_url)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

pub fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, ApiError> {
    T::deserialize(value).map_err(|e| ApiError::Decode {
        message: e.to_string(),
    })
}
