use crate::error::ApiError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use pokekit_http::{
    DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig, RateLimitConfig, RetryConfig,
    TransportSecurity,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";

/// Prefix of environment overrides, e.g. `POKEKIT_CACHE__TTL=5m`
pub const ENV_PREFIX: &str = "POKEKIT_";

/// Client configuration
///
/// Every field has a default, so an empty YAML document is valid.
///
/// ```yaml
/// base_url: https://pokeapi.co/api/v2
/// timeout: 10s
/// retries: 2
/// backoff: 300ms
/// cache:
///   ttl: 5m
///   max_entries: 4096
/// expand:
///   depth: 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PokeConfig {
    /// API root; relative targets are resolved against it
    pub base_url: String,

    /// Per-attempt timeout
    #[serde(with = "crate::humantime_serde")]
    pub timeout: Duration,

    /// Retries after the first attempt
    pub retries: usize,

    /// Base delay; retry `n` waits `backoff * 2^n`
    #[serde(with = "crate::humantime_serde")]
    pub backoff: Duration,

    pub user_agent: String,

    /// Permit `http://` targets (local mock servers)
    pub allow_insecure_http: bool,

    /// In-flight request ceiling; 0 disables the limit
    pub max_concurrent_requests: usize,

    pub cache: CacheConfig,

    pub expand: ExpandDefaults,
}

impl Default for PokeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(300),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            allow_insecure_http: false,
            max_concurrent_requests: 100,
            cache: CacheConfig::default(),
            expand: ExpandDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime of a cached response
    #[serde(with = "crate::humantime_serde")]
    pub ttl: Duration,

    /// Capacity; least-recently-used entries are evicted beyond it
    pub max_entries: u64,

    /// Query parameters left out of the request key
    pub ignored_params: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 1024,
            ignored_params: vec!["_".to_owned(), "cache_bust".to_owned()],
        }
    }
}

/// Defaults used by [`ExpandOptions::from_defaults`](crate::ExpandOptions::from_defaults)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpandDefaults {
    pub depth: usize,
    pub max_requests: usize,
    pub concurrency: usize,
}

impl Default for ExpandDefaults {
    fn default() -> Self {
        Self {
            depth: 1,
            max_requests: 200,
            concurrency: 6,
        }
    }
}

impl PokeConfig {
    /// Layer defaults, an optional YAML file and `POKEKIT_*` environment
    /// variables (`__` separates nested keys).
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the file is missing or any layer fails
    /// to parse or validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ApiError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ApiError::Config {
                    message: format!("config file not found: {}", path.display()),
                });
            }
            tracing::debug!(path = %path.display(), "loading configuration file");
            figment = figment.merge(Yaml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validated()
    }

    /// Check values and normalize `base_url`.
    ///
    /// # Errors
    /// Returns `ApiError::Config` for an unusable base URL or zero-sized limits.
    pub fn validated(mut self) -> Result<Self, ApiError> {
        let trimmed = self.base_url.trim_end_matches('/');
        let parsed = url::Url::parse(trimmed).map_err(|e| ApiError::Config {
            message: format!("invalid base_url '{}': {e}", self.base_url),
        })?;
        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_insecure_http => {}
            "http" => {
                return Err(ApiError::Config {
                    message: "base_url uses http:// but allow_insecure_http is false".to_owned(),
                });
            }
            other => {
                return Err(ApiError::Config {
                    message: format!("unsupported base_url scheme '{other}'"),
                });
            }
        }
        self.base_url = trimmed.to_owned();

        if self.cache.max_entries == 0 {
            return Err(ApiError::Config {
                message: "cache.max_entries must be at least 1".to_owned(),
            });
        }
        self.expand.concurrency = self.expand.concurrency.max(1);
        Ok(self)
    }

    /// Configuration for the underlying HTTP transport
    #[must_use]
    pub fn http_config(&self) -> HttpClientConfig {
        let transport = if self.allow_insecure_http {
            TransportSecurity::AllowInsecureHttp
        } else {
            TransportSecurity::TlsOnly
        };
        let rate_limit = (self.max_concurrent_requests > 0).then_some(RateLimitConfig {
            max_concurrent_requests: self.max_concurrent_requests,
        });

        HttpClientConfig {
            request_timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            retry: Some(RetryConfig {
                max_retries: self.retries,
                backoff: ExponentialBackoff::with_initial(self.backoff),
                ..RetryConfig::default()
            }),
            rate_limit,
            transport,
            ..HttpClientConfig::default()
        }
    }

    /// Settings for tests against a local mock server: plain HTTP, fast backoff.
    #[must_use]
    pub fn for_testing(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            allow_insecure_http: true,
            backoff: Duration::from_millis(1),
            ..Self::default()
        }
    }
}
