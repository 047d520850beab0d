use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("pokekit/", env!("CARGO_PKG_VERSION"));

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Connection refused, DNS failure, reset, etc.
    TransportError,
    /// Attempt timeout
    Timeout,
    /// Specific HTTP status code
    Status(u16),
    /// Never retried (`Overloaded`, `ServiceClosed`, decoding errors, ...)
    NonRetryable,
}

impl RetryTrigger {
    pub const INTERNAL_SERVER_ERROR: Self = Self::Status(500);
    pub const BAD_GATEWAY: Self = Self::Status(502);
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);
    pub const GATEWAY_TIMEOUT: Self = Self::Status(504);
}

/// Exponential backoff configuration for retries
///
/// Delay before retry `n` (0-based) is `min(initial * multiplier^n, max)`,
/// plus 0-25% jitter when enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry (default: 300ms)
    pub initial: Duration,

    /// Upper bound for a single delay (default: 30s)
    pub max: Duration,

    /// Growth factor (default: 2.0)
    pub multiplier: f64,

    /// Add 0-25% random delay (default: false)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(300),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ExponentialBackoff {
    /// Backoff with the given base delay and default growth
    #[must_use]
    pub fn with_initial(initial: Duration) -> Self {
        Self {
            initial,
            ..Default::default()
        }
    }

    /// 1ms initial, 100ms max, no jitter
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Retry policy
///
/// Every request issued by this crate is a read, so retry decisions depend
/// only on the outcome: transport failures, attempt timeouts and 5xx
/// responses are retried, 4xx responses never are.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt (default: 2).
    /// Total attempts = 1 + `max_retries`
    pub max_retries: usize,

    pub backoff: ExponentialBackoff,

    /// Triggers that always retry.
    /// Default: `[TransportError, Timeout]`
    pub retry_on: HashSet<RetryTrigger>,

    /// Retry any 5xx status (default: true)
    pub retry_server_errors: bool,

    /// Maximum decompressed bytes drained from a retried response so the
    /// connection can go back to the pool (default: 64 KiB)
    pub retry_response_drain_limit: usize,
}

/// Default drain limit for response bodies before retry (64 KiB)
pub const DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT: usize = 64 * 1024;

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: ExponentialBackoff::default(),
            retry_on: HashSet::from([RetryTrigger::TransportError, RetryTrigger::Timeout]),
            retry_server_errors: true,
            retry_response_drain_limit: DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
        }
    }
}

impl RetryConfig {
    /// No retries; per-request overrides can still enable them
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger) -> bool {
        match trigger {
            RetryTrigger::Status(code) if self.retry_server_errors && (500..600).contains(&code) => {
                true
            }
            RetryTrigger::NonRetryable => false,
            other => self.retry_on.contains(&other),
        }
    }
}

/// Concurrency limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum concurrent requests (default: 100)
    pub max_concurrent_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 100,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_concurrent_requests: usize::MAX,
        }
    }
}

/// Transport security configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// HTTPS only
    #[default]
    TlsOnly,
    /// Allow plain HTTP (local mock servers)
    AllowInsecureHttp,
}

/// Per-request overrides of the client-wide timeout and retry policy.
///
/// Attached to the outgoing request as an extension; the retry and timeout
/// layers read it on every attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Retries after the first attempt
    pub max_retries: Option<usize>,
    /// Base delay of the exponential backoff
    pub backoff: Option<Duration>,
}

impl RequestOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.max_retries.is_none() && self.backoff.is_none()
    }
}

/// Overall HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Timeout of each individual attempt (default: 10s)
    pub request_timeout: Duration,

    /// Maximum decompressed response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    pub user_agent: String,

    /// Retry policy; `None` means no retries unless a request overrides it
    pub retry: Option<RetryConfig>,

    /// Concurrency limit; `None` disables limiting
    pub rate_limit: Option<RateLimitConfig>,

    pub transport: TransportSecurity,

    /// Capacity of the request queue in front of the stack (default: 1024)
    pub buffer_capacity: usize,

    /// Idle connection timeout (default: 90s)
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: Some(RetryConfig::default()),
            rate_limit: Some(RateLimitConfig::default()),
            transport: TransportSecurity::TlsOnly,
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// No retry, no concurrency limit, 1 MB bodies
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            retry: None,
            rate_limit: None,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 8,
            ..Default::default()
        }
    }

    /// Plain HTTP allowed, no retry, no concurrency limit
    ///
    /// **WARNING**: local mock servers only.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            retry: None,
            rate_limit: None,
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.backoff.initial, Duration::from_millis(300));
        assert!(!config.backoff.jitter);
        assert!(config.retry_server_errors);
    }

    #[test]
    fn server_errors_and_network_failures_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(RetryTrigger::TransportError));
        assert!(config.should_retry(RetryTrigger::Timeout));
        assert!(config.should_retry(RetryTrigger::INTERNAL_SERVER_ERROR));
        assert!(config.should_retry(RetryTrigger::SERVICE_UNAVAILABLE));
        assert!(config.should_retry(RetryTrigger::Status(599)));
    }

    #[test]
    fn client_errors_never_retry() {
        let config = RetryConfig::default();
        for code in [400, 401, 403, 404, 409, 422, 429] {
            assert!(
                !config.should_retry(RetryTrigger::Status(code)),
                "{code} must not be retried"
            );
        }
        assert!(!config.should_retry(RetryTrigger::NonRetryable));
    }

    #[test]
    fn server_error_retry_can_be_turned_off() {
        let config = RetryConfig {
            retry_server_errors: false,
            ..RetryConfig::default()
        };
        assert!(!config.should_retry(RetryTrigger::BAD_GATEWAY));
        assert!(config.should_retry(RetryTrigger::TransportError));
    }

    #[test]
    fn client_config_presets() {
        let config = HttpClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);

        let testing = HttpClientConfig::for_testing();
        assert_eq!(testing.transport, TransportSecurity::AllowInsecureHttp);
        assert!(testing.retry.is_none());

        let minimal = HttpClientConfig::minimal();
        assert!(minimal.rate_limit.is_none());
        assert_eq!(minimal.transport, TransportSecurity::TlsOnly);
    }

    #[test]
    fn overrides_empty() {
        assert!(RequestOverrides::default().is_empty());
        let overrides = RequestOverrides {
            max_retries: Some(0),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
    }
}
