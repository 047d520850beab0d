#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for `pokekit`
//!
//! A hyper-based client with:
//! - TLS via rustls and webpki roots (HTTPS only by default)
//! - Connection pooling
//! - A per-attempt timeout
//! - Retries with exponential backoff on transport failures, timeouts and 5xx
//! - Per-request timeout, retry and backoff overrides
//! - Transparent gzip/brotli/deflate decompression with a body size limit
//! - Concurrency limiting with fail-fast load shedding
//!
//! ```ignore
//! use pokekit_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let page: serde_json::Value = client
//!     .get("https://pokeapi.co/api/v2/pokemon")
//!     .query(&[("limit", 20)])
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod layers;
mod request;
mod response;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT, DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig,
    RateLimitConfig, RequestOverrides, RetryConfig, RetryTrigger, TransportSecurity,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{
    AttemptTimeoutLayer, AttemptTimeoutService, RetryLayer, RetryService, UserAgentLayer,
    UserAgentService, calculate_backoff,
};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody};
