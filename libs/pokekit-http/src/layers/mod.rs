//! Tower layers composed by [`crate::HttpClientBuilder`].
//!
//! - [`RetryLayer`] - retries transport failures, timeouts and 5xx with exponential backoff
//! - [`AttemptTimeoutLayer`] - bounds each attempt, honouring per-request overrides
//! - [`UserAgentLayer`] - adds a User-Agent header

mod retry;
mod timeout;
mod user_agent;

pub use retry::{RetryLayer, RetryService, calculate_backoff};
pub use timeout::{AttemptTimeoutLayer, AttemptTimeoutService};
pub use user_agent::{UserAgentLayer, UserAgentService};
