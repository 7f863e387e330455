//! Retry policy and request timing configuration

pub mod config;
pub mod retry;

pub use config::{PollingConfig, ResilienceConfig, ResilienceConfigBuilder, RetryConfig, TimeoutConfig};
pub use retry::{RetryPolicy, sleep_cancellable};
