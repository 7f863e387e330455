//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retries, request timeouts and
//! async-operation polling with sane defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global resilience configuration for API operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub polling: PollingConfig,
}

/// Retry on transport failures and 5xx responses
///
/// A request is attempted at most `1 + max_retries` times, waiting a fixed
/// `delay_ms` between attempts. 4xx responses are never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
}

/// Per-request timeout applied by the HTTP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

/// Polling of async-operation monitor URLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval used when the monitor response has no `Retry-After`
    pub default_interval_ms: u64,
    /// Upper bound on any single wait, including server-requested ones
    pub max_interval_ms: u64,
    /// Give up after this many polls (0 = unbounded)
    pub max_polls: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Fewer, slower retries for shared production services
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            delay_ms: 1000,
        }
    }

    /// More, faster retries for local services
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            delay_ms: 100,
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 1000,
            max_interval_ms: 30_000,
            max_polls: 0,
        }
    }
}

impl PollingConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    /// Clamp a server-requested wait to the configured maximum
    pub fn clamp(&self, wait: Duration) -> Duration {
        wait.min(Duration::from_millis(self.max_interval_ms))
    }
}

impl ResilienceConfig {
    /// Create a new builder for ResilienceConfig
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Conservative config for production environments
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            timeout: TimeoutConfig {
                request_timeout_secs: 120,
                connect_timeout_secs: 15,
            },
            polling: PollingConfig {
                default_interval_ms: 2000,
                max_interval_ms: 60_000,
                max_polls: 0,
            },
        }
    }

    /// Aggressive config for development/testing
    pub fn development() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            timeout: TimeoutConfig {
                request_timeout_secs: 30,
                connect_timeout_secs: 5,
            },
            polling: PollingConfig {
                default_interval_ms: 250,
                max_interval_ms: 5000,
                max_polls: 0,
            },
        }
    }

    /// No retries and no waiting (for tests)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig::none(),
            timeout: TimeoutConfig::default(),
            polling: PollingConfig {
                default_interval_ms: 0,
                max_interval_ms: 0,
                max_polls: 0,
            },
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the number of retries after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set the fixed delay between attempts
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Configure async-operation polling
    pub fn polling_config(mut self, polling: PollingConfig) -> Self {
        self.config.polling = polling;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.polling.default_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_polls(mut self, polls: u32) -> Self {
        self.config.polling.max_polls = polls;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
