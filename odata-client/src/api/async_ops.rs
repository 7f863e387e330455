//! Long-running operations (`Prefer: respond-async`)
//!
//! A service may answer a preferred-async request inline with any non-202
//! status, or accept it with 202 and a monitor URL in `Location` that is
//! polled until it stops answering 202.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use super::client::ODataClient;
use super::resilience::sleep_cancellable;
use super::transport::{HttpRequest, HttpResponse};
use crate::error::{ODataError, Result};

/// An accepted operation still running on the server
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncOperation {
    pub monitor_url: String,
    pub retry_after: Option<Duration>,
}

/// Result of a preferred-async call
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncOutcome {
    /// The service completed the request inline
    Completed(HttpResponse),
    /// The service accepted the request; poll the monitor
    Accepted(AsyncOperation),
}

/// Result of a single monitor poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Running { retry_after: Option<Duration> },
    Done(HttpResponse),
}

/// Parse a `Retry-After` value: delay in seconds or an HTTP-date
///
/// Dates in the past and negative delays yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }
    parse_http_date(trimmed, Utc::now())
}

fn parse_http_date(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response.header("Retry-After").and_then(parse_retry_after)
}

impl ODataClient {
    /// Send `request` with `Prefer: respond-async`
    pub async fn invoke_async(&self, request: HttpRequest) -> Result<AsyncOutcome> {
        let url = request.url.clone();
        let response = self.send(request.header("Prefer", "respond-async")).await?;

        if response.status != 202 {
            return Self::check(response, &url).map(AsyncOutcome::Completed);
        }

        let location = response.header("Location").ok_or_else(|| {
            ODataError::Protocol(format!(
                "202 Accepted from {} without a Location monitor URL",
                url
            ))
        })?;
        let operation = AsyncOperation {
            monitor_url: self.resolve_url(location),
            retry_after: retry_after(&response),
        };
        debug!("Async operation accepted, monitor at {}", operation.monitor_url);
        Ok(AsyncOutcome::Accepted(operation))
    }

    /// Query the monitor URL once
    pub async fn poll(&self, operation: &AsyncOperation) -> Result<PollStatus> {
        let url = &operation.monitor_url;
        let response = self.send(HttpRequest::get(url)).await?;
        if response.status == 202 {
            return Ok(PollStatus::Running {
                retry_after: retry_after(&response),
            });
        }
        Self::check(response, url).map(PollStatus::Done)
    }

    /// Poll until the operation finishes
    ///
    /// Waits honor `Retry-After` (clamped to the polling maximum), falling
    /// back to the configured interval.
    pub async fn wait(&self, operation: &AsyncOperation) -> Result<HttpResponse> {
        let polling = self.polling().clone();
        let mut delay = operation.retry_after;
        let mut polls = 0u32;

        loop {
            let wait = polling.clamp(delay.unwrap_or_else(|| polling.default_interval()));
            sleep_cancellable(wait, self.cancellation()).await?;

            if polling.max_polls > 0 && polls >= polling.max_polls {
                return Err(ODataError::PollingExhausted {
                    url: operation.monitor_url.clone(),
                    polls,
                });
            }
            polls += 1;

            match self.poll(operation).await? {
                PollStatus::Done(response) => {
                    debug!("Async operation finished after {} polls", polls);
                    return Ok(response);
                }
                PollStatus::Running { retry_after } => {
                    debug!("Async operation still running (poll {})", polls);
                    delay = retry_after;
                }
            }
        }
    }

    /// Invoke and, when accepted, wait for completion
    pub async fn invoke_and_wait(&self, request: HttpRequest) -> Result<HttpResponse> {
        match self.invoke_async(request).await? {
            AsyncOutcome::Completed(response) => Ok(response),
            AsyncOutcome::Accepted(operation) => self.wait(&operation).await,
        }
    }
}
