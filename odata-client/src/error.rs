//! Error types for OData client operations

use thiserror::Error;

use crate::api::query::parser::ParseError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ODataError>;

/// Every failure the client can surface
///
/// Status-derived variants carry the URL and raw body so callers can log or
/// inspect the server's error payload without re-issuing the request.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ODataError {
    /// The transport could not complete the exchange (connection, timeout, ...)
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// 5xx response, surfaced once retries are exhausted
    #[error("Server error {status} for {url}: {body}")]
    Server { status: u16, url: String, body: String },

    /// 4xx response without a more specific variant
    #[error("Client error {status} for {url}: {body}")]
    Client { status: u16, url: String, body: String },

    /// 404
    #[error("Not found: {url}")]
    NotFound { url: String, body: String },

    /// 401 or 403
    #[error("Unauthorized ({status}) for {url}")]
    Unauthorized { status: u16, url: String, body: String },

    /// A status outside the 4xx/5xx error ranges where success was expected
    /// (redirects, informational codes)
    #[error("Unexpected status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String, body: String },

    /// 412 on a conditional request
    #[error(
        "Concurrency conflict for {url}: sent ETag {request_etag}, server has {}",
        current_etag.as_deref().unwrap_or("<unknown>")
    )]
    ConcurrencyConflict {
        url: String,
        request_etag: String,
        current_etag: Option<String>,
    },

    /// The wire shape did not match the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A predicate or query construct cannot be expressed in OData
    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// A predicate string failed to parse
    #[error("Failed to parse predicate: {0}")]
    Parse(#[from] ParseError),

    /// A success status carried an HTML page (usually a login redirect)
    #[error("Received HTML instead of OData payload from {url} (status {status})")]
    HtmlResponse { status: u16, url: String },

    /// An async operation was still running when the poll limit was reached
    #[error("Async operation at {url} still running after {polls} polls")]
    PollingExhausted { url: String, polls: u32 },

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ODataError {
    fn from(e: serde_json::Error) -> Self {
        ODataError::Json(e.to_string())
    }
}

impl ODataError {
    /// Classify a non-success status into the matching error variant
    ///
    /// 412 is not handled here because the conflict variant needs the
    /// caller's ETag; see `ODataClient`.
    pub fn from_status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        let body = body.into();
        match status {
            401 | 403 => ODataError::Unauthorized { status, url, body },
            404 => ODataError::NotFound { url, body },
            400..=499 => ODataError::Client { status, url, body },
            500..=599 => ODataError::Server { status, url, body },
            _ => ODataError::UnexpectedStatus { status, url, body },
        }
    }

    /// Whether the retry policy may try the request again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ODataError::Transport { .. } | ODataError::Server { .. })
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ODataError::Server { status, .. }
            | ODataError::Client { status, .. }
            | ODataError::Unauthorized { status, .. }
            | ODataError::UnexpectedStatus { status, .. }
            | ODataError::HtmlResponse { status, .. } => Some(*status),
            ODataError::NotFound { .. } => Some(404),
            ODataError::ConcurrencyConflict { .. } => Some(412),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(
            ODataError::from_status(401, "u", ""),
            ODataError::Unauthorized { status: 401, .. }
        ));
        assert!(matches!(
            ODataError::from_status(403, "u", ""),
            ODataError::Unauthorized { status: 403, .. }
        ));
        assert!(matches!(
            ODataError::from_status(404, "u", ""),
            ODataError::NotFound { .. }
        ));
        assert!(matches!(
            ODataError::from_status(400, "u", "bad"),
            ODataError::Client { status: 400, .. }
        ));
        assert!(matches!(
            ODataError::from_status(503, "u", ""),
            ODataError::Server { status: 503, .. }
        ));
        for status in [302, 304, 101] {
            let err = ODataError::from_status(status, "u", "");
            assert!(matches!(err, ODataError::UnexpectedStatus { .. }));
            assert_eq!(err.status(), Some(status));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_retryable() {
        assert!(ODataError::from_status(500, "u", "").is_retryable());
        assert!(
            ODataError::Transport {
                url: "u".into(),
                message: "reset".into()
            }
            .is_retryable()
        );
        assert!(!ODataError::from_status(400, "u", "").is_retryable());
        assert!(!ODataError::Protocol("x".into()).is_retryable());
    }

    #[test]
    fn test_conflict_display() {
        let err = ODataError::ConcurrencyConflict {
            url: "Products(1)".into(),
            request_etag: "\"v1\"".into(),
            current_etag: Some("\"v2\"".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"v1\""));
        assert!(msg.contains("\"v2\""));
        assert_eq!(err.status(), Some(412));
    }

    #[test]
    fn test_json_error_converts() {
        let err: ODataError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ODataError::Json(_)));
        assert!(!err.is_retryable());
    }
}
