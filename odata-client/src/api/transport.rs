//! HTTP transport seam
//!
//! The client only ever talks to a [`Transport`]; [`ReqwestTransport`] is the
//! production implementation and tests substitute a scripted one.

use std::fmt;

use async_trait::async_trait;
use log::debug;

use super::resilience::TimeoutConfig;
use crate::error::{ODataError, Result};

/// HTTP methods used by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header lookup over an ordered header list
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// An outgoing request with an absolute URL
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Raw body with an explicit content type
    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.into()));
        self.body = Some(body.into());
        self
    }

    /// JSON body
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.body("application/json", value.to_string())
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A received response; the body is read eagerly
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Heuristic for login pages and proxy error pages served with 2xx
    pub fn looks_like_html(&self) -> bool {
        if self
            .header("Content-Type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        {
            return true;
        }
        let start = self.body.trim_start();
        let prefix: String = start.chars().take(15).collect::<String>().to_ascii_lowercase();
        prefix.starts_with("<!doctype html") || prefix.starts_with("<html")
    }
}

/// The exchange could not be completed at the HTTP level
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn into_odata(self, url: &str) -> ODataError {
        ODataError::Transport {
            url: url.to_string(),
            message: self.message,
        }
    }
}

/// Sends a single HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.request_timeout())
            .connect_timeout(timeouts.connect_timeout())
            .build()
            .map_err(|e| ODataError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            bearer_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` on every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header("OData-Version", "4.0")
            .header("OData-MaxVersion", "4.0");
        if find_header(&request.headers, "Accept").is_none() {
            builder = builder.header("Accept", "application/json");
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!("{} {}", request.method, request.url);
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(format!("failed to read response body: {}", e)))?;

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200).with_header("ETag", "W/\"1\"");
        assert_eq!(response.header("etag"), Some("W/\"1\""));
        assert_eq!(response.header("Location"), None);
    }

    #[test]
    fn test_html_detection() {
        assert!(HttpResponse::new(200)
            .with_body("  <!DOCTYPE html><html></html>")
            .looks_like_html());
        assert!(HttpResponse::new(200)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .looks_like_html());
        assert!(!HttpResponse::new(200)
            .with_json(&serde_json::json!({"value": []}))
            .looks_like_html());
    }

    #[test]
    fn test_method_round_trip() {
        for m in [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert_eq!(Method::parse(m.as_str()), Some(m));
        }
        assert_eq!(Method::parse("patch"), Some(Method::Patch));
        assert_eq!(Method::parse("TRACE"), None);
    }

    #[test]
    fn test_json_request_sets_content_type() {
        let req = HttpRequest::new(Method::Post, "https://host/People")
            .json(&serde_json::json!({"Name": "A"}));
        assert_eq!(req.get_header("content-type"), Some("application/json"));
        assert_eq!(req.body.as_deref(), Some("{\"Name\":\"A\"}"));
    }
}
