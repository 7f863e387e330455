//! OData client
//!
//! Executes queries, single operations and batches over a [`Transport`],
//! applying the retry policy, optimistic concurrency and page following.

use std::sync::Arc;

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::operations::{BatchFormat, BatchRequest, BatchResponseParser, BatchResults, Operation};
use super::query::{Query, ResponseEnvelope};
use super::resilience::{PollingConfig, ResilienceConfig, RetryPolicy};
use super::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
use crate::config::ClientConfig;
use crate::error::{ODataError, Result};

/// An entity together with the ETag it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub value: T,
    pub etag: Option<String>,
}

/// Client for a single OData service root
#[derive(Clone)]
pub struct ODataClient {
    service_root: String,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    polling: PollingConfig,
    batch_format: BatchFormat,
    headers: Vec<(String, String)>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ODataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ODataClient")
            .field("service_root", &self.service_root)
            .field("retry", &self.retry)
            .field("polling", &self.polling)
            .field("batch_format", &self.batch_format)
            .finish_non_exhaustive()
    }
}

impl ODataClient {
    pub fn new(service_root: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let service_root = service_root.into().trim_end_matches('/').to_string();
        Self {
            service_root,
            transport,
            retry: RetryPolicy::default(),
            polling: PollingConfig::default(),
            batch_format: BatchFormat::default(),
            headers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build a reqwest-backed client from loaded configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut transport = ReqwestTransport::new(&config.resilience.timeout)?;
        if let Some(token) = &config.bearer_token {
            transport = transport.with_bearer_token(token);
        }
        let mut client = Self::new(&config.service_root, Arc::new(transport))
            .with_resilience(&config.resilience)
            .with_batch_format(config.batch_format);
        if let Some(size) = config.max_page_size {
            client = client.with_header("Prefer", format!("odata.maxpagesize={}", size));
        }
        Ok(client)
    }

    pub fn with_resilience(mut self, resilience: &ResilienceConfig) -> Self {
        self.retry = RetryPolicy::new(resilience.retry.clone());
        self.polling = resilience.polling.clone();
        self
    }

    pub fn with_batch_format(mut self, format: BatchFormat) -> Self {
        self.batch_format = format;
        self
    }

    /// Header sent on every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Token checked before every attempt, page and poll
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn service_root(&self) -> &str {
        &self.service_root
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    /// Absolute links pass through verbatim; relative ones join the service root
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.service_root, url.trim_start_matches('/'))
        }
    }

    /// Send a request under the retry policy
    ///
    /// Returns any response below 500; 5xx and transport failures are
    /// retried and surface as errors once retries run out.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let name = format!("{} {}", request.method, request.url);
        let request = request.headers(self.headers.iter().cloned());
        self.retry
            .execute(&name, &self.cancel, || {
                let request = request.clone();
                async move {
                    let url = request.url.clone();
                    let response = self
                        .transport
                        .send(request)
                        .await
                        .map_err(|e| e.into_odata(&url))?;
                    if response.status >= 500 {
                        return Err(ODataError::from_status(response.status, url, response.body));
                    }
                    Ok(response)
                }
            })
            .await
    }

    /// Turn non-success statuses and HTML payloads into errors
    pub fn check(response: HttpResponse, url: &str) -> Result<HttpResponse> {
        if !response.is_success() {
            return Err(ODataError::from_status(response.status, url, response.body));
        }
        if response.looks_like_html() {
            return Err(ODataError::HtmlResponse {
                status: response.status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_checked(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        let url = self.resolve_url(url);
        let request = HttpRequest::get(&url).headers(headers.iter().cloned());
        Self::check(self.send(request).await?, &url)
    }

    /// Fetch one page from an explicit URL (e.g. a next link)
    pub async fn fetch_page(&self, url: &str, headers: &[(String, String)]) -> Result<ResponseEnvelope> {
        let response = self.get_checked(url, headers).await?;
        ResponseEnvelope::from_body(&response.body, response.header("ETag"))
    }

    /// Execute a query and return its first page
    pub async fn execute_query(&self, query: &Query) -> Result<ResponseEnvelope> {
        debug!("Executing query: {}", query.to_url());
        self.fetch_page(&query.to_url(), &query.headers).await
    }

    /// Execute a query and follow next links until the last page
    ///
    /// Pages are fetched one at a time; the first reported count is kept.
    pub async fn query_all(&self, query: &Query) -> Result<ResponseEnvelope> {
        self.follow_pages(&query.to_url(), &query.headers).await
    }

    pub(crate) async fn follow_pages(
        &self,
        first_url: &str,
        headers: &[(String, String)],
    ) -> Result<ResponseEnvelope> {
        let mut url = first_url.to_string();
        let mut result = ResponseEnvelope::default();
        let mut pages = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ODataError::Cancelled);
            }
            let page = self.fetch_page(&url, headers).await?;
            pages += 1;
            debug!("Page {} returned {} records", pages, page.len());

            let next = page.next_link.clone();
            result.extend_page(page);
            match next {
                Some(link) => url = link,
                None => break,
            }
        }

        info!("Fetched {} records across {} pages", result.len(), pages);
        Ok(result)
    }

    /// Read an entity and the ETag it carries
    pub async fn get_with_etag<T: DeserializeOwned>(&self, url: &str) -> Result<Tagged<T>> {
        let page = self.fetch_page(url, &[]).await?;
        if page.len() > 1 {
            return Err(ODataError::Protocol(format!(
                "expected a single entity from {}, got {}",
                url,
                page.len()
            )));
        }
        let etag = page.etag.clone();
        let entity = page
            .into_entity()
            .ok_or_else(|| ODataError::Protocol(format!("empty response body from {}", url)))?;
        Ok(Tagged {
            value: serde_json::from_value(entity)?,
            etag,
        })
    }

    pub async fn create(&self, entity_set: &str, data: Value) -> Result<Option<Value>> {
        self.execute(&Operation::create(entity_set, data)).await
    }

    /// PATCH `target`, sending `If-Match` when an ETag is given
    pub async fn update(&self, target: &str, data: Value, etag: Option<&str>) -> Result<()> {
        let operation = Operation::Update {
            target: target.to_string(),
            data,
            etag: etag.map(str::to_string),
            type_name: None,
        };
        self.execute(&operation).await.map(|_| ())
    }

    /// DELETE `target`, sending `If-Match` when an ETag is given
    pub async fn delete(&self, target: &str, etag: Option<&str>) -> Result<()> {
        let operation = Operation::Delete {
            target: target.to_string(),
            etag: etag.map(str::to_string),
        };
        self.execute(&operation).await.map(|_| ())
    }

    /// Execute a single operation, returning the response entity if any
    pub async fn execute(&self, operation: &Operation) -> Result<Option<Value>> {
        let url = self.resolve_url(operation.url());
        let mut request = HttpRequest::new(operation.http_method(), &url)
            .headers(operation.request_headers());
        if let Some(body) = operation.body() {
            request = request.json(&body);
        }

        let response = self.send(request).await?;
        if response.status == 412 {
            if let Some(request_etag) = operation.etag() {
                return Err(self.conflict(&url, request_etag, &response).await);
            }
        }

        let response = Self::check(response, &url)?;
        debug!("{} {} -> {}", operation.operation_type(), url, response.status);
        let page = ResponseEnvelope::from_body(&response.body, response.header("ETag"))?;
        Ok(page.into_entity())
    }

    /// Build the conflict error, asking the server for its current ETag when
    /// the 412 response did not carry one
    async fn conflict(&self, url: &str, request_etag: &str, response: &HttpResponse) -> ODataError {
        let current_etag = match response.header("ETag") {
            Some(etag) => Some(etag.to_string()),
            None => match self.fetch_page(url, &[]).await {
                Ok(page) => page.etag,
                Err(e) => {
                    debug!("Could not read current ETag for {}: {}", url, e);
                    None
                }
            },
        };
        ODataError::ConcurrencyConflict {
            url: url.to_string(),
            request_etag: request_etag.to_string(),
            current_etag,
        }
    }

    /// Submit a batch in the client's configured format
    pub async fn execute_batch(&self, batch: &BatchRequest) -> Result<BatchResults> {
        self.execute_batch_as(batch, self.batch_format).await
    }

    pub async fn execute_batch_as(&self, batch: &BatchRequest, format: BatchFormat) -> Result<BatchResults> {
        let encoded = batch.encode(format)?;
        let url = self.resolve_url("$batch");
        let request = HttpRequest::new(Method::Post, &url)
            .header("Accept", accept_for(format))
            .body(encoded.content_type, encoded.body);

        info!("Submitting batch of {} operations", batch.len());
        let response = Self::check(self.send(request).await?, &url)?;
        let content_type = response
            .header("Content-Type")
            .ok_or_else(|| ODataError::Protocol("batch response without Content-Type".to_string()))?;
        let results = BatchResponseParser::parse(batch, content_type, &response.body)?;
        info!(
            "Batch completed: {} succeeded, {} failed",
            results.len() - results.failures().count(),
            results.failures().count()
        );
        Ok(results)
    }
}

fn accept_for(format: BatchFormat) -> &'static str {
    match format {
        BatchFormat::Multipart => "multipart/mixed",
        BatchFormat::Json => "application/json",
    }
}
