#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use odata_client::api::resilience::{PollingConfig, ResilienceConfig};
use odata_client::api::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use odata_client::api::ODataClient;
use tokio_util::sync::CancellationToken;

pub const ROOT: &str = "https://host/odata";

/// Transport that replays scripted responses and records every request
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, response: HttpResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn fail(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(TransportError::new(message)));
    }

    /// Cancel `token` once `calls` requests have been answered
    pub fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let calls = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("no scripted response left")));
        if let Some((after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if calls >= *after {
                token.cancel();
            }
        }
        response
    }
}

pub fn json_response(body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(200).with_json(&body)
}

/// Client without waits; `max_retries` retries on transient failures
pub fn client(mock: &Arc<MockTransport>, max_retries: u32) -> ODataClient {
    let resilience = ResilienceConfig::builder()
        .max_retries(max_retries)
        .retry_delay(Duration::ZERO)
        .polling_config(PollingConfig {
            default_interval_ms: 0,
            max_interval_ms: 0,
            max_polls: 0,
        })
        .build();
    ODataClient::new(ROOT, mock.clone()).with_resilience(&resilience)
}
