//! Batch request encoding
//!
//! One operation list, two wire formats: `multipart/mixed` and the JSON
//! batch format. Changesets become nested multipart bodies or shared
//! `atomicityGroup` ids respectively.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{ODataError, Result};

use super::operation::Operation;

const CRLF: &str = "\r\n";

/// Batch wire format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFormat {
    #[default]
    Multipart,
    Json,
}

/// An operation with its batch-assigned Content-ID
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub content_id: String,
    pub operation: Operation,
}

/// Mutations the service must apply atomically
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    pub id: String,
    pub entries: Vec<BatchEntry>,
}

impl Changeset {
    pub fn boundary(&self) -> String {
        format!("changeset_{}", self.id)
    }
}

/// Top-level batch item
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Single(BatchEntry),
    Changeset(Changeset),
}

impl BatchItem {
    pub fn entries(&self) -> &[BatchEntry] {
        match self {
            BatchItem::Single(entry) => std::slice::from_ref(entry),
            BatchItem::Changeset(changeset) => &changeset.entries,
        }
    }
}

/// Encoded request body and its content type
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub content_type: String,
    pub body: String,
}

/// An ordered batch of operations and changesets
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    id: String,
    items: Vec<BatchItem>,
}

impl BatchRequest {
    pub fn builder() -> BatchRequestBuilder {
        BatchRequestBuilder::new()
    }

    pub fn boundary(&self) -> String {
        format!("batch_{}", self.id)
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Every operation in submission order, changeset members counted individually
    pub fn entries(&self) -> impl Iterator<Item = &BatchEntry> {
        self.items.iter().flat_map(|item| item.entries().iter())
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn encode(&self, format: BatchFormat) -> Result<EncodedBatch> {
        match format {
            BatchFormat::Multipart => Ok(self.encode_multipart()),
            BatchFormat::Json => self.encode_json(),
        }
    }

    fn encode_multipart(&self) -> EncodedBatch {
        let boundary = self.boundary();
        let mut body = String::new();

        for item in &self.items {
            body.push_str(&format!("--{}{}", boundary, CRLF));
            match item {
                BatchItem::Single(entry) => write_http_part(&mut body, entry),
                BatchItem::Changeset(changeset) => {
                    let inner = changeset.boundary();
                    body.push_str(&format!(
                        "Content-Type: multipart/mixed; boundary={}{}{}",
                        inner, CRLF, CRLF
                    ));
                    for entry in &changeset.entries {
                        body.push_str(&format!("--{}{}", inner, CRLF));
                        write_http_part(&mut body, entry);
                    }
                    body.push_str(&format!("--{}--{}", inner, CRLF));
                }
            }
        }
        body.push_str(&format!("--{}--{}", boundary, CRLF));

        EncodedBatch {
            content_type: format!("multipart/mixed; boundary={}", boundary),
            body,
        }
    }

    fn encode_json(&self) -> Result<EncodedBatch> {
        let mut requests = Vec::new();
        for item in &self.items {
            let group = match item {
                BatchItem::Single(_) => None,
                BatchItem::Changeset(changeset) => Some(changeset.id.as_str()),
            };
            for entry in item.entries() {
                requests.push(json_request(entry, group));
            }
        }

        let body = serde_json::to_string(&json!({ "requests": requests }))?;
        Ok(EncodedBatch {
            content_type: "application/json".to_string(),
            body,
        })
    }
}

fn write_http_part(body: &mut String, entry: &BatchEntry) {
    let op = &entry.operation;
    body.push_str(&format!("Content-Type: application/http{}", CRLF));
    body.push_str(&format!("Content-Transfer-Encoding: binary{}", CRLF));
    body.push_str(&format!("Content-ID: {}{}", entry.content_id, CRLF));
    body.push_str(CRLF);

    body.push_str(&format!("{} {} HTTP/1.1{}", op.http_method(), op.url(), CRLF));
    for (name, value) in op.request_headers() {
        body.push_str(&format!("{}: {}{}", name, value, CRLF));
    }
    let payload = op.body();
    if payload.is_some() {
        body.push_str(&format!("Content-Type: application/json{}", CRLF));
    }
    body.push_str(CRLF);
    if let Some(payload) = payload {
        body.push_str(&payload.to_string());
    }
    body.push_str(CRLF);
}

fn json_request(entry: &BatchEntry, group: Option<&str>) -> Value {
    let op = &entry.operation;
    let mut headers = Map::new();
    for (name, value) in op.request_headers() {
        headers.insert(name.to_ascii_lowercase(), Value::String(value));
    }

    let mut request = Map::new();
    request.insert("id".to_string(), Value::String(entry.content_id.clone()));
    request.insert(
        "method".to_string(),
        Value::String(op.http_method().to_string()),
    );
    request.insert("url".to_string(), Value::String(op.url().to_string()));
    if let Some(group) = group {
        request.insert("atomicityGroup".to_string(), Value::String(group.to_string()));
    }
    if let Some(payload) = op.body() {
        headers.insert(
            "content-type".to_string(),
            Value::String("application/json".to_string()),
        );
        request.insert("body".to_string(), payload);
    }
    request.insert("headers".to_string(), Value::Object(headers));
    Value::Object(request)
}

/// Builder for batch requests
///
/// Content-IDs are assigned sequentially from 1 across the whole batch.
#[derive(Debug, Default)]
pub struct BatchRequestBuilder {
    items: Vec<BatchItem>,
    next_id: u32,
}

impl BatchRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, operation: Operation) -> BatchEntry {
        self.next_id += 1;
        BatchEntry {
            content_id: self.next_id.to_string(),
            operation,
        }
    }

    /// Add a standalone operation
    pub fn add(mut self, operation: Operation) -> Self {
        let entry = self.entry(operation);
        self.items.push(BatchItem::Single(entry));
        self
    }

    /// Add several standalone operations
    pub fn add_all(self, operations: impl IntoIterator<Item = Operation>) -> Self {
        operations.into_iter().fold(self, Self::add)
    }

    /// Add an atomic group of mutations
    pub fn changeset(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        let entries = operations.into_iter().map(|op| self.entry(op)).collect();
        self.items.push(BatchItem::Changeset(Changeset {
            id: Uuid::new_v4().to_string(),
            entries,
        }));
        self
    }

    pub fn build(self) -> Result<BatchRequest> {
        if self.items.is_empty() {
            return Err(ODataError::UnsupportedConstruct(
                "batch with no operations".to_string(),
            ));
        }
        for item in &self.items {
            if let BatchItem::Changeset(changeset) = item {
                if changeset.entries.is_empty() {
                    return Err(ODataError::UnsupportedConstruct(
                        "empty changeset".to_string(),
                    ));
                }
                if let Some(entry) = changeset.entries.iter().find(|e| !e.operation.is_mutation()) {
                    return Err(ODataError::UnsupportedConstruct(format!(
                        "{} operation inside a changeset (Content-ID {})",
                        entry.operation.http_method(),
                        entry.content_id
                    )));
                }
            }
        }

        Ok(BatchRequest {
            id: Uuid::new_v4().to_string(),
            items: self.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchRequest {
        BatchRequest::builder()
            .add(Operation::get("People('russell')"))
            .changeset([
                Operation::create("People", json!({"UserName": "kim"})),
                Operation::update("People", "kim", json!({"Age": 30})).with_etag("W/\"1\""),
            ])
            .build()
            .unwrap()
    }

    #[test]
    fn test_content_ids_are_sequential() {
        let batch = sample();
        let ids: Vec<&str> = batch.entries().map(|e| e.content_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_multipart_layout() {
        let batch = sample();
        let encoded = batch.encode(BatchFormat::Multipart).unwrap();
        let boundary = batch.boundary();
        assert_eq!(
            encoded.content_type,
            format!("multipart/mixed; boundary={}", boundary)
        );

        let body = &encoded.body;
        assert!(body.starts_with(&format!("--{}\r\n", boundary)));
        assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
        assert_eq!(body.matches("Content-Type: application/http").count(), 3);
        assert_eq!(body.matches("Content-Transfer-Encoding: binary").count(), 3);
        assert!(body.contains("Content-ID: 1\r\n\r\nGET People('russell') HTTP/1.1\r\n"));
        assert!(body.contains("POST People HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{\"UserName\":\"kim\"}\r\n"));
        assert!(body.contains("PATCH People('kim') HTTP/1.1\r\nIf-Match: W/\"1\"\r\n"));
        assert!(body.contains("Content-Type: multipart/mixed; boundary=changeset_"));
        assert_eq!(body.matches("--changeset_").count(), 3);
    }

    #[test]
    fn test_json_layout() {
        let batch = sample();
        let encoded = batch.encode(BatchFormat::Json).unwrap();
        assert_eq!(encoded.content_type, "application/json");

        let value: Value = serde_json::from_str(&encoded.body).unwrap();
        let requests = value["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0]["method"], "GET");
        assert!(requests[0].get("atomicityGroup").is_none());
        assert_eq!(requests[1]["atomicityGroup"], requests[2]["atomicityGroup"]);
        assert_eq!(requests[1]["body"], json!({"UserName": "kim"}));
        assert_eq!(requests[2]["headers"]["if-match"], "W/\"1\"");
        assert_eq!(requests[2]["url"], "People('kim')");
    }

    #[test]
    fn test_get_in_changeset_rejected() {
        let err = BatchRequest::builder()
            .changeset([Operation::get("People")])
            .build()
            .unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedConstruct(ref m) if m.contains("GET")));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(BatchRequest::builder().build().is_err());
        assert!(BatchRequest::builder().changeset([]).build().is_err());
    }
}
