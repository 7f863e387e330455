//! Query response envelope

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::client::ODataClient;
use crate::error::{ODataError, Result};

/// One page of a query response
///
/// Every field besides `value` is optional on the wire and stays `None`
/// when the service omits it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope<T = Value> {
    pub value: Vec<T>,
    pub count: Option<u64>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
    pub etag: Option<String>,
}

impl<T> Default for ResponseEnvelope<T> {
    fn default() -> Self {
        Self {
            value: Vec::new(),
            count: None,
            next_link: None,
            delta_link: None,
            etag: None,
        }
    }
}

impl<T> ResponseEnvelope<T> {
    /// Whether the service reported another page
    pub fn has_more(&self) -> bool {
        self.next_link.is_some()
    }

    pub fn records(&self) -> &[T] {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Append a following page: values concatenate, links come from the
    /// later page, and the first reported count wins
    pub fn extend_page(&mut self, page: ResponseEnvelope<T>) {
        self.value.extend(page.value);
        if self.count.is_none() {
            self.count = page.count;
        }
        self.next_link = page.next_link;
        if page.delta_link.is_some() {
            self.delta_link = page.delta_link;
        }
    }
}

impl ResponseEnvelope<Value> {
    /// Decode a response body
    ///
    /// A body without a `value` array is a single entity and becomes a
    /// one-element page. `etag_header` takes precedence over `@odata.etag`.
    pub fn from_body(body: &str, etag_header: Option<&str>) -> Result<Self> {
        if body.trim().is_empty() {
            return Ok(Self {
                etag: etag_header.map(str::to_string),
                ..Default::default()
            });
        }

        let json: Value = serde_json::from_str(body)?;
        let object = json.as_object().ok_or_else(|| {
            ODataError::Protocol("response body is not a JSON object".to_string())
        })?;

        let string_field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_string);
        let etag = etag_header
            .map(str::to_string)
            .or_else(|| string_field("@odata.etag"));

        match object.get("value") {
            Some(Value::Array(values)) => Ok(Self {
                value: values.clone(),
                count: object.get("@odata.count").and_then(parse_count),
                next_link: string_field("@odata.nextLink"),
                delta_link: string_field("@odata.deltaLink"),
                etag,
            }),
            _ => Ok(Self {
                value: vec![json.clone()],
                etag,
                ..Default::default()
            }),
        }
    }

    /// Deserialize every value into `T`, keeping the paging metadata
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<ResponseEnvelope<T>> {
        let value = self
            .value
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(ResponseEnvelope {
            value,
            count: self.count,
            next_link: self.next_link,
            delta_link: self.delta_link,
            etag: self.etag,
        })
    }

    /// The single entity of a non-collection response
    pub fn into_entity(self) -> Option<Value> {
        self.value.into_iter().next()
    }

    /// Fetch the page the next link points at, if any
    pub async fn next_page(&self, client: &ODataClient) -> Result<Option<ResponseEnvelope>> {
        match &self.next_link {
            Some(link) => Ok(Some(client.fetch_page(link, &[]).await?)),
            None => Ok(None),
        }
    }
}

/// `@odata.count` is a number, but some services send it as a string
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
