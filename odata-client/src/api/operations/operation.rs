//! Core operation types for OData reads and writes
//!
//! An [`Operation`] is a single request description that can be executed on
//! its own or grouped into a batch. Both batch wire formats are produced from
//! the same operation list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::query::{Key, Query};
use crate::api::transport::Method;

/// What a successful response body is expected to contain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// A single entity object
    #[default]
    Entity,
    /// An envelope with a `value` array
    Collection,
    /// No body (204)
    Empty,
}

/// A single read or write against an OData service
///
/// URLs are relative to the service root. In a batch, later operations may
/// address entities created earlier in the same changeset with `$<content-id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Read an entity or collection
    Get {
        url: String,
        #[serde(default)]
        shape: ResultShape,
    },
    /// Create a new entity in a collection
    Create {
        entity_set: String,
        data: Value,
        /// `@odata.type` written into the body when set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
    },
    /// Partially update an existing entity
    Update {
        target: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
    },
    /// Delete an entity
    Delete {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
    },
}

impl Operation {
    /// Read a single entity or arbitrary resource path
    pub fn get(url: impl Into<String>) -> Self {
        Self::Get {
            url: url.into(),
            shape: ResultShape::Entity,
        }
    }

    /// Read the result of a built query
    pub fn get_query(query: &Query) -> Self {
        let shape = if query.key.is_some() {
            ResultShape::Entity
        } else {
            ResultShape::Collection
        };
        Self::Get {
            url: query.to_url(),
            shape,
        }
    }

    /// Create a new Create operation
    pub fn create(entity_set: impl Into<String>, data: Value) -> Self {
        Self::Create {
            entity_set: entity_set.into(),
            data,
            type_name: None,
        }
    }

    /// Create a new Update operation addressing `entity_set(key)`
    pub fn update(entity_set: &str, key: impl Into<Key>, data: Value) -> Self {
        Self::Update {
            target: format!("{}{}", entity_set, key.into().to_segment()),
            data,
            etag: None,
            type_name: None,
        }
    }

    /// Create a new Delete operation addressing `entity_set(key)`
    pub fn delete(entity_set: &str, key: impl Into<Key>) -> Self {
        Self::Delete {
            target: format!("{}{}", entity_set, key.into().to_segment()),
            etag: None,
        }
    }

    /// Attach an `If-Match` precondition (ignored for reads and creates)
    pub fn with_etag(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Update { etag, .. } | Self::Delete { etag, .. } => *etag = Some(value.into()),
            Self::Get { .. } | Self::Create { .. } => {}
        }
        self
    }

    /// Attach an `@odata.type` discriminator to the write payload
    ///
    /// The string is written verbatim, e.g. `#Sales.PremiumCustomer`.
    pub fn with_type(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Create { type_name, .. } | Self::Update { type_name, .. } => {
                *type_name = Some(value.into())
            }
            Self::Get { .. } | Self::Delete { .. } => {}
        }
        self
    }

    /// Relative URL the operation targets
    pub fn url(&self) -> &str {
        match self {
            Self::Get { url, .. } => url,
            Self::Create { entity_set, .. } => entity_set,
            Self::Update { target, .. } => target,
            Self::Delete { target, .. } => target,
        }
    }

    /// Get the HTTP method for this operation
    pub fn http_method(&self) -> Method {
        match self {
            Self::Get { .. } => Method::Get,
            Self::Create { .. } => Method::Post,
            Self::Update { .. } => Method::Patch,
            Self::Delete { .. } => Method::Delete,
        }
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    pub fn etag(&self) -> Option<&str> {
        match self {
            Self::Update { etag, .. } | Self::Delete { etag, .. } => etag.as_deref(),
            Self::Get { .. } | Self::Create { .. } => None,
        }
    }

    pub fn result_shape(&self) -> ResultShape {
        match self {
            Self::Get { shape, .. } => *shape,
            Self::Create { .. } => ResultShape::Entity,
            Self::Update { .. } | Self::Delete { .. } => ResultShape::Empty,
        }
    }

    /// Only mutations may appear inside a changeset
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Get { .. })
    }

    /// Request payload with the type discriminator applied
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::Create {
                data, type_name, ..
            }
            | Self::Update {
                data, type_name, ..
            } => Some(with_discriminator(data, type_name.as_deref())),
            Self::Get { .. } | Self::Delete { .. } => None,
        }
    }

    /// Headers of the embedded request, excluding `Content-Type`
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(etag) = self.etag() {
            headers.push(("If-Match".to_string(), etag.to_string()));
        }
        if matches!(self, Self::Get { .. }) {
            headers.push(("Accept".to_string(), "application/json".to_string()));
        }
        headers
    }
}

fn with_discriminator(data: &Value, type_name: Option<&str>) -> Value {
    match (data, type_name) {
        (Value::Object(map), Some(type_name)) => {
            let mut map = map.clone();
            map.insert("@odata.type".to_string(), Value::String(type_name.to_string()));
            Value::Object(map)
        }
        _ => data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::query::QueryBuilder;
    use serde_json::json;

    #[test]
    fn test_update_addresses_key() {
        let op = Operation::update("People", "russell", json!({"Age": 40})).with_etag("W/\"1\"");
        assert_eq!(op.url(), "People('russell')");
        assert_eq!(op.http_method(), Method::Patch);
        assert_eq!(op.etag(), Some("W/\"1\""));
        assert_eq!(
            op.request_headers(),
            vec![("If-Match".to_string(), "W/\"1\"".to_string())]
        );
    }

    #[test]
    fn test_etag_ignored_on_create() {
        let op = Operation::create("People", json!({})).with_etag("W/\"1\"");
        assert_eq!(op.etag(), None);
        assert!(op.request_headers().is_empty());
    }

    #[test]
    fn test_type_discriminator_added_at_serialization() {
        let op = Operation::create("People", json!({"Name": "A"})).with_type("#Trip.Employee");
        assert_eq!(
            op.body(),
            Some(json!({"Name": "A", "@odata.type": "#Trip.Employee"}))
        );

        let plain = Operation::create("People", json!({"Name": "A"}));
        assert_eq!(plain.body(), Some(json!({"Name": "A"})));
    }

    #[test]
    fn test_get_query_shape() {
        let query = QueryBuilder::new("People").top(2).build().unwrap();
        let op = Operation::get_query(&query);
        assert_eq!(op.url(), "People?$top=2");
        assert_eq!(op.result_shape(), ResultShape::Collection);
        assert!(!op.is_mutation());
    }

    #[test]
    fn test_deserialize_from_json_file_form() {
        let ops: Vec<Operation> = serde_json::from_value(json!([
            {"op": "get", "url": "People(1)"},
            {"op": "delete", "target": "People(2)", "etag": "W/\"7\""}
        ]))
        .unwrap();
        assert_eq!(ops[0], Operation::get("People(1)"));
        assert_eq!(ops[1], Operation::delete("People", 2).with_etag("W/\"7\""));
    }
}
