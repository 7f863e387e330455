//! OData literal values and their URL syntax

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// A typed scalar that can appear in a filter, key or function argument
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `null`
    Null,
    /// Edm.String
    String(String),
    /// Edm.Int16/Int32/Int64
    Int(i64),
    /// Edm.Double/Single
    Float(f64),
    /// Edm.Decimal, kept as its textual digits so no precision is lost
    Decimal(String),
    /// Edm.Boolean
    Bool(bool),
    /// Edm.DateTimeOffset
    DateTime(DateTime<Utc>),
    /// A timestamp without offset; rendered as if it were already UTC
    NaiveDateTime(NaiveDateTime),
    /// Edm.Date
    Date(NaiveDate),
    /// Edm.Guid
    Guid(Uuid),
    /// Enum member, e.g. `Sales.Color'Red'`
    Enum { type_name: String, member: String },
}

impl Value {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build an enum member value
    pub fn enum_member(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Value::Enum {
            type_name: type_name.into(),
            member: member.into(),
        }
    }

    /// Render this value in OData literal syntax
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::String(s) => quote_string(s),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Decimal(d) => d.clone(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::NaiveDateTime(ndt) => ndt
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Guid(g) => g.hyphenated().to_string(),
            Value::Enum { type_name, member } => {
                format!("{}'{}'", type_name, member.replace('\'', "''"))
            }
        }
    }

    /// Convert a JSON value into a literal value
    ///
    /// Strings stay strings: a captured string that happens to look like a
    /// GUID or timestamp is still compared as a string. Callers that need
    /// typed literals insert a `Value` directly.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(Value::Float)
                }
            }
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Convert to JSON for request bodies
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::Decimal(d) => serde_json::Value::String(d.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Enum { member, .. } => serde_json::Value::String(member.clone()),
            other => serde_json::Value::String(other.to_literal()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_literal())
    }
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() { "INF" } else { "-INF" }.to_string()
    } else {
        // Debug keeps a trailing ".0" so the server sees a double, not an int
        format!("{:?}", f)
    }
}

/// Render a membership test, `(false)` when the set is empty
///
/// `in ()` is not valid OData, and an empty set can never match.
pub fn format_membership(path: &str, values: &[Value]) -> String {
    if values.is_empty() {
        return "(false)".to_string();
    }
    let items: Vec<String> = values.iter().map(Value::to_literal).collect();
    format!("{} in ({})", path, items.join(","))
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f as f64)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(i: $t) -> Self {
                    Value::Int(i as i64)
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::NaiveDateTime(dt)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
