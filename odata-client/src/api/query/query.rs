//! Built query descriptor and URL rendering

use uuid::Uuid;

use super::expand::ExpandTree;
use super::value::{Value, quote_string};

/// Entity key for single-entity addressing: `Customers(42)`
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Int(i64),
    String(String),
    Guid(Uuid),
    /// `(OrderId=1,Sku='x')`
    Composite(Vec<(String, Value)>),
}

impl Key {
    pub fn composite<I, K, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Key::Composite(
            parts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Key segment including the parentheses
    pub fn to_segment(&self) -> String {
        match self {
            Key::Int(n) => format!("({})", n),
            Key::String(s) => format!("({})", encode_literal(&quote_string(s))),
            Key::Guid(g) => format!("({})", g.hyphenated()),
            Key::Composite(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, encode_literal(&value.to_literal())))
                    .collect();
                format!("({})", rendered.join(","))
            }
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Int(n as i64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Int(n as i64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Uuid> for Key {
    fn from(g: Uuid) -> Self {
        Key::Guid(g)
    }
}

/// Percent-encode a literal for a path segment; quotes stay readable
fn encode_literal(literal: &str) -> String {
    urlencoding::encode(literal).replace("%27", "'")
}

/// Bound function segment: `/Fn(a=1,b='x')`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<(String, Value)>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    pub fn to_segment(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(k, v)| format!("{}={}", k, encode_literal(&v.to_literal())))
            .collect();
        format!("{}({})", self.name, args.join(","))
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One `$orderby` clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse `"Name"`, `"Name asc"` or `"Name desc"`
    pub fn parse(clause: &str) -> Option<Self> {
        let mut parts = clause.split_whitespace();
        let field = parts.next()?;
        let direction = match parts.next().map(|d| d.to_ascii_lowercase()).as_deref() {
            None | Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(_) => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            field: field.replace('.', "/"),
            direction,
        })
    }

    pub fn to_odata_string(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.field.clone(),
            SortDirection::Desc => format!("{} desc", self.field),
        }
    }
}

/// Append `items` to `target`, skipping entries already present
pub(crate) fn push_unique<T: PartialEq>(target: &mut Vec<T>, items: impl IntoIterator<Item = T>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// A fully built query, ready to render or execute
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub entity_set: String,
    pub key: Option<Key>,
    pub function: Option<FunctionCall>,
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub expand: ExpandTree,
    pub orderby: Vec<OrderBy>,
    pub skip: Option<u32>,
    pub top: Option<u32>,
    pub count: bool,
    pub search: Option<String>,
    pub apply: Option<String>,
    /// Custom query parameters in insertion order
    pub params: Vec<(String, String)>,
    /// Request headers passed through verbatim
    pub headers: Vec<(String, String)>,
}

impl Query {
    pub fn new(entity_set: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            ..Default::default()
        }
    }

    /// Resource path: `entitySet[(key)][/function(args)]`
    pub fn path(&self) -> String {
        let mut path = self.entity_set.clone();
        if let Some(key) = &self.key {
            path.push_str(&key.to_segment());
        }
        if let Some(function) = &self.function {
            path.push('/');
            path.push_str(&function.to_segment());
        }
        path
    }

    /// Query options as unencoded pairs, in wire order
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(filter) = &self.filter {
            params.push(("$filter".to_string(), filter.clone()));
        }
        if !self.select.is_empty() {
            params.push(("$select".to_string(), self.select.join(",")));
        }
        if let Some(expand) = self.expand.to_option_value() {
            params.push(("$expand".to_string(), expand));
        }
        if !self.orderby.is_empty() {
            let clauses: Vec<String> = self.orderby.iter().map(OrderBy::to_odata_string).collect();
            params.push(("$orderby".to_string(), clauses.join(",")));
        }
        if let Some(skip) = self.skip {
            params.push(("$skip".to_string(), skip.to_string()));
        }
        if let Some(top) = self.top {
            params.push(("$top".to_string(), top.to_string()));
        }
        if self.count {
            params.push(("$count".to_string(), "true".to_string()));
        }
        if let Some(search) = &self.search {
            params.push(("$search".to_string(), search.clone()));
        }
        if let Some(apply) = &self.apply {
            params.push(("$apply".to_string(), apply.clone()));
        }
        params.extend(self.params.iter().cloned());

        params
    }

    /// Encoded query string without the leading `?`
    pub fn to_query_string(&self) -> String {
        self.to_query_params()
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Relative URL: path plus encoded options
    pub fn to_url(&self) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            self.path()
        } else {
            format!("{}?{}", self.path(), query)
        }
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
