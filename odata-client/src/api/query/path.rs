//! Member-access resolution for predicates and projections
//!
//! A member chain rooted at a lambda parameter becomes a `/`-joined property
//! path; a chain rooted at a captured variable is evaluated right away and
//! becomes a literal. Each property hop is classified through the EDM so the
//! expand composer can tell scalars from navigations.

use std::collections::HashMap;

use crate::api::metadata::{EdmProvider, PropertyKind};
use crate::error::{ODataError, Result};

use super::ast::{IMPLICIT_PARAM, MemberPath};
use super::value::Value;

/// Outer state referenced from a predicate
#[derive(Debug, Clone, Default)]
pub struct Captures {
    vars: HashMap<String, Captured>,
}

#[derive(Debug, Clone)]
enum Captured {
    Value(Value),
    List(Vec<Value>),
    Json(serde_json::Value),
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a scalar
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), Captured::Value(value.into()));
        self
    }

    /// Capture a list for `in` membership tests
    pub fn with_list<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.vars.insert(name.into(), Captured::List(values));
        self
    }

    /// Capture a JSON document whose members can be navigated (`@cfg.limits.max`)
    pub fn with_json(mut self, name: impl Into<String>, json: serde_json::Value) -> Self {
        self.vars.insert(name.into(), Captured::Json(json));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// A lambda parameter in scope
#[derive(Debug, Clone)]
pub struct ScopeParam {
    /// Name used in the source tree
    pub name: String,
    /// Name emitted in the compiled output
    pub alias: String,
    /// Entity/complex type the parameter ranges over, if known
    pub type_name: Option<String>,
}

impl ScopeParam {
    /// The top-level parameter (`$it`)
    pub fn root(type_name: Option<String>) -> Self {
        Self {
            name: IMPLICIT_PARAM.to_string(),
            alias: IMPLICIT_PARAM.to_string(),
            type_name,
        }
    }
}

/// Outcome of resolving a member chain
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Property path relative to the current scope
    Path(ResolvedPath),
    /// Captured scalar, already evaluated
    Literal(Value),
    /// Captured list, for membership tests
    List(Vec<Value>),
}

/// A property path with per-hop classification
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Rendered path, e.g. `o/Customer/Name`
    pub path: String,
    /// Property names without any parameter prefix
    pub segments: Vec<String>,
    /// Classification of each segment; `None` when the EDM has no answer
    pub kinds: Vec<Option<PropertyKind>>,
    /// Type reached after the last hop (for entering lambdas)
    pub target_type: Option<String>,
}

impl ResolvedPath {
    /// Classification of the final hop
    pub fn leaf_kind(&self) -> Option<&PropertyKind> {
        self.kinds.last().and_then(|k| k.as_ref())
    }
}

/// Per-hop classification of a property chain
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kinds: Vec<Option<PropertyKind>>,
    pub target_type: Option<String>,
}

/// Resolves member chains against the lambda scope, captures and EDM
#[derive(Clone, Copy)]
pub struct PathResolver<'a> {
    edm: Option<&'a dyn EdmProvider>,
    captures: &'a Captures,
}

impl<'a> PathResolver<'a> {
    pub fn new(edm: Option<&'a dyn EdmProvider>, captures: &'a Captures) -> Self {
        Self { edm, captures }
    }

    /// Classify each hop of `segments` starting from `root_type`
    ///
    /// Classification is purely structural: once a hop's type is unknown,
    /// every later hop is unknown too.
    pub fn classify(&self, root_type: Option<&str>, segments: &[String]) -> Classified {
        let mut kinds = Vec::with_capacity(segments.len());
        let mut current = root_type.map(|s| s.to_string());

        for seg in segments {
            let kind = match (&self.edm, &current) {
                (Some(edm), Some(ty)) => edm.property(ty, seg),
                _ => None,
            };
            current = kind
                .as_ref()
                .and_then(|k| k.target_type())
                .map(|s| s.to_string());
            kinds.push(kind);
        }

        Classified {
            kinds,
            target_type: current,
        }
    }

    /// Resolve `member` with `scopes` (outermost first)
    pub fn resolve(&self, member: &MemberPath, scopes: &[ScopeParam]) -> Result<Resolved> {
        if let Some(index) = scopes.iter().rposition(|p| p.name == member.root) {
            let param = &scopes[index];
            let classified = self.classify(param.type_name.as_deref(), &member.segments);

            // Inside a lambda, the outer entity must be addressed as `$it/...`
            let prefix = if index == 0 && scopes.len() == 1 {
                None
            } else {
                Some(param.alias.as_str())
            };

            let mut parts: Vec<&str> = Vec::with_capacity(member.segments.len() + 1);
            parts.extend(prefix);
            parts.extend(member.segments.iter().map(|s| s.as_str()));

            if parts.is_empty() {
                // The top-level parameter itself, e.g. `$it` in a primitive collection
                parts.push(param.alias.as_str());
            }

            return Ok(Resolved::Path(ResolvedPath {
                path: parts.join("/"),
                segments: member.segments.clone(),
                kinds: classified.kinds,
                target_type: classified.target_type,
            }));
        }

        match self.captures.vars.get(&member.root) {
            Some(captured) => self.evaluate_captured(member, captured),
            None => Err(ODataError::UnsupportedConstruct(format!(
                "unknown identifier '{}' (not a lambda parameter or captured variable)",
                member.root
            ))),
        }
    }

    /// Walk a captured value and turn it into a literal
    fn evaluate_captured(&self, member: &MemberPath, captured: &Captured) -> Result<Resolved> {
        match captured {
            Captured::Value(v) if member.segments.is_empty() => Ok(Resolved::Literal(v.clone())),
            Captured::List(values) if member.segments.is_empty() => {
                Ok(Resolved::List(values.clone()))
            }
            Captured::Value(_) | Captured::List(_) => Err(ODataError::UnsupportedConstruct(
                format!("member access on captured scalar '{}'", member),
            )),
            Captured::Json(json) => {
                let mut current = json;
                for seg in &member.segments {
                    current = match current {
                        serde_json::Value::Object(map) => map.get(seg),
                        serde_json::Value::Array(items) => {
                            seg.parse::<usize>().ok().and_then(|i| items.get(i))
                        }
                        _ => None,
                    }
                    .ok_or_else(|| {
                        ODataError::UnsupportedConstruct(format!(
                            "captured variable '{}' has no member '{}'",
                            member, seg
                        ))
                    })?;
                }

                if let serde_json::Value::Array(items) = current {
                    let values = items
                        .iter()
                        .map(|item| {
                            Value::from_json(item).ok_or_else(|| {
                                ODataError::UnsupportedConstruct(format!(
                                    "captured list '{}' contains a structured value",
                                    member
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(Resolved::List(values));
                }

                Value::from_json(current)
                    .map(Resolved::Literal)
                    .ok_or_else(|| {
                        ODataError::UnsupportedConstruct(format!(
                            "captured object '{}' cannot be used as a literal",
                            member
                        ))
                    })
            }
        }
    }
}
