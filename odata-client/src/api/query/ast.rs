//! Predicate AST and fluent node builder
//!
//! The tree is produced either by [`parse_predicate`](super::parse_predicate)
//! from a lambda string or directly through the builder helpers below:
//!
//! ```ignore
//! use odata_client::api::query::{field, lambda};
//!
//! let filter = field("Age").ge(18)
//!     .and(field("Name").starts_with("A").or(field("Name").eq("Bob")))
//!     .and(field("Orders").any("o", |o| o.field("Total").gt(100)));
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use super::value::Value;

/// Parameter name the fluent builder binds top-level members to
pub const IMPLICIT_PARAM: &str = "$it";

/// A member access chain: `root.seg1.seg2`
///
/// `root` is either a lambda parameter (resolved to a property path) or a
/// captured variable (evaluated to a literal at compile time).
#[derive(Debug, Clone, PartialEq)]
pub struct MemberPath {
    pub root: String,
    pub segments: Vec<String>,
}

impl MemberPath {
    pub fn new(root: impl Into<String>, segments: Vec<String>) -> Self {
        Self {
            root: root.into(),
            segments,
        }
    }

    /// Path rooted at the implicit parameter; accepts `.` or `/` separators
    pub fn implicit(path: &str) -> Self {
        Self {
            root: IMPLICIT_PARAM.to_string(),
            segments: split_path(path),
        }
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self {
            root: self.root.clone(),
            segments,
        }
    }
}

impl std::fmt::Display for MemberPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)?;
        for seg in &self.segments {
            write!(f, ".{}", seg)?;
        }
        Ok(())
    }
}

pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn as_odata(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
        }
    }
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn as_odata(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
        }
    }

    /// Binding strength; higher binds tighter
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            ArithOp::Add | ArithOp::Sub => 1,
            ArithOp::Mul | ArithOp::Div | ArithOp::Mod => 2,
        }
    }
}

/// Lambda operators over collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
}

impl Quantifier {
    pub fn as_odata(&self) -> &'static str {
        match self {
            Quantifier::Any => "any",
            Quantifier::All => "all",
        }
    }
}

/// Predicate tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Property path or captured variable access
    Member(MemberPath),
    /// Literal value
    Constant(Value),
    /// `left op right`
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    /// `left op right` for add/sub/mul/div/mod
    Arithmetic {
        left: Box<Expr>,
        op: ArithOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Built-in function call, e.g. `contains(Name,'x')`
    Call { function: String, args: Vec<Expr> },
    /// Set membership; an empty list never matches
    In { operand: Box<Expr>, values: Vec<Expr> },
    /// `collection/any(param: predicate)` or `collection/all(...)`
    Lambda {
        quantifier: Quantifier,
        collection: MemberPath,
        param: String,
        predicate: Option<Box<Expr>>,
    },
    /// `cond ? a : b`; parseable but has no `$filter` equivalent
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// `a ?? b`; parseable but has no `$filter` equivalent
    Coalesce(Vec<Expr>),
}

/// Reference a property of the implicit parameter
pub fn field(path: &str) -> Expr {
    Expr::Member(MemberPath::implicit(path))
}

/// Wrap a literal
pub fn constant(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

/// Reference a captured variable by name
pub fn captured(name: &str) -> Expr {
    let mut segments = split_path(name);
    if segments.is_empty() {
        return Expr::Member(MemberPath::new(name, Vec::new()));
    }
    let root = segments.remove(0);
    Expr::Member(MemberPath::new(root, segments))
}

/// Bound lambda parameter handed to `any`/`all` builder closures
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
}

impl Param {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Property of the element bound to this parameter
    pub fn field(&self, path: &str) -> Expr {
        Expr::Member(MemberPath::new(self.name.clone(), split_path(path)))
    }

    /// The element itself, for collections of primitives
    pub fn it(&self) -> Expr {
        Expr::Member(MemberPath::new(self.name.clone(), Vec::new()))
    }
}

/// Create a lambda parameter outside of `any`/`all`
pub fn lambda(name: &str) -> Param {
    Param {
        name: name.to_string(),
    }
}

impl Expr {
    fn compare(self, op: CompareOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Compare {
            left: Box::new(self),
            op,
            right: Box::new(rhs.into()),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Eq, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn ne(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Ne, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Gt, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Ge, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Lt, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn is_null(self) -> Expr {
        self.compare(CompareOp::Eq, Value::Null)
    }

    pub fn is_not_null(self) -> Expr {
        self.compare(CompareOp::Ne, Value::Null)
    }

    fn arithmetic(self, op: ArithOp, rhs: impl Into<Expr>) -> Expr {
        Expr::Arithmetic {
            left: Box::new(self),
            op,
            right: Box::new(rhs.into()),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithOp::Add, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithOp::Sub, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, rhs: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithOp::Mul, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(self, rhs: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithOp::Div, rhs)
    }

    /// Combine two expressions with AND: `expr1 and expr2`
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// Combine two expressions with OR: `expr1 or expr2`
    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Negate an expression: `not (expr)`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        !self
    }

    fn call(function: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            function: function.to_string(),
            args,
        }
    }

    pub fn contains(self, needle: impl Into<Expr>) -> Expr {
        Self::call("contains", vec![self, needle.into()])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        Self::call("startswith", vec![self, prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        Self::call("endswith", vec![self, suffix.into()])
    }

    pub fn to_lower(self) -> Expr {
        Self::call("tolower", vec![self])
    }

    pub fn to_upper(self) -> Expr {
        Self::call("toupper", vec![self])
    }

    pub fn trim(self) -> Expr {
        Self::call("trim", vec![self])
    }

    pub fn length(self) -> Expr {
        Self::call("length", vec![self])
    }

    pub fn year(self) -> Expr {
        Self::call("year", vec![self])
    }

    /// Membership in a literal set
    pub fn in_list<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In {
            operand: Box::new(self),
            values: values
                .into_iter()
                .map(|v| Expr::Constant(v.into()))
                .collect(),
        }
    }

    /// `collection/any(p: ...)`; `self` must be a member path
    pub fn any(self, param: &str, build: impl FnOnce(Param) -> Expr) -> Expr {
        self.quantify(Quantifier::Any, param, Some(build))
    }

    /// `collection/any()`: true when the collection is non-empty
    pub fn any_element(self) -> Expr {
        self.quantify(Quantifier::Any, "x", None::<fn(Param) -> Expr>)
    }

    /// `collection/all(p: ...)`; `self` must be a member path
    pub fn all(self, param: &str, build: impl FnOnce(Param) -> Expr) -> Expr {
        self.quantify(Quantifier::All, param, Some(build))
    }

    fn quantify(
        self,
        quantifier: Quantifier,
        param: &str,
        build: Option<impl FnOnce(Param) -> Expr>,
    ) -> Expr {
        let collection = match self {
            Expr::Member(path) => path,
            // Left as-is so the compiler rejects it with a descriptive error
            other => {
                return Expr::Call {
                    function: quantifier.as_odata().to_string(),
                    args: vec![other],
                };
            }
        };
        let predicate = build.map(|b| {
            Box::new(b(Param {
                name: param.to_string(),
            }))
        });
        Expr::Lambda {
            quantifier,
            collection,
            param: param.to_string(),
            predicate,
        }
    }

    /// Short description used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Member(_) => "member access",
            Expr::Constant(_) => "constant",
            Expr::Compare { .. } => "comparison",
            Expr::Arithmetic { .. } => "arithmetic",
            Expr::And(..) => "and",
            Expr::Or(..) => "or",
            Expr::Not(_) => "not",
            Expr::Call { .. } => "function call",
            Expr::In { .. } => "membership",
            Expr::Lambda { .. } => "lambda",
            Expr::Conditional { .. } => "conditional expression (?:)",
            Expr::Coalesce(_) => "null coalescing (??)",
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        Expr::Not(Box::new(self))
    }
}

impl std::ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Constant(v)
    }
}

macro_rules! impl_expr_from_literal {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Expr {
                fn from(v: $t) -> Self {
                    Expr::Constant(Value::from(v))
                }
            }
        )*
    };
}

impl_expr_from_literal!(
    &str,
    String,
    &String,
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    Uuid,
    DateTime<Utc>,
    NaiveDateTime,
    NaiveDate
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_splits_paths() {
        let Expr::Member(path) = field("Customer/Address.City") else {
            panic!("expected member");
        };
        assert_eq!(path.root, IMPLICIT_PARAM);
        assert_eq!(path.segments, vec!["Customer", "Address", "City"]);
    }

    #[test]
    fn test_builder_shapes() {
        let e = field("Age").gt(18).and(field("Name").eq("Bob"));
        assert!(matches!(e, Expr::And(..)));

        let e = !field("Active").eq(true);
        assert!(matches!(e, Expr::Not(_)));

        let e = field("Age").gt(1) | field("Age").lt(0);
        assert!(matches!(e, Expr::Or(..)));
    }

    #[test]
    fn test_any_binds_param() {
        let e = field("Orders").any("o", |o| o.field("Total").gt(100));
        match e {
            Expr::Lambda {
                quantifier,
                collection,
                param,
                predicate,
            } => {
                assert_eq!(quantifier, Quantifier::Any);
                assert_eq!(collection.segments, vec!["Orders"]);
                assert_eq!(param, "o");
                let Some(pred) = predicate else {
                    panic!("expected predicate")
                };
                let Expr::Compare { left, .. } = *pred else {
                    panic!("expected comparison")
                };
                assert_eq!(*left, Expr::Member(MemberPath::new("o", vec!["Total".into()])));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_captured_root() {
        let Expr::Member(path) = captured("limits.max") else {
            panic!("expected member");
        };
        assert_eq!(path.root, "limits");
        assert_eq!(path.segments, vec!["max"]);
    }

    #[test]
    fn test_member_display() {
        let p = MemberPath::new("x", vec!["Customer".into(), "Name".into()]);
        assert_eq!(p.to_string(), "x.Customer.Name");
    }
}
