//! OData query building
//!
//! Predicates are built as an [`Expr`] tree (fluently or by parsing a lambda
//! string), compiled to `$filter` syntax, and combined with the other query
//! options by [`QueryBuilder`] into a reusable [`Query`].

pub mod ast;
pub mod builder;
pub mod compiler;
pub mod expand;
pub mod parser;
pub mod path;
pub mod query;
pub mod result;
pub mod value;

pub use ast::{ArithOp, CompareOp, Expr, MemberPath, Param, Quantifier, captured, constant, field, lambda};
pub use builder::QueryBuilder;
pub use compiler::{CompiledFilter, FilterCompiler, FilterContext, compile_filter};
pub use expand::{ExpandBuilder, ExpandNode, ExpandTree};
pub use parser::{ParseError, parse_predicate};
pub use path::Captures;
pub use query::{FunctionCall, Key, OrderBy, Query, SortDirection};
pub use result::ResponseEnvelope;
pub use value::Value;
