//! Fluent query builder

use std::sync::Arc;

use crate::api::ODataEntity;
use crate::api::metadata::EdmProvider;
use crate::error::{ODataError, Result};

use super::ast::{Expr, split_path};
use super::compiler::{FilterContext, combine_filters};
use super::expand::ExpandBuilder;
use super::path::Captures;
use super::query::{FunctionCall, Key, OrderBy, Query, push_unique};

#[derive(Debug, Clone)]
enum PendingFilter {
    Tree(Expr),
    Text(String),
}

/// Builder for OData queries
///
/// ```ignore
/// let query = QueryBuilder::new("Customers")
///     .filter(field("Age").ge(18))
///     .filter_str("x => x.Name.startswith('A') || x.Name == 'Bob'")
///     .select(&["Name", "Age"])
///     .expand_with("Orders", |o| o.orderby(OrderBy::desc("Created")).top(5))
///     .orderby(OrderBy::asc("Name"))
///     .top(50)
///     .build()?;
/// ```
///
/// Filters and `select_path` paths are resolved when the query is built, so
/// `edm` and `captures` may be supplied in any order. Nested `expand_with`
/// builders run immediately and see only the type information attached
/// before them.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
    filters: Vec<PendingFilter>,
    select_paths: Vec<String>,
    context: FilterContext,
    error: Option<ODataError>,
}

impl QueryBuilder {
    /// Create a new query builder for the given entity set
    pub fn new(entity_set: impl Into<String>) -> Self {
        Self {
            query: Query::new(entity_set),
            filters: Vec::new(),
            select_paths: Vec::new(),
            context: FilterContext::new(),
            error: None,
        }
    }

    /// Query the entity set of `T`, classifying paths with its EDM model
    pub fn for_entity<T: ODataEntity>() -> Self {
        let root_type = T::entity_type().name;
        Self::new(T::ENTITY_SET).with_context(
            FilterContext::new().with_edm(Arc::new(T::edm_model()), Some(root_type)),
        )
    }

    fn with_context(mut self, context: FilterContext) -> Self {
        self.context = context;
        self
    }

    fn record_error(&mut self, error: ODataError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Attach type information used to classify property paths
    ///
    /// Must precede any `expand_with` whose nested options depend on it.
    pub fn edm(mut self, edm: Arc<dyn EdmProvider>) -> Self {
        let context = std::mem::take(&mut self.context);
        self.context = context
            .with_edm(edm, None)
            .for_entity_set(&self.query.entity_set);
        self
    }

    /// Outer values referenced by predicates
    pub fn captures(mut self, captures: Captures) -> Self {
        self.context = self.context.with_captures(captures);
        self
    }

    /// Add a filter; repeated calls are AND-combined
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(PendingFilter::Tree(expr));
        self
    }

    /// Add a filter written in the predicate string grammar
    pub fn filter_str(mut self, predicate: impl Into<String>) -> Self {
        self.filters.push(PendingFilter::Text(predicate.into()));
        self
    }

    /// Select fields; repeated calls form a union
    pub fn select(mut self, fields: &[&str]) -> Self {
        push_unique(
            &mut self.query.select,
            fields.iter().map(|f| f.replace('.', "/")),
        );
        self
    }

    /// Select a field path, expanding any navigation property it crosses
    pub fn select_path(mut self, path: &str) -> Self {
        self.select_paths.push(path.to_string());
        self
    }

    /// Expand navigation properties; `Orders/Lines` expands both levels
    pub fn expand(mut self, navigations: &[&str]) -> Self {
        for nav in navigations {
            self.query.expand.add_navigation(nav);
        }
        self
    }

    /// Expand a navigation with nested options
    pub fn expand_with(
        mut self,
        navigation: &str,
        build: impl FnOnce(ExpandBuilder) -> ExpandBuilder,
    ) -> Self {
        let nested = build(ExpandBuilder::new(self.context.for_navigation(navigation)));
        match nested.finish() {
            Ok(node) => self.query.expand.merge_node(navigation, node),
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Add an order clause; duplicates are ignored
    pub fn orderby(mut self, order: OrderBy) -> Self {
        push_unique(&mut self.query.orderby, [order]);
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.query.skip = Some(n);
        self
    }

    pub fn top(mut self, n: u32) -> Self {
        self.query.top = Some(n);
        self
    }

    /// Request `$count=true`; `false` omits the option
    pub fn count(mut self, enabled: bool) -> Self {
        self.query.count = enabled;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.query.search = Some(text.into());
        self
    }

    pub fn apply(mut self, transformation: impl Into<String>) -> Self {
        self.query.apply = Some(transformation.into());
        self
    }

    /// Address a single entity by key
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.query.key = Some(key.into());
        self
    }

    /// Call a bound function on the addressed resource
    pub fn function(mut self, function: FunctionCall) -> Self {
        self.query.function = Some(function);
        self
    }

    /// Pass a header through verbatim
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.headers.push((name.into(), value.into()));
        self
    }

    /// Custom query parameter, rendered after the system options
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.params.push((name.into(), value.into()));
        self
    }

    /// Ask the service for a delta link on the final page
    pub fn track_changes(self) -> Self {
        self.header("Prefer", "odata.track-changes")
    }

    /// Ask the service to page at `n` entities
    pub fn max_page_size(self, n: u32) -> Self {
        self.header("Prefer", format!("odata.maxpagesize={}", n))
    }

    /// Compile filters and produce the query descriptor
    pub fn build(&self) -> Result<Query> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let compiled = self
            .filters
            .iter()
            .map(|f| match f {
                PendingFilter::Tree(expr) => self.context.compile(expr),
                PendingFilter::Text(text) => self.context.compile_str(text),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut query = self.query.clone();
        for path in &self.select_paths {
            let segments = split_path(path);
            let classified = self.context.classify(&segments);
            if let Some(select) = query.expand.add_path(&segments, &classified.kinds) {
                push_unique(&mut query.select, [select]);
            }
        }
        query.filter = combine_filters(&compiled);
        Ok(query)
    }

    /// Relative URL of the built query
    pub fn build_url(&self) -> Result<String> {
        Ok(self.build()?.to_url())
    }
}
