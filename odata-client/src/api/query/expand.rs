//! Nested `$expand` / `$select` composition
//!
//! Field paths through navigation properties fold into a tree keyed by
//! navigation name. For example `Customer.Name`, `Customer.City` and
//! `Customer.Orders` become:
//! `$expand=Customer($select=Name,City;$expand=Orders)`

use indexmap::{IndexMap, IndexSet};

use crate::api::metadata::PropertyKind;
use crate::error::{ODataError, Result};

use super::ast::{Expr, split_path};
use super::compiler::{CompiledFilter, FilterContext, combine_filters};
use super::query::{OrderBy, push_unique};

/// Expand nodes keyed by navigation name, in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandTree {
    nodes: IndexMap<String, ExpandNode>,
}

/// Options applied to one expanded navigation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandNode {
    pub select: IndexSet<String>,
    pub expand: ExpandTree,
    pub filter: Vec<CompiledFilter>,
    pub orderby: Vec<OrderBy>,
    pub top: Option<u32>,
    pub skip: Option<u32>,
    pub count: bool,
    pub search: Option<String>,
}

impl ExpandTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, name: &str) -> Option<&ExpandNode> {
        self.nodes.get(name)
    }

    /// Get the node for `name`, creating it on first access
    pub fn node_mut(&mut self, name: &str) -> &mut ExpandNode {
        self.nodes.entry(name.to_string()).or_default()
    }

    /// Fold a classified field path into the tree
    ///
    /// Hops up to the first navigation address the current level; the
    /// remainder is added below that navigation's node. Returns the path to
    /// select at the current level when the path never crosses a navigation.
    /// Unclassified hops are treated as scalars.
    pub fn add_path(
        &mut self,
        segments: &[String],
        kinds: &[Option<PropertyKind>],
    ) -> Option<String> {
        let nav_index = kinds
            .iter()
            .take(segments.len())
            .position(|k| k.as_ref().is_some_and(PropertyKind::is_navigation));

        let Some(nav_index) = nav_index else {
            return (!segments.is_empty()).then(|| segments.join("/"));
        };

        let name = segments[..=nav_index].join("/");
        let rest = &segments[nav_index + 1..];
        let rest_kinds = kinds.get(nav_index + 1..).unwrap_or(&[]);

        let node = self.node_mut(&name);
        if let Some(select) = node.expand.add_path(rest, rest_kinds) {
            node.select.insert(select);
        }
        None
    }

    /// Expand every hop of a navigation path: `Orders/Lines` nests `Lines` under `Orders`
    pub fn add_navigation(&mut self, path: &str) {
        let segments = split_path(path);
        let mut tree = self;
        for segment in &segments {
            tree = &mut tree.node_mut(segment).expand;
        }
    }

    /// Merge `node` into the node named `name`
    pub fn merge_node(&mut self, name: &str, node: ExpandNode) {
        self.node_mut(name).merge(node);
    }

    /// Merge another tree into this one
    pub fn merge(&mut self, other: ExpandTree) {
        for (name, node) in other.nodes {
            self.merge_node(&name, node);
        }
    }

    /// One clause per root navigation, e.g. `Orders($top=5)`
    pub fn build_expand_clauses(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|(name, node)| node.render(name))
            .collect()
    }

    /// Value for the `$expand` option, `None` when nothing is expanded
    pub fn to_option_value(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.build_expand_clauses().join(","))
        }
    }
}

impl ExpandNode {
    pub fn has_options(&self) -> bool {
        !self.select.is_empty()
            || !self.expand.is_empty()
            || !self.filter.is_empty()
            || !self.orderby.is_empty()
            || self.top.is_some()
            || self.skip.is_some()
            || self.count
            || self.search.is_some()
    }

    /// Combine repeated accesses losslessly; scalar options from `other` win
    pub fn merge(&mut self, other: ExpandNode) {
        self.select.extend(other.select);
        self.expand.merge(other.expand);
        self.filter.extend(other.filter);
        push_unique(&mut self.orderby, other.orderby);
        if other.top.is_some() {
            self.top = other.top;
        }
        if other.skip.is_some() {
            self.skip = other.skip;
        }
        self.count |= other.count;
        if other.search.is_some() {
            self.search = other.search;
        }
    }

    /// Nested options, `;`-separated
    fn options(&self) -> Vec<String> {
        let mut parts = Vec::new();

        if let Some(filter) = combine_filters(&self.filter) {
            parts.push(format!("$filter={}", filter));
        }
        if !self.select.is_empty() {
            let fields: Vec<&str> = self.select.iter().map(String::as_str).collect();
            parts.push(format!("$select={}", fields.join(",")));
        }
        if let Some(expand) = self.expand.to_option_value() {
            parts.push(format!("$expand={}", expand));
        }
        if !self.orderby.is_empty() {
            let clauses: Vec<String> = self.orderby.iter().map(OrderBy::to_odata_string).collect();
            parts.push(format!("$orderby={}", clauses.join(",")));
        }
        if let Some(skip) = self.skip {
            parts.push(format!("$skip={}", skip));
        }
        if let Some(top) = self.top {
            parts.push(format!("$top={}", top));
        }
        if self.count {
            parts.push("$count=true".to_string());
        }
        if let Some(search) = &self.search {
            parts.push(format!("$search={}", search));
        }

        parts
    }

    fn render(&self, name: &str) -> String {
        if !self.has_options() {
            return name.to_string();
        }
        format!("{}({})", name, self.options().join(";"))
    }
}

/// Fluent builder for the options of one expanded navigation
///
/// ```ignore
/// QueryBuilder::new("Customers")
///     .expand_with("Orders", |o| o.filter(field("Total").gt(100)).top(5));
/// ```
#[derive(Debug, Clone)]
pub struct ExpandBuilder {
    node: ExpandNode,
    context: FilterContext,
    error: Option<ODataError>,
}

impl ExpandBuilder {
    /// `context` is rooted at the navigation's target type
    pub fn new(context: FilterContext) -> Self {
        Self {
            node: ExpandNode::default(),
            context,
            error: None,
        }
    }

    fn record(&mut self, result: Result<CompiledFilter>) {
        match result {
            Ok(filter) => self.node.filter.push(filter),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.node.select.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Select a field path, expanding any navigation it crosses
    pub fn select_path(mut self, path: &str) -> Self {
        let segments = split_path(path);
        let classified = self.context.classify(&segments);
        if let Some(select) = self.node.expand.add_path(&segments, &classified.kinds) {
            self.node.select.insert(select);
        }
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        let compiled = self.context.compile(&expr);
        self.record(compiled);
        self
    }

    /// Filter written in the predicate string grammar
    pub fn filter_str(mut self, predicate: &str) -> Self {
        let compiled = self.context.compile_str(predicate);
        self.record(compiled);
        self
    }

    pub fn orderby(mut self, order: OrderBy) -> Self {
        push_unique(&mut self.node.orderby, [order]);
        self
    }

    pub fn top(mut self, n: u32) -> Self {
        self.node.top = Some(n);
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.node.skip = Some(n);
        self
    }

    pub fn count(mut self, enabled: bool) -> Self {
        self.node.count = enabled;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.node.search = Some(text.into());
        self
    }

    pub fn expand(mut self, navigations: &[&str]) -> Self {
        for nav in navigations {
            self.node.expand.add_navigation(nav);
        }
        self
    }

    pub fn expand_with(mut self, navigation: &str, build: impl FnOnce(ExpandBuilder) -> ExpandBuilder) -> Self {
        let nested = build(ExpandBuilder::new(self.context.for_navigation(navigation)));
        match nested.finish() {
            Ok(node) => self.node.expand.merge_node(navigation, node),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self
    }

    /// The built node, or the first error recorded while building
    pub fn finish(self) -> Result<ExpandNode> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.node),
        }
    }
}
