//! Predicate tree → `$filter` compiler
//!
//! Parentheses are only emitted where precedence would otherwise change the
//! meaning: an `or` used as an `and` operand, boolean expressions used as
//! comparison or function operands, and arithmetic children that bind looser
//! than their parent. `not` always wraps its operand.

use std::sync::Arc;

use crate::api::metadata::EdmProvider;
use crate::error::{ODataError, Result};

use super::ast::{ArithOp, Expr, MemberPath, Quantifier, split_path};
use super::parser::parse_predicate;
use super::path::{Captures, Classified, PathResolver, Resolved, ResolvedPath, ScopeParam};
use super::value::{Value, format_membership};

/// Built-in functions and their accepted argument counts
const FUNCTIONS: &[(&str, usize, usize)] = &[
    ("contains", 2, 2),
    ("startswith", 2, 2),
    ("endswith", 2, 2),
    ("indexof", 2, 2),
    ("concat", 2, 2),
    ("substring", 2, 3),
    ("tolower", 1, 1),
    ("toupper", 1, 1),
    ("trim", 1, 1),
    ("length", 1, 1),
    ("year", 1, 1),
    ("month", 1, 1),
    ("day", 1, 1),
    ("hour", 1, 1),
    ("minute", 1, 1),
    ("second", 1, 1),
    ("date", 1, 1),
    ("time", 1, 1),
    ("round", 1, 1),
    ("floor", 1, 1),
    ("ceiling", 1, 1),
];

/// Compile with no captures and no type information
pub fn compile_filter(expr: &Expr) -> Result<String> {
    let captures = Captures::new();
    FilterCompiler::new(&captures).compile(expr)
}

/// Compiles predicate trees into `$filter` syntax
pub struct FilterCompiler<'a> {
    resolver: PathResolver<'a>,
    root_type: Option<String>,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(captures: &'a Captures) -> Self {
        Self {
            resolver: PathResolver::new(None, captures),
            root_type: None,
        }
    }

    /// Attach type information; `root_type` is the entity type filtered on
    pub fn with_edm(
        edm: &'a dyn EdmProvider,
        root_type: Option<String>,
        captures: &'a Captures,
    ) -> Self {
        Self {
            resolver: PathResolver::new(Some(edm), captures),
            root_type,
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<String> {
        let scopes = vec![ScopeParam::root(self.root_type.clone())];
        self.compile_node(expr, &scopes)
    }

    fn compile_node(&self, expr: &Expr, scopes: &[ScopeParam]) -> Result<String> {
        match expr {
            Expr::Or(left, right) => Ok(format!(
                "{} or {}",
                self.compile_node(left, scopes)?,
                self.compile_node(right, scopes)?
            )),
            Expr::And(left, right) => Ok(format!(
                "{} and {}",
                self.compile_and_operand(left, scopes)?,
                self.compile_and_operand(right, scopes)?
            )),
            Expr::Not(inner) => Ok(format!("not ({})", self.compile_node(inner, scopes)?)),
            Expr::Compare { left, op, right } => Ok(format!(
                "{} {} {}",
                self.compile_operand(left, scopes)?,
                op.as_odata(),
                self.compile_operand(right, scopes)?
            )),
            Expr::Arithmetic { left, op, right } => self.compile_arithmetic(left, *op, right, scopes),
            Expr::Call { function, args } => self.compile_call(function, args, scopes),
            Expr::In { operand, values } => self.compile_in(operand, values, scopes),
            Expr::Lambda {
                quantifier,
                collection,
                param,
                predicate,
            } => self.compile_lambda(*quantifier, collection, param, predicate.as_deref(), scopes),
            Expr::Member(member) => match self.resolver.resolve(member, scopes)? {
                Resolved::Path(p) => Ok(p.path),
                Resolved::Literal(v) => Ok(v.to_literal()),
                Resolved::List(_) => Err(ODataError::UnsupportedConstruct(format!(
                    "captured list '{}' outside of a membership test",
                    member
                ))),
            },
            Expr::Constant(v) => Ok(v.to_literal()),
            Expr::Conditional { .. } | Expr::Coalesce(_) => Err(ODataError::UnsupportedConstruct(
                expr.kind_name().to_string(),
            )),
        }
    }

    /// `or` binds looser than `and`, so it needs brackets as an operand
    fn compile_and_operand(&self, expr: &Expr, scopes: &[ScopeParam]) -> Result<String> {
        let compiled = self.compile_node(expr, scopes)?;
        if matches!(expr, Expr::Or(..)) {
            Ok(format!("({})", compiled))
        } else {
            Ok(compiled)
        }
    }

    /// Operand of a comparison or function argument
    fn compile_operand(&self, expr: &Expr, scopes: &[ScopeParam]) -> Result<String> {
        let compiled = self.compile_node(expr, scopes)?;
        if is_boolean_connective(expr) {
            Ok(format!("({})", compiled))
        } else {
            Ok(compiled)
        }
    }

    fn compile_arithmetic(
        &self,
        left: &Expr,
        op: ArithOp,
        right: &Expr,
        scopes: &[ScopeParam],
    ) -> Result<String> {
        let wrap = |child: &Expr, is_right: bool| -> Result<String> {
            let compiled = self.compile_node(child, scopes)?;
            let needs_parens = match child {
                Expr::Arithmetic { op: child_op, .. } => {
                    child_op.precedence() < op.precedence()
                        || (is_right && child_op.precedence() == op.precedence())
                }
                other => is_boolean_connective(other),
            };
            Ok(if needs_parens {
                format!("({})", compiled)
            } else {
                compiled
            })
        };
        Ok(format!(
            "{} {} {}",
            wrap(left, false)?,
            op.as_odata(),
            wrap(right, true)?
        ))
    }

    fn compile_call(&self, function: &str, args: &[Expr], scopes: &[ScopeParam]) -> Result<String> {
        let Some(&(_, min, max)) = FUNCTIONS.iter().find(|(name, _, _)| *name == function) else {
            return Err(ODataError::UnsupportedConstruct(format!(
                "function '{}'",
                function
            )));
        };
        if args.len() < min || args.len() > max {
            return Err(ODataError::UnsupportedConstruct(format!(
                "function '{}' called with {} argument(s)",
                function,
                args.len()
            )));
        }

        let compiled = args
            .iter()
            .map(|a| self.compile_operand(a, scopes))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("{}({})", function, compiled.join(",")))
    }

    fn compile_in(&self, operand: &Expr, values: &[Expr], scopes: &[ScopeParam]) -> Result<String> {
        let mut literals: Vec<Value> = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Expr::Constant(v) => literals.push(v.clone()),
                Expr::Member(member) => match self.resolver.resolve(member, scopes)? {
                    Resolved::Literal(v) => literals.push(v),
                    Resolved::List(vs) => literals.extend(vs),
                    Resolved::Path(p) => {
                        return Err(ODataError::UnsupportedConstruct(format!(
                            "membership set must be literal values, found property '{}'",
                            p.path
                        )));
                    }
                },
                other => {
                    return Err(ODataError::UnsupportedConstruct(format!(
                        "{} inside a membership set",
                        other.kind_name()
                    )));
                }
            }
        }

        if literals.is_empty() {
            return Ok(format_membership("", &literals));
        }
        let path = self.compile_operand(operand, scopes)?;
        Ok(format_membership(&path, &literals))
    }

    fn compile_lambda(
        &self,
        quantifier: Quantifier,
        collection: &MemberPath,
        param: &str,
        predicate: Option<&Expr>,
        scopes: &[ScopeParam],
    ) -> Result<String> {
        let resolved = match self.resolver.resolve(collection, scopes)? {
            Resolved::Path(p) => p,
            _ => {
                return Err(ODataError::UnsupportedConstruct(format!(
                    "'{}' over captured variable '{}'",
                    quantifier.as_odata(),
                    collection
                )));
            }
        };
        ensure_collection(&resolved, quantifier)?;

        let Some(predicate) = predicate else {
            if quantifier == Quantifier::All {
                return Err(ODataError::UnsupportedConstruct(
                    "'all' without a predicate".to_string(),
                ));
            }
            return Ok(format!("{}/any()", resolved.path));
        };

        let alias = fresh_alias(param, scopes);
        let mut inner_scopes = scopes.to_vec();
        inner_scopes.push(ScopeParam {
            name: param.to_string(),
            alias: alias.clone(),
            type_name: resolved.target_type.clone(),
        });

        let body = self.compile_node(predicate, &inner_scopes)?;
        Ok(format!(
            "{}/{}({}: {})",
            resolved.path,
            quantifier.as_odata(),
            alias,
            body
        ))
    }
}

/// A compiled `$filter` fragment
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub text: String,
    /// Root of the tree was an `or`; needs brackets when AND-combined
    pub or_rooted: bool,
}

/// AND-combine fragments from repeated `filter` calls
pub fn combine_filters(filters: &[CompiledFilter]) -> Option<String> {
    match filters {
        [] => None,
        [single] => Some(single.text.clone()),
        many => Some(
            many.iter()
                .map(|f| {
                    if f.or_rooted {
                        format!("({})", f.text)
                    } else {
                        f.text.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(" and "),
        ),
    }
}

/// Everything needed to compile a predicate for one entity type
#[derive(Clone, Default)]
pub struct FilterContext {
    edm: Option<Arc<dyn EdmProvider>>,
    root_type: Option<String>,
    captures: Captures,
}

impl std::fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterContext")
            .field("has_edm", &self.edm.is_some())
            .field("root_type", &self.root_type)
            .field("captures", &self.captures)
            .finish()
    }
}

impl FilterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_edm(mut self, edm: Arc<dyn EdmProvider>, root_type: Option<String>) -> Self {
        self.edm = Some(edm);
        self.root_type = root_type;
        self
    }

    pub fn with_captures(mut self, captures: Captures) -> Self {
        self.captures = captures;
        self
    }

    pub fn edm(&self) -> Option<&Arc<dyn EdmProvider>> {
        self.edm.as_ref()
    }

    pub fn root_type(&self) -> Option<&str> {
        self.root_type.as_deref()
    }

    /// Resolve the entity type behind `entity_set` and make it the root
    pub fn for_entity_set(mut self, entity_set: &str) -> Self {
        if self.root_type.is_none() {
            self.root_type = self
                .edm
                .as_ref()
                .and_then(|edm| edm.entity_type_for_set(entity_set));
        }
        self
    }

    /// Context for predicates nested under the navigation at `path`
    pub fn for_navigation(&self, path: &str) -> Self {
        let classified = self.classify(&split_path(path));
        Self {
            edm: self.edm.clone(),
            root_type: classified.target_type,
            captures: self.captures.clone(),
        }
    }

    /// Per-hop classification starting from the root type
    pub fn classify(&self, segments: &[String]) -> Classified {
        let resolver = PathResolver::new(self.edm.as_deref(), &self.captures);
        resolver.classify(self.root_type.as_deref(), segments)
    }

    pub fn compile(&self, expr: &Expr) -> Result<CompiledFilter> {
        let compiler = match &self.edm {
            Some(edm) => FilterCompiler::with_edm(edm.as_ref(), self.root_type.clone(), &self.captures),
            None => FilterCompiler::new(&self.captures),
        };
        let text = compiler.compile(expr)?;
        log::debug!("Compiled filter: {}", text);
        Ok(CompiledFilter {
            text,
            or_rooted: matches!(expr, Expr::Or(..)),
        })
    }

    /// Parse a predicate string and compile it
    pub fn compile_str(&self, predicate: &str) -> Result<CompiledFilter> {
        let expr = parse_predicate(predicate)?;
        self.compile(&expr)
    }
}

fn is_boolean_connective(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::And(..) | Expr::Or(..) | Expr::Compare { .. } | Expr::In { .. }
    )
}

/// Known non-collection properties cannot be quantified over
fn ensure_collection(path: &ResolvedPath, quantifier: Quantifier) -> Result<()> {
    match path.leaf_kind() {
        Some(kind) if !kind.is_collection() => Err(ODataError::UnsupportedConstruct(format!(
            "'{}' over non-collection property '{}'",
            quantifier.as_odata(),
            path.path
        ))),
        _ => Ok(()),
    }
}

/// Keep the caller's parameter name unless an enclosing scope already emits it
fn fresh_alias(param: &str, scopes: &[ScopeParam]) -> String {
    let taken = |name: &str| scopes.iter().any(|s| s.alias == name);
    if !param.is_empty() && !taken(param) && param != "$it" {
        return param.to_string();
    }
    let base = if param.is_empty() || param == "$it" {
        "x"
    } else {
        param
    };
    let mut n = scopes.len();
    loop {
        let candidate = format!("{}{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::{EdmModel, EdmType, EntityType};
    use crate::api::query::ast::{captured, field};
    use crate::api::query::parser::parse_predicate;

    fn compile_str(s: &str) -> String {
        compile_filter(&parse_predicate(s).unwrap()).unwrap()
    }

    #[test]
    fn test_or_inside_and_left() {
        assert_eq!(
            compile_str("(A == 1 || B == 2) && C == 3"),
            "(A eq 1 or B eq 2) and C eq 3"
        );
    }

    #[test]
    fn test_or_inside_and_right() {
        assert_eq!(
            compile_str("A == 1 && (B == 2 || C == 3)"),
            "A eq 1 and (B eq 2 or C eq 3)"
        );
    }

    #[test]
    fn test_or_nested_deep_in_and_chain() {
        assert_eq!(
            compile_str("A == 1 && B == 2 && (C == 3 || D == 4)"),
            "A eq 1 and B eq 2 and (C eq 3 or D eq 4)"
        );
    }

    #[test]
    fn test_and_inside_or_not_parenthesized() {
        assert_eq!(
            compile_str("A == 1 && B == 2 || C == 3"),
            "A eq 1 and B eq 2 or C eq 3"
        );
    }

    #[test]
    fn test_not_wraps() {
        let e = !(field("A").eq(1).or(field("B").eq(2)));
        assert_eq!(compile_filter(&e).unwrap(), "not (A eq 1 or B eq 2)");
        assert_eq!(compile_str("!Active"), "not (Active)");
    }

    #[test]
    fn test_all_comparison_operators() {
        assert_eq!(
            compile_str("A == 1 && B != 2 && C > 3 && D >= 4 && E < 5 && F <= 6"),
            "A eq 1 and B ne 2 and C gt 3 and D ge 4 and E lt 5 and F le 6"
        );
    }

    #[test]
    fn test_string_literal_quotes() {
        let e = field("Name").eq("it's 'quoted'");
        assert_eq!(compile_filter(&e).unwrap(), "Name eq 'it''s ''quoted'''");
    }

    #[test]
    fn test_nested_string_functions() {
        let e = field("Name").trim().to_lower().starts_with("ab");
        assert_eq!(compile_filter(&e).unwrap(), "startswith(tolower(trim(Name)),'ab')");
        assert_eq!(
            compile_str("x => x.Name.toupper().endswith('Z') == false"),
            "endswith(toupper(Name),'Z') eq false"
        );
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = compile_filter(&parse_predicate("soundex(Name) == 'x'").unwrap()).unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedConstruct(ref m) if m.contains("soundex")));

        let err = compile_filter(&parse_predicate("Name.contains()").unwrap()).unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedConstruct(ref m) if m.contains("argument")));
    }

    #[test]
    fn test_membership() {
        assert_eq!(compile_str("Id in [1, 2, 3]"), "Id in (1,2,3)");
        assert_eq!(compile_str("Id in []"), "(false)");
        assert_eq!(
            compile_str("Name in ('a', 'b') && Active"),
            "Name in ('a','b') and Active"
        );
    }

    #[test]
    fn test_membership_from_captured_list() {
        let captures = Captures::new().with_list("ids", [5, 6]);
        let e = parse_predicate("x => x.Id in ids").unwrap();
        assert_eq!(
            FilterCompiler::new(&captures).compile(&e).unwrap(),
            "Id in (5,6)"
        );

        let empty = Captures::new().with_list("ids", Vec::<i32>::new());
        assert_eq!(FilterCompiler::new(&empty).compile(&e).unwrap(), "(false)");
    }

    #[test]
    fn test_captured_values_inlined() {
        let captures = Captures::new()
            .with("minAge", 21)
            .with_json("filter", serde_json::json!({"name": "O'Neil"}));
        let e = parse_predicate("x => x.Age >= minAge && x.Name == filter.name").unwrap();
        assert_eq!(
            FilterCompiler::new(&captures).compile(&e).unwrap(),
            "Age ge 21 and Name eq 'O''Neil'"
        );

        let e = field("Age").gt(captured("minAge"));
        assert_eq!(
            FilterCompiler::new(&captures).compile(&e).unwrap(),
            "Age gt 21"
        );
    }

    #[test]
    fn test_unknown_capture_rejected() {
        let e = parse_predicate("x => x.Age > missing").unwrap();
        assert!(matches!(
            compile_filter(&e),
            Err(ODataError::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn test_any_and_all() {
        assert_eq!(
            compile_str("x => x.Orders.any(o => o.Total > 100)"),
            "Orders/any(o: o/Total gt 100)"
        );
        assert_eq!(
            compile_str("x => x.Orders.all(o => o.Status == 'Shipped')"),
            "Orders/all(o: o/Status eq 'Shipped')"
        );
        assert_eq!(compile_str("Tags.any()"), "Tags/any()");
    }

    #[test]
    fn test_nested_quantifiers_thread_params() {
        assert_eq!(
            compile_str("c => c.Orders.any(o => o.Lines.all(l => l.Qty > 0 && o.Total > l.Qty))"),
            "Orders/any(o: o/Lines/all(l: l/Qty gt 0 and o/Total gt l/Qty))"
        );
    }

    #[test]
    fn test_outer_reference_inside_lambda_uses_it() {
        assert_eq!(
            compile_str("c => c.Orders.any(o => o.Region == c.Region)"),
            "Orders/any(o: o/Region eq $it/Region)"
        );
    }

    #[test]
    fn test_shadowed_param_gets_fresh_alias() {
        let e = field("Orders").any("o", |o| {
            o.field("Lines").any("o", |inner| inner.field("Qty").gt(1))
        });
        assert_eq!(
            compile_filter(&e).unwrap(),
            "Orders/any(o: o/Lines/any(o2: o2/Qty gt 1))"
        );
    }

    #[test]
    fn test_quantifier_on_scalar_rejected_with_edm() {
        let edm = EdmModel::new().with_type(
            EntityType::new("Customer")
                .scalar("Name", EdmType::String)
                .collection("Orders", "Order"),
        );
        let captures = Captures::new();
        let compiler = FilterCompiler::with_edm(&edm, Some("Customer".into()), &captures);

        let ok = field("Orders").any("o", |o| o.field("Total").gt(1));
        assert_eq!(compiler.compile(&ok).unwrap(), "Orders/any(o: o/Total gt 1)");

        let bad = field("Name").any("n", |n| n.it().eq("x"));
        let err = compiler.compile(&bad).unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedConstruct(ref m) if m.contains("non-collection")));
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(compile_str("Price * 2 > 10"), "Price mul 2 gt 10");
        assert_eq!(compile_str("(Price + Tax) * 2 > 10"), "(Price add Tax) mul 2 gt 10");
        assert_eq!(compile_str("Price - (Tax - 1) > 0"), "Price sub (Tax sub 1) gt 0");
        assert_eq!(compile_str("Price + Tax * 2 > 0"), "Price add Tax mul 2 gt 0");
    }

    #[test]
    fn test_boolean_comparison_operand_parenthesized() {
        assert_eq!(compile_str("(A == 1) == true"), "(A eq 1) eq true");
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(compile_str("Manager == null"), "Manager eq null");
        assert_eq!(
            compile_filter(&field("Email").is_not_null()).unwrap(),
            "Email ne null"
        );
    }

    #[test]
    fn test_combine_filters_brackets_or_fragments() {
        let ctx = FilterContext::new();
        let a = ctx.compile(&field("A").eq(1).or(field("B").eq(2))).unwrap();
        let c = ctx.compile_str("C == 3").unwrap();
        assert!(a.or_rooted);
        assert_eq!(combine_filters(std::slice::from_ref(&a)).unwrap(), "A eq 1 or B eq 2");
        assert_eq!(
            combine_filters(&[a, c]).unwrap(),
            "(A eq 1 or B eq 2) and C eq 3"
        );
        assert_eq!(combine_filters(&[]), None);
    }

    #[test]
    fn test_context_resolves_navigation_target() {
        let edm = EdmModel::new()
            .with_type(
                EntityType::new("Customer")
                    .entity_set("Customers")
                    .collection("Orders", "Order"),
            )
            .with_type(EntityType::new("Order").collection("Lines", "Line"));
        let ctx = FilterContext::new()
            .with_edm(Arc::new(edm), None)
            .for_entity_set("Customers");
        assert_eq!(ctx.root_type(), Some("Customer"));

        let nested = ctx.for_navigation("Orders");
        assert_eq!(nested.root_type(), Some("Order"));
        let compiled = nested
            .compile(&field("Lines").any("l", |l| l.field("Qty").gt(0)))
            .unwrap();
        assert_eq!(compiled.text, "Lines/any(l: l/Qty gt 0)");
    }

    #[test]
    fn test_conditional_rejected() {
        let err = compile_filter(&parse_predicate("A ? B : C").unwrap()).unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedConstruct(ref m) if m.contains("?:")));
        let err = compile_filter(&parse_predicate("A ?? B").unwrap()).unwrap_err();
        assert!(matches!(err, ODataError::UnsupportedConstruct(ref m) if m.contains("??")));
    }
}
