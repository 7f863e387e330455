//! Recursive descent parser for lambda-style predicate strings
//!
//! Two forms are accepted:
//!
//! - lambda form: `x => x.Age >= 18 && x.Name.startswith('A')`; identifiers
//!   other than bound parameters are captured variables
//! - bare form: `Age >= 18 && Name.startswith('A')`; bare identifiers are
//!   properties and captured variables are written `@name`
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! predicate  = [ident "=>"] ternary
//! ternary    = coalesce ["?" ternary ":" ternary]
//! coalesce   = or ("??" or)*
//! or         = and (("||" | "or") and)*
//! and        = unary (("&&" | "and") unary)*
//! unary      = ("!" | "not") unary | comparison
//! comparison = additive [cmp additive | "in" list]
//! additive   = term (("+" | "-") term)*
//! term       = factor (("*" | "/" | "%") factor)*
//! factor     = "-" factor | postfix
//! postfix    = primary ("." ident ["(" args ")"])*
//! primary    = "(" ternary ")" | literal | "@" ident | ident ["(" args ")"] | list
//! ```

use super::ast::*;
use super::value::Value;

/// Parse error with position information
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
    pub context: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a predicate string into an expression tree
pub fn parse_predicate(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input)?;
    parser.parse()
}

/// Token types for the predicate lexer
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Ident(String),
    Alias(String), // @name
    Int(i64),
    Float(f64),
    String(String),
    Typed(String, String), // guid'...', datetime'...', date'...', decimal'...'
    Bool(bool),
    Null,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    DoubleQuestion,
    Arrow,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // End of input
    Eof,
}

/// Lexer for predicate tokens
struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn current_pos(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn error(&self, message: impl Into<String>, pos: usize) -> ParseError {
        ParseError {
            message: message.into(),
            position: pos,
            context: self.input[pos.min(self.input.len())..].chars().take(20).collect(),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    /// Consume `second` if it is the next char
    fn eat(&mut self, second: char) -> bool {
        if let Some(&(_, c)) = self.chars.peek() {
            if c == second {
                self.chars.next();
                return true;
            }
        }
        false
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        // Single-char tokens
        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(tok) = single {
            self.chars.next();
            return Ok(tok);
        }

        // One- or two-char tokens
        match ch {
            '?' => {
                self.chars.next();
                return Ok(if self.eat('?') {
                    Token::DoubleQuestion
                } else {
                    Token::Question
                });
            }
            '=' => {
                self.chars.next();
                if self.eat('=') {
                    return Ok(Token::Eq);
                }
                if self.eat('>') {
                    return Ok(Token::Arrow);
                }
                return Err(self.error("expected '==' or '=>'", pos));
            }
            '!' => {
                self.chars.next();
                return Ok(if self.eat('=') { Token::Ne } else { Token::Bang });
            }
            '<' => {
                self.chars.next();
                return Ok(if self.eat('=') { Token::Le } else { Token::Lt });
            }
            '>' => {
                self.chars.next();
                return Ok(if self.eat('=') { Token::Ge } else { Token::Gt });
            }
            '&' => {
                self.chars.next();
                if self.eat('&') {
                    return Ok(Token::AndAnd);
                }
                return Err(self.error("expected '&&'", pos));
            }
            '|' => {
                self.chars.next();
                if self.eat('|') {
                    return Ok(Token::OrOr);
                }
                return Err(self.error("expected '||'", pos));
            }
            _ => {}
        }

        // String literal; '' inside the literal is an escaped quote
        if ch == '\'' || ch == '"' {
            return self.read_string(ch, pos).map(Token::String);
        }

        // Alias for a captured variable
        if ch == '@' {
            self.chars.next();
            let start = self.current_pos();
            let ident = self.read_ident();
            if ident.is_empty() {
                return Err(self.error("expected identifier after '@'", start));
            }
            return Ok(Token::Alias(ident));
        }

        // Number
        if ch.is_ascii_digit() {
            return self.read_number(pos);
        }

        // Identifier, keyword or typed literal
        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let ident = self.read_ident();

            if matches!(ident.as_str(), "guid" | "datetime" | "date" | "decimal") {
                if let Some(&(qpos, '\'')) = self.chars.peek() {
                    let text = self.read_string('\'', qpos)?;
                    return Ok(Token::Typed(ident, text));
                }
            }

            return Ok(match ident.as_str() {
                "true" => Token::Bool(true),
                "false" => Token::Bool(false),
                "null" => Token::Null,
                _ => Token::Ident(ident),
            });
        }

        Err(self.error(format!("unexpected character: '{}'", ch), pos))
    }

    fn read_ident(&mut self) -> String {
        let start = self.current_pos();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.chars.next();
            } else {
                break;
            }
        }
        let end = self.current_pos();
        self.input[start..end].to_string()
    }

    fn read_string(&mut self, quote: char, pos: usize) -> Result<String, ParseError> {
        self.chars.next(); // opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => {
                    if self.eat(quote) {
                        s.push(quote);
                    } else {
                        return Ok(s);
                    }
                }
                Some((_, c)) => s.push(c),
                None => return Err(self.error("unclosed string literal", pos)),
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ParseError> {
        let mut has_dot = false;

        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.chars.next();
            } else if c == '.' && !has_dot {
                // Decimal point only if a digit follows; otherwise it's member access
                let next_is_digit = self.input[i + 1..]
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false);
                if next_is_digit {
                    has_dot = true;
                    self.chars.next();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        let end = self.current_pos();
        let num_str = &self.input[start..end];

        if has_dot {
            num_str
                .parse()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid float: {}", num_str), start))
        } else {
            num_str
                .parse()
                .map(Token::Int)
                .map_err(|_| self.error(format!("invalid integer: {}", num_str), start))
        }
    }

    fn peek_token(&mut self) -> Result<Token, ParseError> {
        let saved_chars = self.chars.clone();
        let tok = self.next_token()?;
        self.chars = saved_chars;
        Ok(tok)
    }
}

/// Predicate parser
struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    /// Position where `current` started
    current_pos: usize,
    /// Bound lambda parameters, innermost last
    params: Vec<String>,
    /// Top level was written as `x => ...`
    lambda_form: bool,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        lexer.skip_whitespace();
        let current_pos = lexer.current_pos();
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            current_pos,
            params: Vec::new(),
            lambda_form: false,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.lexer.skip_whitespace();
        self.current_pos = self.lexer.current_pos();
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        self.lexer.error(message, self.current_pos)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.current == expected {
            self.advance()
        } else {
            Err(self.error(format!(
                "expected {:?}, found {:?}",
                expected, self.current
            )))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.current, Token::Ident(s) if s == kw)
    }

    /// Parse the full predicate
    fn parse(&mut self) -> Result<Expr, ParseError> {
        if let Token::Ident(name) = &self.current {
            if self.lexer.peek_token()? == Token::Arrow {
                let name = name.clone();
                self.advance()?;
                self.advance()?;
                self.params.push(name);
                self.lambda_form = true;
            }
        }

        let expr = self.parse_ternary()?;

        if self.current != Token::Eof {
            return Err(self.error(format!(
                "unexpected token after expression: {:?}",
                self.current
            )));
        }

        Ok(expr)
    }

    /// ternary = coalesce ("?" ternary ":" ternary)?
    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_coalesce()?;

        if self.current == Token::Question {
            self.advance()?;
            let then_expr = self.parse_ternary()?; // Right-associative
            self.expect(Token::Colon)?;
            let else_expr = self.parse_ternary()?;

            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }

        Ok(condition)
    }

    /// coalesce = or ("??" or)*
    fn parse_coalesce(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_or()?;

        if self.current == Token::DoubleQuestion {
            let mut exprs = vec![expr];
            while self.current == Token::DoubleQuestion {
                self.advance()?;
                exprs.push(self.parse_or()?);
            }
            return Ok(Expr::Coalesce(exprs));
        }

        Ok(expr)
    }

    /// or = and (("||" | "or") and)*
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.current == Token::OrOr || self.is_keyword("or") {
            self.advance()?;
            let right = self.parse_and()?;
            left = left.or(right);
        }
        Ok(left)
    }

    /// and = unary (("&&" | "and") unary)*
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while self.current == Token::AndAnd || self.is_keyword("and") {
            self.advance()?;
            let right = self.parse_unary()?;
            left = left.and(right);
        }
        Ok(left)
    }

    /// unary = ("!" | "not") unary | comparison
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.current == Token::Bang || self.is_keyword("not") {
            self.advance()?;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    /// comparison = additive ((cmp additive) | ("in" list))?
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;

        if self.is_keyword("in") {
            self.advance()?;
            let values = self.parse_in_values()?;
            return Ok(Expr::In {
                operand: Box::new(left),
                values,
            });
        }

        let op = match &self.current {
            Token::Eq => Some(CompareOp::Eq),
            Token::Ne => Some(CompareOp::Ne),
            Token::Lt => Some(CompareOp::Lt),
            Token::Le => Some(CompareOp::Le),
            Token::Gt => Some(CompareOp::Gt),
            Token::Ge => Some(CompareOp::Ge),
            Token::Ident(kw) => match kw.as_str() {
                "eq" => Some(CompareOp::Eq),
                "ne" => Some(CompareOp::Ne),
                "lt" => Some(CompareOp::Lt),
                "le" => Some(CompareOp::Le),
                "gt" => Some(CompareOp::Gt),
                "ge" => Some(CompareOp::Ge),
                _ => None,
            },
            _ => None,
        };

        if let Some(op) = op {
            self.advance()?;
            let right = self.parse_additive()?;
            return Ok(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    /// `[a, b]`, `(a, b)` or a single captured list
    fn parse_in_values(&mut self) -> Result<Vec<Expr>, ParseError> {
        let close = match self.current {
            Token::LBracket => Token::RBracket,
            Token::LParen => Token::RParen,
            _ => return Ok(vec![self.parse_postfix()?]),
        };
        self.advance()?;
        self.parse_list_items(close)
    }

    fn parse_list_items(&mut self, close: Token) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.current == close {
            self.advance()?;
            return Ok(items);
        }
        loop {
            items.push(self.parse_ternary()?);
            if self.current == Token::Comma {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    /// additive = term (("+" | "-") term)*
    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match &self.current {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_term()?;
            left = Expr::Arithmetic {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// term = factor (("*" | "/" | "%") factor)*
    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match &self.current {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                Token::Percent => ArithOp::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_factor()?;
            left = Expr::Arithmetic {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// factor = "-" factor | postfix
    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        if self.current == Token::Minus {
            self.advance()?;
            return match self.parse_factor()? {
                Expr::Constant(Value::Int(i)) => Ok(Expr::Constant(Value::Int(-i))),
                Expr::Constant(Value::Float(f)) => Ok(Expr::Constant(Value::Float(-f))),
                other => Ok(Expr::Arithmetic {
                    left: Box::new(Expr::Constant(Value::Int(0))),
                    op: ArithOp::Sub,
                    right: Box::new(other),
                }),
            };
        }
        self.parse_postfix()
    }

    /// postfix = primary ("." ident ["(" args ")"])*
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        while self.current == Token::Dot {
            self.advance()?;
            let Token::Ident(name) = &self.current else {
                return Err(self.error("expected member name after '.'"));
            };
            let name = name.clone();
            self.advance()?;

            if self.current == Token::LParen {
                self.advance()?;
                expr = self.parse_method(expr, &name)?;
            } else {
                expr = match expr {
                    Expr::Member(path) => Expr::Member(path.child(name)),
                    other => {
                        return Err(self.error(format!(
                            "cannot access member '{}' of a {}",
                            name,
                            other.kind_name()
                        )));
                    }
                };
            }
        }

        Ok(expr)
    }

    /// Method call on `receiver`; the opening paren is already consumed
    fn parse_method(&mut self, receiver: Expr, name: &str) -> Result<Expr, ParseError> {
        let normalized = normalize_function(name);

        if normalized == "any" || normalized == "all" {
            let quantifier = if normalized == "any" {
                Quantifier::Any
            } else {
                Quantifier::All
            };
            let Expr::Member(collection) = receiver else {
                return Err(self.error(format!(
                    "'{}' must be applied to a collection member",
                    normalized
                )));
            };
            return self.parse_lambda_body(quantifier, collection);
        }

        let mut args = vec![receiver];
        args.extend(self.parse_list_items(Token::RParen)?);
        Ok(Expr::Call {
            function: normalized,
            args,
        })
    }

    /// `param => predicate)` or `)`
    fn parse_lambda_body(
        &mut self,
        quantifier: Quantifier,
        collection: MemberPath,
    ) -> Result<Expr, ParseError> {
        if self.current == Token::RParen {
            if quantifier == Quantifier::All {
                return Err(self.error("'all' requires a predicate"));
            }
            self.advance()?;
            return Ok(Expr::Lambda {
                quantifier,
                collection,
                param: String::new(),
                predicate: None,
            });
        }

        let Token::Ident(param) = &self.current else {
            return Err(self.error("expected lambda parameter"));
        };
        let param = param.clone();
        self.advance()?;
        self.expect(Token::Arrow)?;

        self.params.push(param.clone());
        let body = self.parse_ternary();
        self.params.pop();
        let body = body?;

        self.expect(Token::RParen)?;
        Ok(Expr::Lambda {
            quantifier,
            collection,
            param,
            predicate: Some(Box::new(body)),
        })
    }

    /// Root for a bare identifier
    ///
    /// The top-level lambda parameter is rewritten to the implicit parameter
    /// so both input forms produce the same tree.
    fn member_root(&self, ident: String) -> MemberPath {
        match self.params.iter().rposition(|p| *p == ident) {
            Some(0) if self.lambda_form => MemberPath::new(IMPLICIT_PARAM, Vec::new()),
            Some(_) => MemberPath::new(ident, Vec::new()),
            None if self.lambda_form => MemberPath::new(ident, Vec::new()),
            None => MemberPath::new(IMPLICIT_PARAM, vec![ident]),
        }
    }

    /// primary = "(" ternary ")" | literal | alias | ident ["(" args ")"] | list
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current.clone();
        match token {
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_ternary()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => Err(self.error("list literal is only allowed after 'in'")),
            Token::Int(n) => {
                self.advance()?;
                Ok(Expr::Constant(Value::Int(n)))
            }
            Token::Float(n) => {
                self.advance()?;
                Ok(Expr::Constant(Value::Float(n)))
            }
            Token::String(s) => {
                self.advance()?;
                Ok(Expr::Constant(Value::String(s)))
            }
            Token::Bool(b) => {
                self.advance()?;
                Ok(Expr::Constant(Value::Bool(b)))
            }
            Token::Null => {
                self.advance()?;
                Ok(Expr::Constant(Value::Null))
            }
            Token::Typed(kind, text) => {
                let value = self.typed_literal(&kind, &text)?;
                self.advance()?;
                Ok(Expr::Constant(value))
            }
            Token::Alias(name) => {
                self.advance()?;
                Ok(Expr::Member(MemberPath::new(name, Vec::new())))
            }
            Token::Ident(name) => {
                self.advance()?;
                if self.current == Token::LParen {
                    self.advance()?;
                    let args = self.parse_list_items(Token::RParen)?;
                    return Ok(Expr::Call {
                        function: normalize_function(&name),
                        args,
                    });
                }
                Ok(Expr::Member(self.member_root(name)))
            }
            other => Err(self.error(format!("unexpected token: {:?}", other))),
        }
    }

    fn typed_literal(&self, kind: &str, text: &str) -> Result<Value, ParseError> {
        match kind {
            "guid" => uuid::Uuid::parse_str(text)
                .map(Value::Guid)
                .map_err(|e| self.error(format!("invalid guid '{}': {}", text, e))),
            "datetime" => chrono::DateTime::parse_from_rfc3339(text)
                .map(|dt| Value::DateTime(dt.with_timezone(&chrono::Utc)))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                        .map(Value::NaiveDateTime)
                })
                .map_err(|e| self.error(format!("invalid datetime '{}': {}", text, e))),
            "date" => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| self.error(format!("invalid date '{}': {}", text, e))),
            "decimal" => {
                let valid = !text.is_empty()
                    && text
                        .trim_start_matches('-')
                        .chars()
                        .all(|c| c.is_ascii_digit() || c == '.');
                if valid {
                    Ok(Value::Decimal(text.to_string()))
                } else {
                    Err(self.error(format!("invalid decimal '{}'", text)))
                }
            }
            _ => Err(self.error(format!("unknown literal prefix '{}'", kind))),
        }
    }
}

/// `StartsWith` / `starts_with` → `startswith`
fn normalize_function(name: &str) -> String {
    name.to_lowercase().replace('_', "")
}
