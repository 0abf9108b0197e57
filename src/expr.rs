//! Sandboxed expression evaluator for mapping files
//!
//! Mapping files may carry small expressions such as
//! `value > 64 ? 'down' : 'up'` or `((value * 128) + lsb) / 16383`. They are
//! parsed by a recursive-descent parser into a tiny AST and evaluated against
//! a caller-supplied variable context. There are no function calls, no
//! property access and no way to reach the host: the only inputs are
//! literals and context variables.
//!
//! Supported, lowest to highest precedence:
//!
//! | operators            | notes                              |
//! |----------------------|------------------------------------|
//! | `c ? a : b`          | right associative                  |
//! | `\|\|`               | short-circuit, yields a boolean    |
//! | `&&`                 | short-circuit, yields a boolean    |
//! | `==` `!=`            | `===`/`!==` accepted as aliases    |
//! | `<` `<=` `>` `>=`    | numbers or strings                 |
//! | `+` `-`              | `+` concatenates if either is text |
//! | `*` `/` `%`          | division by zero is an error       |
//! | `-x` `!x`            | unary                              |

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Maximum accepted source length
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Maximum nesting depth of the parser
pub const MAX_DEPTH: usize = 64;

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Numeric view; booleans count as 1/0, text has none
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

/// Named variables visible to an expression
pub type Context = HashMap<String, Value>;

/// Parse or evaluation failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("expression exceeds {0} characters")]
    TooLong(usize),
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string starting at {0}")]
    UnterminatedString(usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected token '{found}' at {pos}")]
    UnexpectedToken { found: String, pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("cannot apply '{op}' to {operand}")]
    UnaryTypeMismatch { op: &'static str, operand: &'static str },
    #[error("division by zero")]
    DivisionByZero,
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Ident(name) => f.write_str(name),
            Token::Op(op) => f.write_str(op),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Question => f.write_str("?"),
            Token::Colon => f.write_str(":"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let pos = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[pos..i].iter().collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber(text.clone()))?;
            tokens.push(Spanned { token: Token::Number(number), pos });
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(ExprError::UnterminatedString(pos)),
                    Some('\\') => {
                        if let Some(escaped) = chars.get(i + 1) {
                            text.push(*escaped);
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Spanned { token: Token::Str(text), pos });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[pos..i].iter().collect();
            tokens.push(Spanned { token: Token::Ident(name), pos });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let next2 = chars.get(i + 2).copied();
        let (token, width) = match (c, next, next2) {
            ('=', Some('='), Some('=')) => (Token::Op("=="), 3),
            ('!', Some('='), Some('=')) => (Token::Op("!="), 3),
            ('=', Some('='), _) => (Token::Op("=="), 2),
            ('!', Some('='), _) => (Token::Op("!="), 2),
            ('<', Some('='), _) => (Token::Op("<="), 2),
            ('>', Some('='), _) => (Token::Op(">="), 2),
            ('&', Some('&'), _) => (Token::Op("&&"), 2),
            ('|', Some('|'), _) => (Token::Op("||"), 2),
            ('<', _, _) => (Token::Op("<"), 1),
            ('>', _, _) => (Token::Op(">"), 1),
            ('+', _, _) => (Token::Op("+"), 1),
            ('-', _, _) => (Token::Op("-"), 1),
            ('*', _, _) => (Token::Op("*"), 1),
            ('/', _, _) => (Token::Op("/"), 1),
            ('%', _, _) => (Token::Op("%"), 1),
            ('!', _, _) => (Token::Op("!"), 1),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            ('?', _, _) => (Token::Question, 1),
            (':', _, _) => (Token::Colon, 1),
            _ => return Err(ExprError::UnexpectedChar { ch: c, pos }),
        };
        tokens.push(Spanned { token, pos });
        i += width;
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_token(op: &str) -> Option<Self> {
        Some(match op {
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_op(&self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => Some(op),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.advance() {
            Some(spanned) if spanned.token == expected => Ok(()),
            Some(spanned) => Err(ExprError::UnexpectedToken {
                found: spanned.token.to_string(),
                pos: spanned.pos,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn ternary(&mut self) -> Result<Node, ExprError> {
        self.enter()?;
        let condition = self.binary_level(0)?;
        let node = if self.peek() == Some(&Token::Question) {
            self.advance();
            let then = self.ternary()?;
            self.expect(Token::Colon)?;
            let otherwise = self.ternary()?;
            Node::Ternary(Box::new(condition), Box::new(then), Box::new(otherwise))
        } else {
            condition
        };
        self.leave();
        Ok(node)
    }

    /// Left-associative binary operators, one precedence level per entry
    fn binary_level(&mut self, level: usize) -> Result<Node, ExprError> {
        const LEVELS: [&[&str]; 6] = [
            &["||"],
            &["&&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];

        if level == LEVELS.len() {
            return self.unary();
        }

        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.peek_op(LEVELS[level]) {
            self.advance();
            let rhs = self.binary_level(level + 1)?;
            let op = BinaryOp::from_token(op).ok_or(ExprError::UnexpectedEnd)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        let op = match self.peek_op(&["-", "!"]) {
            Some("-") => Some(UnaryOp::Neg),
            Some(_) => Some(UnaryOp::Not),
            None => None,
        };

        match op {
            Some(op) => {
                self.advance();
                self.enter()?;
                let operand = self.unary()?;
                self.leave();
                Ok(Node::Unary(op, Box::new(operand)))
            }
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        let spanned = self.advance().ok_or(ExprError::UnexpectedEnd)?;
        match spanned.token {
            Token::Number(n) => Ok(Node::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Node::Literal(Value::Str(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                _ => Ok(Node::Var(name)),
            },
            Token::LParen => {
                let inner = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
                pos: spanned.pos,
            }),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval_node(node: &Node, ctx: &Context) -> Result<Value, ExprError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Var(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UndefinedVariable(name.clone())),
        Node::Unary(op, operand) => {
            let value = eval_node(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                UnaryOp::Neg => value
                    .as_number()
                    .map(|n| Value::Number(-n))
                    .ok_or(ExprError::UnaryTypeMismatch {
                        op: "-",
                        operand: value.type_name(),
                    }),
            }
        }
        Node::Ternary(condition, then, otherwise) => {
            if eval_node(condition, ctx)?.truthy() {
                eval_node(then, ctx)
            } else {
                eval_node(otherwise, ctx)
            }
        }
        Node::Binary(BinaryOp::Or, lhs, rhs) => {
            if eval_node(lhs, ctx)?.truthy() {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(eval_node(rhs, ctx)?.truthy()))
            }
        }
        Node::Binary(BinaryOp::And, lhs, rhs) => {
            if !eval_node(lhs, ctx)?.truthy() {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(eval_node(rhs, ctx)?.truthy()))
            }
        }
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval_node(lhs, ctx)?;
            let rhs = eval_node(rhs, ctx)?;
            apply_binary(*op, lhs, rhs)
        }
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Str(_), _) | (_, Value::Str(_)) => false,
        (a, b) => a.as_number() == b.as_number(),
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
    let mismatch = |lhs: &Value, rhs: &Value| ExprError::TypeMismatch {
        op: op.symbol(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(mismatch(&lhs, &rhs)),
                },
            };
            let result = match ordering {
                None => false,
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                },
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", lhs, rhs))),
            _ => numeric(&lhs, &rhs)
                .map(|(a, b)| Value::Number(a + b))
                .ok_or_else(|| mismatch(&lhs, &rhs)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = numeric(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
            match op {
                BinaryOp::Sub => Ok(Value::Number(a - b)),
                BinaryOp::Mul => Ok(Value::Number(a * b)),
                BinaryOp::Div if b == 0.0 => Err(ExprError::DivisionByZero),
                BinaryOp::Div => Ok(Value::Number(a / b)),
                _ if b == 0.0 => Err(ExprError::DivisionByZero),
                _ => Ok(Value::Number(a % b)),
            }
        }
        BinaryOp::Or | BinaryOp::And => Ok(Value::Bool(lhs.truthy() && rhs.truthy())),
    }
}

fn numeric(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
    Some((lhs.as_number()?, rhs.as_number()?))
}

// ============================================================================
// Public API
// ============================================================================

/// A parsed expression, ready to evaluate many times
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse an expression; mapping files are validated with this at load time
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_EXPRESSION_LEN {
            return Err(ExprError::TooLong(MAX_EXPRESSION_LEN));
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.ternary()?;

        if let Some(extra) = parser.advance() {
            return Err(ExprError::UnexpectedToken {
                found: extra.token.to_string(),
                pos: extra.pos,
            });
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, ctx: &Context) -> Result<Value, ExprError> {
        eval_node(&self.root, ctx)
    }

    /// Name of the variable if the whole expression is a bare identifier
    pub fn as_variable(&self) -> Option<&str> {
        match &self.root {
            Node::Var(name) => Some(name),
            _ => None,
        }
    }
}

/// Parse and evaluate in one step
pub fn evaluate(source: &str, ctx: &Context) -> Result<Value, ExprError> {
    Expression::parse(source)?.eval(ctx)
}

/// Evaluate, logging and returning `fallback` on any error
pub fn evaluate_or(expression: &Expression, ctx: &Context, fallback: Value) -> Value {
    match expression.eval(ctx) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Expression '{}' failed ({}), falling back to {}",
                expression.source(),
                e,
                fallback
            );
            fallback
        }
    }
}

/// Default fallback: the raw `value` from the context, or 0
pub fn raw_value_fallback(ctx: &Context) -> Value {
    ctx.get("value").cloned().unwrap_or(Value::Number(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_ternary_with_strings() {
        let c = ctx(&[("value", Value::Number(100.0))]);
        assert_eq!(
            evaluate("value > 64 ? 'down' : 'up'", &c).unwrap(),
            Value::Str("down".into())
        );

        let c = ctx(&[("value", Value::Number(10.0))]);
        assert_eq!(
            evaluate("value > 64 ? 'down' : 'up'", &c).unwrap(),
            Value::Str("up".into())
        );
    }

    #[test]
    fn test_arithmetic_precedence() {
        let c = ctx(&[("value", Value::Number(127.0)), ("lsb", Value::Number(127.0))]);
        assert_eq!(
            evaluate("((value*128)+lsb)/16383", &c).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(evaluate("2 + 3 * 4", &c).unwrap(), Value::Number(14.0));
        assert_eq!(evaluate("(2 + 3) * 4", &c).unwrap(), Value::Number(20.0));
        assert_eq!(evaluate("10 % 4 - -1", &c).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_boolean_logic_and_comparisons() {
        let c = ctx(&[("shift", Value::Bool(true)), ("value", Value::Number(0.0))]);
        assert_eq!(evaluate("shift && value == 0", &c).unwrap(), Value::Bool(true));
        assert_eq!(evaluate("!shift || value > 1", &c).unwrap(), Value::Bool(false));
        assert_eq!(evaluate("shift == true", &c).unwrap(), Value::Bool(true));
        assert_eq!(evaluate("shift === 1", &c).unwrap(), Value::Bool(true));
        assert_eq!(evaluate("value !== 0", &c).unwrap(), Value::Bool(false));
        assert_eq!(evaluate("'a' < 'b'", &c).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_nested_ternary_is_right_associative() {
        let c = ctx(&[("value", Value::Number(64.0))]);
        let expr = "value < 64 ? 'ccw' : value > 64 ? 'cw' : 'stop'";
        assert_eq!(evaluate(expr, &c).unwrap(), Value::Str("stop".into()));
    }

    #[test]
    fn test_string_concatenation() {
        let c = ctx(&[("deck", Value::Str("A".into())), ("value", Value::Number(3.0))]);
        assert_eq!(
            evaluate("'hotcue_' + value", &c).unwrap(),
            Value::Str("hotcue_3".into())
        );
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let err = evaluate("missing + 1", &Context::new()).unwrap_err();
        assert_eq!(err, ExprError::UndefinedVariable("missing".into()));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let c = ctx(&[("value", Value::Number(5.0))]);
        assert_eq!(evaluate("value / 0", &c).unwrap_err(), ExprError::DivisionByZero);
        assert_eq!(evaluate("value % 0", &c).unwrap_err(), ExprError::DivisionByZero);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Expression::parse(""), Err(ExprError::Empty)));
        assert!(matches!(Expression::parse("1 +"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(
            Expression::parse("'open"),
            Err(ExprError::UnterminatedString(0))
        ));
        assert!(matches!(
            Expression::parse("a ? b"),
            Err(ExprError::UnexpectedEnd)
        ));
        assert!(matches!(
            Expression::parse("value = 1"),
            Err(ExprError::UnexpectedChar { ch: '=', .. })
        ));
    }

    #[test]
    fn test_no_host_capabilities() {
        // Calls and property access are not part of the grammar
        assert!(Expression::parse("process.exit(1)").is_err());
        assert!(Expression::parse("require('fs')").is_err());
        assert!(Expression::parse("this.constructor").is_err());
        assert!(Expression::parse("value; 1").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(
            Expression::parse(&deep).unwrap_err(),
            ExprError::TooDeep(MAX_DEPTH)
        );
        let negations = format!("{}1", "-".repeat(200));
        assert_eq!(
            Expression::parse(&negations).unwrap_err(),
            ExprError::TooDeep(MAX_DEPTH)
        );
    }

    #[test]
    fn test_evaluate_or_falls_back() {
        let c = ctx(&[("value", Value::Number(42.0))]);
        let expr = Expression::parse("nope * 2").unwrap();
        assert_eq!(
            evaluate_or(&expr, &c, raw_value_fallback(&c)),
            Value::Number(42.0)
        );
        assert_eq!(raw_value_fallback(&Context::new()), Value::Number(0.0));
    }

    #[test]
    fn test_as_variable() {
        assert_eq!(Expression::parse("up").unwrap().as_variable(), Some("up"));
        assert_eq!(Expression::parse("'up'").unwrap().as_variable(), None);
    }

    #[test]
    fn test_display_of_numbers() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
    }
}
