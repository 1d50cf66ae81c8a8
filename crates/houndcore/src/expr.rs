//! Restricted expression language for `conditional` and `script`
//! steps.
//!
//! Supports literals, variable paths, arithmetic, comparison, boolean
//! operators and a fixed builtin surface. Expressions are evaluated
//! against a read-only variable snapshot; nothing in the grammar can
//! mutate engine state.

use crate::{StepError, Value};
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ExprError(pub String);

impl From<ExprError> for StepError {
    fn from(e: ExprError) -> Self {
        StepError::Script(e.0)
    }
}

/// Evaluate an expression against a variable snapshot.
pub fn evaluate(input: &str, vars: &HashMap<String, Value>) -> Result<Value, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        vars,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )));
    }
    Ok(value)
}

/// Evaluate an expression and reduce it to truthiness.
pub fn evaluate_bool(input: &str, vars: &HashMap<String, Value>) -> Result<bool, ExprError> {
    Ok(evaluate(input, vars)?.is_truthy())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Eq);
                } else {
                    return Err(ExprError("single '=' is not an operator".to_string()));
                }
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(Token::And);
                } else {
                    return Err(ExprError("single '&' is not an operator".to_string()));
                }
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(Token::Or);
                } else {
                    return Err(ExprError("single '|' is not an operator".to_string()));
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err(ExprError("unterminated string".to_string())),
                        },
                        Some(ch) => s.push(ch),
                        None => return Err(ExprError("unterminated string".to_string())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let mut raw = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        raw.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = raw
                    .parse()
                    .map_err(|_| ExprError(format!("invalid number: {raw}")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' || d == '.' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(ident),
                });
            }
            other => return Err(ExprError(format!("unexpected character: {other}"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a HashMap<String, Value>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Value, ExprError> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Value::Bool(left.is_truthy() || right.is_truthy());
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value, ExprError> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Value::Bool(left.is_truthy() && right.is_truthy());
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Value, ExprError> {
        if self.eat(&Token::Not) {
            let inner = self.not_expr()?;
            return Ok(Value::Bool(!inner.is_truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, ExprError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Token::Eq,
            Some(Token::Ne) => Token::Ne,
            Some(Token::Lt) => Token::Lt,
            Some(Token::Le) => Token::Le,
            Some(Token::Gt) => Token::Gt,
            Some(Token::Ge) => Token::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        let result = match op {
            Token::Eq => left == right,
            Token::Ne => left != right,
            _ => {
                let ordering = compare(&left, &right)?;
                match op {
                    Token::Lt => ordering.is_lt(),
                    Token::Le => ordering.is_le(),
                    Token::Gt => ordering.is_gt(),
                    Token::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                }
            }
        };
        Ok(Value::Bool(result))
    }

    fn additive(&mut self) -> Result<Value, ExprError> {
        let mut left = self.multiplicative()?;
        loop {
            if self.eat(&Token::Plus) {
                let right = self.multiplicative()?;
                left = add(&left, &right)?;
            } else if self.eat(&Token::Minus) {
                let right = self.multiplicative()?;
                left = Value::Number(number(&left, "-")? - number(&right, "-")?);
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Value, ExprError> {
        let mut left = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                let right = self.unary()?;
                left = Value::Number(number(&left, "*")? * number(&right, "*")?);
            } else if self.eat(&Token::Slash) {
                let right = self.unary()?;
                let divisor = number(&right, "/")?;
                if divisor == 0.0 {
                    return Err(ExprError("division by zero".to_string()));
                }
                left = Value::Number(number(&left, "/")? / divisor);
            } else if self.eat(&Token::Percent) {
                let right = self.unary()?;
                let divisor = number(&right, "%")?;
                if divisor == 0.0 {
                    return Err(ExprError("modulo by zero".to_string()));
                }
                left = Value::Number(number(&left, "%")? % divisor);
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Value, ExprError> {
        if self.eat(&Token::Minus) {
            let inner = self.unary()?;
            return Ok(Value::Number(-number(&inner, "-")?));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExprError("expected ')'".to_string()));
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.or_expr()?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            if !self.eat(&Token::Comma) {
                                return Err(ExprError("expected ',' or ')'".to_string()));
                            }
                        }
                    }
                    call_builtin(&name, &args)
                } else {
                    Ok(self.lookup(&name))
                }
            }
            other => Err(ExprError(format!("unexpected token: {other:?}"))),
        }
    }

    /// Undefined variables resolve to null; operators on null then
    /// fail loudly rather than guessing.
    fn lookup(&self, path: &str) -> Value {
        let found = match path.split_once('.') {
            Some((root, rest)) => self.vars.get(root).and_then(|v| v.get_path(rest)),
            None => self.vars.get(path),
        };
        found.cloned().unwrap_or(Value::Null)
    }
}

fn number(value: &Value, op: &str) -> Result<f64, ExprError> {
    value
        .as_f64()
        .ok_or_else(|| ExprError(format!("'{op}' needs a number, got {value:?}")))
}

fn add(left: &Value, right: &Value) -> Result<Value, ExprError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b.to_display_string()))),
        (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a.to_display_string(), b))),
        _ => Err(ExprError("'+' needs numbers or strings".to_string())),
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, ExprError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| ExprError("cannot order NaN".to_string())),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExprError(format!(
            "cannot order {left:?} against {right:?}"
        ))),
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let arity = |n: usize| -> Result<(), ExprError> {
        if args.len() == n {
            Ok(())
        } else {
            Err(ExprError(format!("{name}() takes {n} argument(s)")))
        }
    };
    match name {
        "len" => {
            arity(1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::Null => 0,
                other => return Err(ExprError(format!("len() of {other:?}"))),
            };
            Ok(Value::Number(n as f64))
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExprError(format!("{name}() needs arguments")));
            }
            let mut best = number(&args[0], name)?;
            for arg in &args[1..] {
                let n = number(arg, name)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            Ok(Value::Number(best))
        }
        "abs" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], name)?.abs()))
        }
        "round" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], name)?.round()))
        }
        "floor" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], name)?.floor()))
        }
        "ceil" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], name)?.ceil()))
        }
        "now" => {
            arity(0)?;
            Ok(Value::Number(Utc::now().timestamp_millis() as f64))
        }
        "contains" => {
            arity(2)?;
            let found = match (&args[0], &args[1]) {
                (Value::String(hay), Value::String(needle)) => hay.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => {
                    return Err(ExprError(
                        "contains() needs a string or array haystack".to_string(),
                    ))
                }
            };
            Ok(Value::Bool(found))
        }
        "upper" => {
            arity(1)?;
            Ok(Value::String(args[0].to_display_string().to_uppercase()))
        }
        "lower" => {
            arity(1)?;
            Ok(Value::String(args[0].to_display_string().to_lowercase()))
        }
        "str" => {
            arity(1)?;
            Ok(Value::String(args[0].to_display_string()))
        }
        "num" => {
            arity(1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(*n)),
                Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| ExprError(format!("num() cannot parse '{s}'"))),
                other => Err(ExprError(format!("num() of {other:?}"))),
            }
        }
        _ => Err(ExprError(format!("unknown function: {name}"))),
    }
}
