//! Binding expression parser.
//!
//! Parses the text of `{value: Items.Count > 0}`-style bindings into a small
//! expression tree. Only syntax is checked here; member lookups are typed
//! later against the data context (see [`crate::resolver`]).

use crate::error::BindingParseError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingKind {
    Value,
    Command,
    StaticCommand,
    Resource,
    ControlProperty,
}

impl BindingKind {
    pub fn parse(name: &str) -> Result<Self, BindingParseError> {
        match name.trim() {
            "value" | "v" => Ok(Self::Value),
            "command" | "cmd" => Ok(Self::Command),
            "staticCommand" => Ok(Self::StaticCommand),
            "resource" => Ok(Self::Resource),
            "controlProperty" => Ok(Self::ControlProperty),
            other => Err(BindingParseError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Command => "command",
            Self::StaticCommand => "staticCommand",
            Self::Resource => "resource",
            Self::ControlProperty => "controlProperty",
        }
    }

    pub fn is_command(self) -> bool {
        matches!(self, Self::Command | Self::StaticCommand)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expr {
    Null,
    Bool { value: bool },
    Number { value: f64 },
    String { value: String },
    /// `_this`
    This,
    /// `_parent` (1) or `_parentN`
    Parent { level: usize },
    /// `_root`
    Root,
    Identifier { name: String },
    Member { target: Box<Expr>, name: String },
    Call { target: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Neq => 3,
            Self::Lt | Self::Lte | Self::Gt | Self::Gte => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Lt | Self::Lte | Self::Gt | Self::Gte | Self::And | Self::Or
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool { value } => write!(f, "{value}"),
            Self::Number { value } => write!(f, "{value}"),
            Self::String { value } => write!(f, "\"{}\"", value.replace('"', "\\\"")),
            Self::This => write!(f, "_this"),
            Self::Parent { level: 1 } => write!(f, "_parent"),
            Self::Parent { level } => write!(f, "_parent{level}"),
            Self::Root => write!(f, "_root"),
            Self::Identifier { name } => write!(f, "{name}"),
            Self::Member { target, name } => write!(f, "{target}.{name}"),
            Self::Call { target, args } => {
                write!(f, "{target}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Unary { op: UnaryOp::Not, operand } => write!(f, "!{operand}"),
            Self::Unary { op: UnaryOp::Negate, operand } => write!(f, "-{operand}"),
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}

/// A parsed `{kind: expression}` binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingExpression {
    pub kind: BindingKind,
    pub expression: Expr,
    pub text: String,
}

/// Parses `{value: Name}` (attribute form) or `value: Name` (text form).
pub fn parse_binding(text: &str) -> Result<BindingExpression, BindingParseError> {
    let trimmed = text.trim();
    let inner = if trimmed.starts_with('{') {
        trimmed
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .ok_or_else(|| BindingParseError::NotABinding(text.to_string()))?
    } else {
        trimmed
    };
    let (kind, expression) = inner
        .split_once(':')
        .ok_or_else(|| BindingParseError::NotABinding(text.to_string()))?;
    let kind = BindingKind::parse(kind)?;
    let expression = parse_expression(expression)?;
    Ok(BindingExpression {
        kind,
        expression,
        text: inner.trim().to_string(),
    })
}

pub fn parse_expression(text: &str) -> Result<Expr, BindingParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(BindingParseError::Empty);
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.parse_binary(0)?;
    if let Some(token) = parser.tokens.get(parser.pos) {
        return Err(BindingParseError::UnexpectedToken {
            found: token.to_string(),
            expected: "end of expression",
        });
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Punct(p) => write!(f, "{p}"),
        }
    }
}

const PUNCTUATION: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "(", ")", ",", ".", "!", "+", "-", "*", "/", "<", ">",
];

fn tokenize(text: &str) -> Result<Vec<Token>, BindingParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut s = String::new();
            let mut escaped = false;
            let mut closed = false;
            for (_, nc) in chars.by_ref() {
                if escaped {
                    s.push(nc);
                    escaped = false;
                } else if nc == '\\' {
                    escaped = true;
                } else if nc == c {
                    closed = true;
                    break;
                } else {
                    s.push(nc);
                }
            }
            if !closed {
                return Err(BindingParseError::UnterminatedString);
            }
            tokens.push(Token::Str(s));
            continue;
        }

        if c.is_ascii_digit() {
            let mut s = String::new();
            while let Some(&(_, nc)) = chars.peek() {
                if nc.is_ascii_digit() || nc == '.' {
                    s.push(nc);
                    chars.next();
                } else {
                    break;
                }
            }
            let n = s
                .parse::<f64>()
                .map_err(|_| BindingParseError::InvalidNumber(s.clone()))?;
            tokens.push(Token::Number(n));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut s = String::new();
            while let Some(&(_, nc)) = chars.peek() {
                if nc.is_alphanumeric() || nc == '_' {
                    s.push(nc);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(s));
            continue;
        }

        let rest = &text[offset..];
        let Some(punct) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) else {
            return Err(BindingParseError::UnexpectedChar { ch: c, offset });
        };
        for _ in 0..punct.len() {
            chars.next();
        }
        tokens.push(Token::Punct(punct));
    }

    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(x)) if *x == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let Some(Token::Punct(p)) = self.peek() else {
            return None;
        };
        Some(match *p {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Neq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Lte,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Gte,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, BindingParseError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            if op.precedence() <= min_precedence {
                break;
            }
            self.pos += 1;
            let right = self.parse_binary(op.precedence())?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, BindingParseError> {
        if self.eat_punct("!") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.eat_punct("-") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, BindingParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                match self.next() {
                    Some(Token::Ident(name)) => {
                        expr = Expr::Member {
                            target: Box::new(expr),
                            name,
                        };
                    }
                    Some(other) => {
                        return Err(BindingParseError::UnexpectedToken {
                            found: other.to_string(),
                            expected: "member name",
                        });
                    }
                    None => return Err(BindingParseError::UnexpectedEnd),
                }
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.parse_binary(0)?);
                        if self.eat_punct(")") {
                            break;
                        }
                        if !self.eat_punct(",") {
                            return match self.peek() {
                                Some(t) => Err(BindingParseError::UnexpectedToken {
                                    found: t.to_string(),
                                    expected: "',' or ')'",
                                }),
                                None => Err(BindingParseError::UnexpectedEnd),
                            };
                        }
                    }
                }
                expr = Expr::Call {
                    target: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, BindingParseError> {
        match self.next() {
            None => Err(BindingParseError::UnexpectedEnd),
            Some(Token::Number(value)) => Ok(Expr::Number { value }),
            Some(Token::Str(value)) => Ok(Expr::String { value }),
            Some(Token::Punct("(")) => {
                let inner = self.parse_binary(0)?;
                if !self.eat_punct(")") {
                    return Err(match self.peek() {
                        Some(t) => BindingParseError::UnexpectedToken {
                            found: t.to_string(),
                            expected: "')'",
                        },
                        None => BindingParseError::UnexpectedEnd,
                    });
                }
                Ok(inner)
            }
            Some(Token::Punct(p)) => Err(BindingParseError::UnexpectedToken {
                found: p.to_string(),
                expected: "expression",
            }),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "null" => Expr::Null,
                "true" => Expr::Bool { value: true },
                "false" => Expr::Bool { value: false },
                "_this" => Expr::This,
                "_root" => Expr::Root,
                "_parent" => Expr::Parent { level: 1 },
                other => match other
                    .strip_prefix("_parent")
                    .and_then(|n| n.parse::<usize>().ok())
                {
                    Some(level) if level > 0 => Expr::Parent { level },
                    _ => Expr::Identifier { name },
                },
            }),
        }
    }
}
