//! Guard expressions attached to bucket process policies.
//!
//! A small boolean language over the object being resolved:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := cmp ( "&&" cmp )*
//! cmp     := unary ( ( "==" | "!=" ) unary )*
//! unary   := "!" unary | primary
//! primary := STRING | "true" | "false" | IDENT | IDENT "(" args ")" | "(" expr ")"
//! ```
//!
//! Variables are `bucket`, `fileKey` and `fileType`. Functions are
//! `hasPrefix`, `hasSuffix`, `contains`, `toLower` and `toUpper`.

use std::fmt;

use thiserror::Error;

/// Deepest grouping, negation or call nesting accepted by the parser.
const MAX_DEPTH: usize = 64;
/// Longest accepted expression, in tokens. Bounds the depth of operator
/// chains, which the parser builds left-nested.
const MAX_TOKENS: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("`{name}` takes {expected} argument(s), got {found}")]
    Arity {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("type mismatch: expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
}

/// Runtime value of an expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
        }
    }

    fn into_bool(self) -> Result<bool, ExprError> {
        match self {
            Self::Bool(b) => Ok(b),
            other => Err(ExprError::Type {
                expected: "bool",
                found: other.kind(),
            }),
        }
    }

    fn into_str(self) -> Result<String, ExprError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(ExprError::Type {
                expected: "string",
                found: other.kind(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Facts about the object an expression is evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    pub bucket: &'a str,
    pub file_key: &'a str,
    /// Extension of the key including the dot, or empty.
    pub file_type: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Var {
    Bucket,
    FileKey,
    FileType,
}

impl Var {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "bucket" => Some(Self::Bucket),
            "fileKey" => Some(Self::FileKey),
            "fileType" => Some(Self::FileType),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Func {
    HasPrefix,
    HasSuffix,
    Contains,
    ToLower,
    ToUpper,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "hasPrefix" => Some(Self::HasPrefix),
            "hasSuffix" => Some(Self::HasSuffix),
            "contains" => Some(Self::Contains),
            "toLower" => Some(Self::ToLower),
            "toUpper" => Some(Self::ToUpper),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::HasPrefix => "hasPrefix",
            Self::HasSuffix => "hasSuffix",
            Self::Contains => "contains",
            Self::ToLower => "toLower",
            Self::ToUpper => "toUpper",
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::HasPrefix | Self::HasSuffix | Self::Contains => 2,
            Self::ToLower | Self::ToUpper => 1,
        }
    }
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Var(VarRef),
    Call(CallRef, Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

/// Resolved variable reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarRef(Var);

/// Resolved function reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallRef(Func);

impl Expr {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            end: src.len(),
        };
        let expr = parser.or()?;
        match parser.peek() {
            None => Ok(expr),
            Some((tok, offset)) => Err(ExprError::Syntax {
                offset,
                message: format!("unexpected {tok}"),
            }),
        }
    }

    pub fn eval(&self, ctx: &Context<'_>) -> Result<Value, ExprError> {
        Ok(match self {
            Self::Literal(value) => value.clone(),
            Self::Var(VarRef(var)) => Value::Str(
                match var {
                    Var::Bucket => ctx.bucket,
                    Var::FileKey => ctx.file_key,
                    Var::FileType => ctx.file_type,
                }
                .to_string(),
            ),
            Self::Call(CallRef(func), args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval(ctx)?.into_str()?);
                }
                call(*func, values)
            }
            Self::Not(inner) => Value::Bool(!inner.eval(ctx)?.into_bool()?),
            Self::And(lhs, rhs) => {
                Value::Bool(lhs.eval(ctx)?.into_bool()? && rhs.eval(ctx)?.into_bool()?)
            }
            Self::Or(lhs, rhs) => {
                Value::Bool(lhs.eval(ctx)?.into_bool()? || rhs.eval(ctx)?.into_bool()?)
            }
            Self::Eq(lhs, rhs) => Value::Bool(compare(lhs.eval(ctx)?, rhs.eval(ctx)?)?),
            Self::Ne(lhs, rhs) => Value::Bool(!compare(lhs.eval(ctx)?, rhs.eval(ctx)?)?),
        })
    }
}

/// Parse and evaluate `src`, requiring a boolean result.
pub fn evaluate(src: &str, ctx: &Context<'_>) -> Result<bool, ExprError> {
    Expr::parse(src)?.eval(ctx)?.into_bool()
}

fn compare(lhs: Value, rhs: Value) -> Result<bool, ExprError> {
    if lhs.kind() != rhs.kind() {
        return Err(ExprError::Type {
            expected: lhs.kind(),
            found: rhs.kind(),
        });
    }
    Ok(lhs == rhs)
}

fn call(func: Func, mut args: Vec<String>) -> Value {
    // arity is checked at parse time
    let second = if args.len() > 1 { args.pop() } else { None };
    let first = args.pop().unwrap_or_default();
    let second = second.unwrap_or_default();
    match func {
        Func::HasPrefix => Value::Bool(first.starts_with(&second)),
        Func::HasSuffix => Value::Bool(first.ends_with(&second)),
        Func::Contains => Value::Bool(first.contains(&second)),
        Func::ToLower => Value::Str(first.to_lowercase()),
        Func::ToUpper => Value::Str(first.to_uppercase()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Not,
    And,
    Or,
    EqEq,
    NotEq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "string {s:?}"),
            Self::Ident(name) => write!(f, "identifier `{name}`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::Comma => f.write_str("`,`"),
            Self::Not => f.write_str("`!`"),
            Self::And => f.write_str("`&&`"),
            Self::Or => f.write_str("`||`"),
            Self::EqEq => f.write_str("`==`"),
            Self::NotEq => f.write_str("`!=`"),
        }
    }
}

fn syntax(offset: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '!' => {
                if chars.next_if(|&(_, c)| c == '=').is_some() {
                    Token::NotEq
                } else {
                    Token::Not
                }
            }
            '=' => match chars.next() {
                Some((_, '=')) => Token::EqEq,
                _ => return Err(syntax(offset, "expected `==`")),
            },
            '&' => match chars.next() {
                Some((_, '&')) => Token::And,
                _ => return Err(syntax(offset, "expected `&&`")),
            },
            '|' => match chars.next() {
                Some((_, '|')) => Token::Or,
                _ => return Err(syntax(offset, "expected `||`")),
            },
            quote @ ('"' | '\'') => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((at, '\\')) => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, escaped)) => value.push(escaped),
                            None => return Err(syntax(at, "unterminated escape")),
                        },
                        Some((_, c)) => value.push(c),
                        None => return Err(syntax(offset, "unterminated string")),
                    }
                }
                Token::Str(value)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_ascii_alphanumeric() || c == '_')
                {
                    ident.push(c);
                }
                Token::Ident(ident)
            }
            other => return Err(syntax(offset, format!("unexpected character `{other}`"))),
        };
        if tokens.len() == MAX_TOKENS {
            return Err(syntax(offset, "expression is too long"));
        }
        tokens.push((token, offset));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(tok, offset)| (tok, *offset))
    }

    fn bump(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|(tok, _)| tok == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.bump() {
            Some((tok, _)) if tok == expected => Ok(()),
            Some((tok, offset)) => Err(syntax(offset, format!("expected {expected}, found {tok}"))),
            None => Err(syntax(self.end, format!("expected {expected}"))),
        }
    }

    /// Enter one nesting level. Callers pair it with [`Parser::leave`].
    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let offset = self.peek().map_or(self.end, |(_, offset)| offset);
            return Err(syntax(offset, "expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.leave();
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.cmp()?;
        while self.eat(&Token::And) {
            let rhs = self.cmp()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat(&Token::EqEq) {
                let rhs = self.unary()?;
                lhs = Expr::Eq(Box::new(lhs), Box::new(rhs));
            } else if self.eat(&Token::NotEq) {
                let rhs = self.unary()?;
                lhs = Expr::Ne(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let inner = self.unary()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Some((Token::Str(value), _)) => Ok(Expr::Literal(Value::Str(value))),
            Some((Token::LParen, _)) => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some((Token::Ident(name), _)) if name == "true" => Ok(Expr::Literal(Value::Bool(true))),
            Some((Token::Ident(name), _)) if name == "false" => {
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Some((Token::Ident(name), _)) => {
                if self.eat(&Token::LParen) {
                    self.call(name)
                } else {
                    Var::lookup(&name)
                        .map(|var| Expr::Var(VarRef(var)))
                        .ok_or(ExprError::UnknownVariable(name))
                }
            }
            Some((tok, offset)) => Err(syntax(offset, format!("unexpected {tok}"))),
            None => Err(syntax(self.end, "unexpected end of expression")),
        }
    }

    /// Parse call arguments after the opening parenthesis.
    fn call(&mut self, name: String) -> Result<Expr, ExprError> {
        let func = Func::lookup(&name).ok_or(ExprError::UnknownFunction(name))?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen)?;
                break;
            }
        }

        if args.len() != func.arity() {
            return Err(ExprError::Arity {
                name: func.name(),
                expected: func.arity(),
                found: args.len(),
            });
        }
        Ok(Expr::Call(CallRef(func), args))
    }
}
