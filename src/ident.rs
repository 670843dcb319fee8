//! Identifier text: canonical namespace keys for instantiations, and a small
//! parser turning text such as `Data2<u16, floor(7 / sizeof(u16))>` into
//! type references.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{Expr, PathSegment, Token, TypeKind, TypeRef};
use crate::error::{CompileError, CompileResult};
use crate::expr::{self, Bindings, Constant, NoTypes, Operand};

// ————————————————————————————————————————————————————————————————————————————
// CANONICAL KEYS
// ————————————————————————————————————————————————————————————————————————————

/// `name<arg, …>`, or `None` when an argument holds an anonymous inline
/// type (such instantiations are never deduplicated).
pub fn key(name: &str, args: &[Operand]) -> Option<String> {
    if args.is_empty() {
        return Some(name.to_string());
    }
    let parts = args.iter().map(operand_text).collect::<Option<Vec<_>>>()?;
    Some(format!("{name}<{}>", parts.join(", ")))
}

fn operand_text(op: &Operand) -> Option<String> {
    match op {
        Operand::Const(c) => Some(constant_text(c)),
        Operand::Type(r) => ref_text(r),
    }
}

pub fn constant_text(c: &Constant) -> String {
    match c {
        Constant::Number(n) if n.0.is_finite() && n.0.fract() == 0.0 && n.0.abs() < 9.0e15 => {
            format!("{}", n.0 as i64)
        }
        Constant::Number(n) => format!("{}", n.0),
        Constant::Str(s) => serde_json::Value::from(s.as_str()).to_string(),
    }
}

/// Canonical text of a reference; `None` if it contains an inline body.
pub fn ref_text(r: &TypeRef) -> Option<String> {
    let body = match &r.kind {
        TypeKind::Named { name, generics } => segment_text(name, generics.as_deref())?,
        TypeKind::Param { name } => name.clone(),
        TypeKind::Inline { .. } => return None,
        TypeKind::Array { element, size } => {
            format!("[{}; {}]", ref_text(element)?, expr_text(size)?)
        }
        TypeKind::Path { segments } => segments
            .iter()
            .map(|s| segment_text(&s.name, s.generics.as_deref()))
            .collect::<Option<Vec<_>>>()?
            .join("."),
    };
    Some(if r.nullable { format!("?{body}") } else { body })
}

/// Human-readable text of a reference, for diagnostics.
pub fn describe(r: &TypeRef) -> String {
    ref_text(r).unwrap_or_else(|| if r.nullable { "?{…}".into() } else { "{…}".into() })
}

fn segment_text(name: &str, generics: Option<&[Expr]>) -> Option<String> {
    match generics {
        None => Some(name.to_string()),
        Some(args) => {
            let parts = args.iter().map(expr_text).collect::<Option<Vec<_>>>()?;
            Some(format!("{name}<{}>", parts.join(", ")))
        }
    }
}

fn expr_text(e: &Expr) -> Option<String> {
    // constant-fold what needs no type information
    if let Ok(Operand::Const(c)) = expr::evaluate(e, &Bindings::new(), &mut NoTypes) {
        return Some(constant_text(&c));
    }
    if let [single] = e.0.as_slice() {
        return token_text(single);
    }
    let parts = e.0.iter().map(token_text).collect::<Option<Vec<_>>>()?;
    Some(format!("({})", parts.join(" ")))
}

fn token_text(t: &Token) -> Option<String> {
    match t {
        Token::Number(n) => Some(constant_text(&Constant::Number((*n).into()))),
        Token::Str(s) => Some(constant_text(&Constant::Str(s.clone()))),
        Token::Type(r) => ref_text(r),
        Token::Param(p) | Token::Op(p) => Some(p.clone()),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// LEXER
// ————————————————————————————————————————————————————————————————————————————

static LEXEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<hex>0[xX][0-9a-fA-F]+)",
        r"|(?P<num>[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?)",
        r#"|(?P<str>"(?:[^"\\]|\\.)*")"#,
        r"|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)",
        r"|(?P<punct>[<>,.;?()\[\]*/+%-]))",
    ))
    .expect("lexeme pattern")
});

const FUNCTIONS: [&str; 6] = ["floor", "round", "ceil", "min", "max", "sizeof"];

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(char),
}

fn lex(text: &str) -> CompileResult<Vec<Lexeme>> {
    let mut out = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let caps = LEXEME
            .captures(rest)
            .ok_or_else(|| syntax(text, format!("unexpected input at {rest:?}")))?;
        if let Some(m) = caps.name("hex") {
            let n = u64::from_str_radix(&m.as_str()[2..], 16)
                .map_err(|e| syntax(text, e.to_string()))?;
            out.push(Lexeme::Num(n as f64));
        } else if let Some(m) = caps.name("num") {
            let n = m.as_str().parse().map_err(|_| syntax(text, "bad number".into()))?;
            out.push(Lexeme::Num(n));
        } else if let Some(m) = caps.name("str") {
            let s: String =
                serde_json::from_str(m.as_str()).map_err(|e| syntax(text, e.to_string()))?;
            out.push(Lexeme::Str(s));
        } else if let Some(m) = caps.name("ident") {
            out.push(Lexeme::Ident(m.as_str().to_string()));
        } else if let Some(c) = caps.name("punct").and_then(|m| m.as_str().chars().next()) {
            out.push(Lexeme::Punct(c));
        }
        let used = caps.get(0).map_or(rest.len(), |m| m.end());
        rest = rest[used..].trim_start();
    }
    Ok(out)
}

fn syntax(text: &str, message: String) -> CompileError {
    CompileError::Syntax { text: text.to_string(), message }
}

// ————————————————————————————————————————————————————————————————————————————
// PARSER
// ————————————————————————————————————————————————————————————————————————————

struct Parser<'a> {
    text: &'a str,
    lexemes: Vec<Lexeme>,
    pos: usize,
    params: &'a [&'a str],
}

pub fn parse_type(text: &str, params: &[&str]) -> CompileResult<TypeRef> {
    let mut p = Parser { text, lexemes: lex(text)?, pos: 0, params };
    let r = p.ty()?;
    p.finish()?;
    Ok(r)
}

pub fn parse_expr(text: &str, params: &[&str]) -> CompileResult<Expr> {
    let mut p = Parser { text, lexemes: lex(text)?, pos: 0, params };
    let mut out = Vec::new();
    p.expr(&mut out)?;
    p.finish()?;
    Ok(Expr(out))
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn peek_punct(&self, c: char) -> bool {
        self.peek() == Some(&Lexeme::Punct(c))
    }

    fn eat(&mut self, c: char) -> bool {
        let hit = self.peek_punct(c);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect(&mut self, c: char) -> CompileResult<()> {
        if self.eat(c) { Ok(()) } else { Err(self.error(format!("expected '{c}'"))) }
    }

    fn finish(&self) -> CompileResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(l) => Err(self.error(format!("unexpected trailing {l:?}"))),
        }
    }

    fn error(&self, message: String) -> CompileError {
        syntax(self.text, message)
    }

    fn ident(&mut self) -> CompileResult<String> {
        match self.lexemes.get(self.pos) {
            Some(Lexeme::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, found {other:?}"))),
        }
    }

    fn ty(&mut self) -> CompileResult<TypeRef> {
        if self.eat('?') {
            return Ok(self.ty()?.nullable());
        }
        if self.eat('[') {
            let element = self.ty()?;
            self.expect(';')?;
            let mut size = Vec::new();
            self.expr(&mut size)?;
            self.expect(']')?;
            return Ok(TypeRef::array(element, Expr(size)));
        }
        let name = self.ident()?;
        if name == "Option" && self.eat('<') {
            let inner = self.ty()?;
            self.expect('>')?;
            return Ok(inner.nullable());
        }
        if self.params.contains(&name.as_str()) && !self.peek_punct('<') && !self.peek_punct('.') {
            return Ok(TypeRef::param(name));
        }
        let mut segments = vec![self.segment(name)?];
        while self.eat('.') {
            let name = self.ident()?;
            segments.push(self.segment(name)?);
        }
        Ok(match segments.len() {
            1 => {
                let PathSegment { name, generics } = segments.remove(0);
                TypeRef::from(TypeKind::Named { name, generics })
            }
            _ => TypeRef::from(TypeKind::Path { segments }),
        })
    }

    fn segment(&mut self, name: String) -> CompileResult<PathSegment> {
        if !self.eat('<') {
            return Ok(PathSegment { name, generics: None });
        }
        let mut args = Vec::new();
        loop {
            let mut tokens = Vec::new();
            self.expr(&mut tokens)?;
            args.push(Expr(tokens));
            if self.eat('>') {
                break;
            }
            self.expect(',')?;
        }
        Ok(PathSegment { name, generics: Some(args) })
    }

    fn expr(&mut self, out: &mut Vec<Token>) -> CompileResult<()> {
        self.term(out)?;
        loop {
            let op = if self.eat('+') {
                "+"
            } else if self.eat('-') {
                "-"
            } else {
                return Ok(());
            };
            self.term(out)?;
            out.push(Token::Op(op.into()));
        }
    }

    fn term(&mut self, out: &mut Vec<Token>) -> CompileResult<()> {
        self.unary(out)?;
        loop {
            let op = if self.eat('*') {
                "*"
            } else if self.eat('/') {
                "/"
            } else if self.eat('%') {
                "%"
            } else {
                return Ok(());
            };
            self.unary(out)?;
            out.push(Token::Op(op.into()));
        }
    }

    fn unary(&mut self, out: &mut Vec<Token>) -> CompileResult<()> {
        match self.peek().cloned() {
            Some(Lexeme::Num(n)) => {
                self.pos += 1;
                out.push(Token::Number(n));
            }
            Some(Lexeme::Str(s)) => {
                self.pos += 1;
                out.push(Token::Str(s));
            }
            Some(Lexeme::Punct('(')) => {
                self.pos += 1;
                self.expr(out)?;
                self.expect(')')?;
            }
            Some(Lexeme::Punct('-')) => {
                self.pos += 1;
                out.push(Token::Number(0.0));
                self.unary(out)?;
                out.push(Token::Op("-".into()));
            }
            Some(Lexeme::Ident(name))
                if FUNCTIONS.contains(&name.as_str())
                    && self.lexemes.get(self.pos + 1) == Some(&Lexeme::Punct('(')) =>
            {
                self.pos += 2;
                loop {
                    self.expr(out)?;
                    if self.eat(')') {
                        break;
                    }
                    self.expect(',')?;
                }
                out.push(Token::Op(name));
            }
            _ => {
                let r = self.ty()?;
                match r.kind {
                    TypeKind::Param { name } if !r.nullable => out.push(Token::Param(name)),
                    _ => out.push(Token::Type(r)),
                }
            }
        }
        Ok(())
    }
}
