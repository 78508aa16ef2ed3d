//! Parsing of `.tpl` template source.
//!
//! `{{ expr }}` outputs escaped, `{{! expr }}` outputs raw, `{# .. #}`
//! is a comment and `{% .. %}` holds a statement. A single line break
//! directly following a statement tag or comment is dropped, so that
//! statements on lines of their own don't leave empty lines behind.

use serde_json::{Number, Value};

use crate::template::error::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Variable name followed by field names or list indices.
    Path(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Not(Box<Expr>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output { expr: Expr, raw: bool, line: usize },
    /// A bare expression in a statement tag, e.g. a helper call.
    Statement { expr: Expr, line: usize },
    Layout { file: Expr, line: usize },
    SlotStart { name: Expr, line: usize },
    SlotEnd { line: usize },
    If { branches: Vec<(Expr, Vec<Node>)>, otherwise: Vec<Node>, line: usize },
    For { key: Option<String>, var: String, iterable: Expr, body: Vec<Node>, line: usize },
    Set { name: String, expr: Expr, line: usize },
    Component { name: Expr, data: Option<Expr>, line: usize },
    Partial { name: Expr, data: Option<Expr>, line: usize },
}

fn syntax_error(template: &str, line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        template: template.to_string(),
        line,
        message: message.into(),
    }
}

/// Parse template source; `template` names it in error messages.
pub fn parse(src: &str, template: &str) -> Result<Vec<Node>, TemplateError> {
    let pieces = split_pieces(src, template)?;
    let mut parser = NodeParser { pieces: &pieces, pos: 0, template };
    let (nodes, _) = parser.parse_block(&[])?;
    Ok(nodes)
}

// ------------------------------------------------------------------
// Splitting into text and tags

#[derive(Debug)]
enum Piece<'s> {
    Text(&'s str),
    Output { src: &'s str, raw: bool, line: usize },
    Tag { src: &'s str, line: usize },
}

fn find_open(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while let Some(j) = s[i..].find('{') {
        let k = i + j;
        match bytes.get(k + 1) {
            Some(b'{') | Some(b'%') | Some(b'#') => return Some(k),
            _ => i = k + 1,
        }
    }
    None
}

/// Position of `close` in a tag body. Expression tags may contain
/// `}` in string literals and map literals, those don't count.
fn find_close(s: &str, close: &str) -> Option<usize> {
    if close == "#}" {
        return s.find(close)
    }
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                _ if depth == 0 && bytes[i..].starts_with(close.as_bytes()) => return Some(i),
                _ => (),
            },
        }
        i += 1;
    }
    None
}

fn skip_line_break(s: &str) -> &str {
    if let Some(r) = s.strip_prefix("\r\n") {
        r
    } else if let Some(r) = s.strip_prefix('\n') {
        r
    } else {
        s
    }
}

fn split_pieces<'s>(src: &'s str, template: &str) -> Result<Vec<Piece<'s>>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = src;
    let mut line = 1;
    while let Some(i) = find_open(rest) {
        let (text, tagged) = rest.split_at(i);
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        line += text.matches('\n').count();
        let open = &tagged[..2];
        let close = match open {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let end = find_close(&tagged[2..], close).ok_or_else(
            || syntax_error(template, line, format!("unclosed {open:?}")))?;
        let inner = &tagged[2..2 + end];
        let after = &tagged[2 + end + 2..];
        let tagline = line;
        line += inner.matches('\n').count();
        match open {
            "{{" => {
                let (raw, inner) = match inner.strip_prefix('!') {
                    Some(s) => (true, s),
                    None => (false, inner),
                };
                pieces.push(Piece::Output { src: inner.trim(), raw, line: tagline });
                rest = after;
            }
            "{%" => {
                pieces.push(Piece::Tag { src: inner.trim(), line: tagline });
                rest = skip_line_break(after);
                if rest.len() != after.len() {
                    line += 1;
                }
            }
            _ => {
                rest = skip_line_break(after);
                if rest.len() != after.len() {
                    line += 1;
                }
            }
        }
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

// ------------------------------------------------------------------
// Statements and blocks

struct NodeParser<'p, 's> {
    pieces: &'p [Piece<'s>],
    pos: usize,
    template: &'p str,
}

struct Terminator<'s> {
    keyword: &'s str,
    rest: &'s str,
    line: usize,
}

fn split_keyword(src: &str) -> (&str, &str) {
    match src.find(char::is_whitespace) {
        Some(i) => (&src[..i], src[i..].trim()),
        None => (src, ""),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' =>
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

impl<'p, 's> NodeParser<'p, 's> {
    fn err(&self, line: usize, message: impl Into<String>) -> TemplateError {
        syntax_error(self.template, line, message)
    }

    fn expr(&self, src: &str, line: usize) -> Result<Expr, TemplateError> {
        let mut p = ExprParser::new(src, self.template, line)?;
        let e = p.expr()?;
        p.finish()?;
        Ok(e)
    }

    /// `expr` optionally followed by `with expr`.
    fn expr_with(&self, src: &str, line: usize) -> Result<(Expr, Option<Expr>), TemplateError> {
        let mut p = ExprParser::new(src, self.template, line)?;
        let e = p.expr()?;
        let data = if p.eat_ident("with") {
            Some(p.expr()?)
        } else {
            None
        };
        p.finish()?;
        Ok((e, data))
    }

    /// Parse nodes until one of `terminators` (or the end of input if
    /// there are none).
    fn parse_block(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<Node>, Option<Terminator<'s>>), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.get(self.pos) {
            self.pos += 1;
            match *piece {
                Piece::Text(s) => nodes.push(Node::Text(s.to_string())),
                Piece::Output { src, raw, line } => nodes.push(Node::Output {
                    expr: self.expr(src, line)?,
                    raw,
                    line,
                }),
                Piece::Tag { src, line } => {
                    let (keyword, rest) = split_keyword(src);
                    if terminators.contains(&keyword) {
                        return Ok((nodes, Some(Terminator { keyword, rest, line })))
                    }
                    nodes.push(self.statement(src, keyword, rest, line)?);
                }
            }
        }
        if let Some(last) = terminators.last() {
            let line = match self.pieces.last() {
                Some(Piece::Tag { line, .. }) | Some(Piece::Output { line, .. }) => *line,
                _ => 1,
            };
            return Err(self.err(line, format!("missing {last:?}")))
        }
        Ok((nodes, None))
    }

    fn statement(
        &mut self,
        src: &'s str,
        keyword: &'s str,
        rest: &'s str,
        line: usize,
    ) -> Result<Node, TemplateError> {
        Ok(match keyword {
            "layout" => Node::Layout { file: self.expr(rest, line)?, line },
            "slot" => Node::SlotStart { name: self.expr(rest, line)?, line },
            "endslot" => {
                if !rest.is_empty() {
                    return Err(self.err(line, "endslot takes no arguments"))
                }
                Node::SlotEnd { line }
            }
            "if" => self.parse_if(rest, line)?,
            "for" => self.parse_for(rest, line)?,
            "set" => {
                let (name, value) = rest.split_once('=').ok_or_else(
                    || self.err(line, "expecting `set name = expr`"))?;
                let name = name.trim();
                if !is_identifier(name) {
                    return Err(self.err(line, format!("invalid variable name {name:?}")))
                }
                Node::Set { name: name.to_string(), expr: self.expr(value, line)?, line }
            }
            "component" => {
                let (name, data) = self.expr_with(rest, line)?;
                Node::Component { name, data, line }
            }
            "partial" => {
                let (name, data) = self.expr_with(rest, line)?;
                Node::Partial { name, data, line }
            }
            "elif" | "else" | "endif" | "endfor" =>
                return Err(self.err(line, format!("unexpected {keyword:?}"))),
            _ => Node::Statement { expr: self.expr(src, line)?, line },
        })
    }

    fn parse_if(&mut self, cond: &str, line: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = self.expr(cond, line)?;
        let mut otherwise = Vec::new();
        loop {
            let (body, term) = self.parse_block(&["elif", "else", "endif"])?;
            let term = term.ok_or_else(|| self.err(line, "missing \"endif\""))?;
            branches.push((cond, body));
            match term.keyword {
                "elif" => {
                    cond = self.expr(term.rest, term.line)?;
                }
                "else" => {
                    let (body, _) = self.parse_block(&["endif"])?;
                    otherwise = body;
                    break
                }
                _ => break,
            }
        }
        Ok(Node::If { branches, otherwise, line })
    }

    fn parse_for(&mut self, src: &str, line: usize) -> Result<Node, TemplateError> {
        let (vars, iterable) = src.split_once(" in ").ok_or_else(
            || self.err(line, "expecting `for x in expr` or `for k, v in expr`"))?;
        let vars: Vec<&str> = vars.split(',').map(str::trim).collect();
        for v in &vars {
            if !is_identifier(v) {
                return Err(self.err(line, format!("invalid loop variable {v:?}")))
            }
        }
        let (key, var) = match vars.as_slice() {
            [var] => (None, var.to_string()),
            [key, var] => (Some(key.to_string()), var.to_string()),
            _ => return Err(self.err(line, "too many loop variables")),
        };
        let iterable = self.expr(iterable, line)?;
        let (body, _) = self.parse_block(&["endfor"])?;
        Ok(Node::For { key, var, iterable, body, line })
    }
}

// ------------------------------------------------------------------
// Expressions

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Str(String),
    Int(i64),
    Float(f64),
    Ident(String),
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Pipe,
    EqEq,
    NotEq,
    Bang,
}

fn tokenize(src: &str, template: &str, line: usize) -> Result<Vec<Tok>, TemplateError> {
    let err = |message: String| syntax_error(template, line, message);
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => { i += 1; }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string literal".into())),
                        Some(&ch) if ch == quote => { i += 1; break }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or_else(
                                || err("unterminated string literal".into()))?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => { s.push(ch); i += 1; }
                    }
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                // After a dot this is a list index, never a fraction.
                let after_dot = toks.last() == Some(&Tok::Dot);
                let is_float = !after_dot
                    && chars.get(i) == Some(&'.')
                    && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit());
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let s: String = chars[start..i].iter().collect();
                    toks.push(Tok::Float(s.parse().map_err(
                        |_| err(format!("invalid number {s:?}")))?));
                } else {
                    let s: String = chars[start..i].iter().collect();
                    toks.push(Tok::Int(s.parse().map_err(
                        |_| err(format!("invalid number {s:?}")))?));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            '=' if chars.get(i + 1) == Some(&'=') => { toks.push(Tok::EqEq); i += 2; }
            '!' if chars.get(i + 1) == Some(&'=') => { toks.push(Tok::NotEq); i += 2; }
            '!' => { toks.push(Tok::Bang); i += 1; }
            '.' => { toks.push(Tok::Dot); i += 1; }
            ',' => { toks.push(Tok::Comma); i += 1; }
            ':' => { toks.push(Tok::Colon); i += 1; }
            '(' => { toks.push(Tok::LParen); i += 1; }
            ')' => { toks.push(Tok::RParen); i += 1; }
            '[' => { toks.push(Tok::LBracket); i += 1; }
            ']' => { toks.push(Tok::RBracket); i += 1; }
            '{' => { toks.push(Tok::LBrace); i += 1; }
            '}' => { toks.push(Tok::RBrace); i += 1; }
            '|' => { toks.push(Tok::Pipe); i += 1; }
            _ => return Err(err(format!("unexpected character {c:?}"))),
        }
    }
    Ok(toks)
}

struct ExprParser<'t> {
    toks: Vec<Tok>,
    pos: usize,
    template: &'t str,
    line: usize,
}

impl<'t> ExprParser<'t> {
    fn new(src: &str, template: &'t str, line: usize) -> Result<Self, TemplateError> {
        Ok(ExprParser {
            toks: tokenize(src, template, line)?,
            pos: 0,
            template,
            line,
        })
    }

    fn err(&self, message: impl Into<String>) -> TemplateError {
        syntax_error(self.template, self.line, message)
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        match self.peek() {
            Some(Tok::Ident(s)) if s == name => {
                self.pos += 1;
                true
            }
            _ => false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), TemplateError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.err(format!("expecting {tok:?}, got {:?}", self.peek())))
        }
    }

    fn finish(&self) -> Result<(), TemplateError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.err(format!("unexpected {t:?} after expression"))),
        }
    }

    fn expr(&mut self) -> Result<Expr, TemplateError> {
        if self.peek().is_none() {
            return Err(self.err("missing expression"))
        }
        self.or()
    }

    fn or(&mut self) -> Result<Expr, TemplateError> {
        let mut lhs = self.and()?;
        while self.eat_ident("or") {
            let rhs = self.and()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, TemplateError> {
        let mut lhs = self.not()?;
        while self.eat_ident("and") {
            let rhs = self.not()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, TemplateError> {
        if self.eat_ident("not") || self.eat(&Tok::Bang) {
            Ok(Expr::Not(Box::new(self.not()?)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Expr, TemplateError> {
        let lhs = self.filtered()?;
        let op = if self.eat(&Tok::EqEq) {
            BinOp::Eq
        } else if self.eat(&Tok::NotEq) {
            BinOp::Ne
        } else {
            return Ok(lhs)
        };
        let rhs = self.filtered()?;
        Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn filtered(&mut self) -> Result<Expr, TemplateError> {
        let mut e = self.primary()?;
        while self.eat(&Tok::Pipe) {
            let name = match self.next() {
                Some(Tok::Ident(name)) => name,
                t => return Err(self.err(format!("expecting filter name, got {t:?}"))),
            };
            let mut args = vec![e];
            if self.eat(&Tok::LParen) {
                args.extend(self.list_until(&Tok::RParen)?);
            }
            e = Expr::Call { name, args };
        }
        Ok(e)
    }

    fn list_until(&mut self, close: &Tok) -> Result<Vec<Expr>, TemplateError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items)
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items)
            }
            self.expect(&Tok::Comma)?;
            // trailing comma
            if self.eat(close) {
                return Ok(items)
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, TemplateError> {
        match self.next() {
            None => Err(self.err("unexpected end of expression")),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Int(i)) => Ok(Expr::Literal(Value::Number(i.into()))),
            Some(Tok::Float(f)) => Ok(Expr::Literal(
                Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))),
            Some(Tok::LParen) => {
                let e = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(e)
            }
            Some(Tok::LBracket) => Ok(Expr::List(self.list_until(&Tok::RBracket)?)),
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                if self.eat(&Tok::RBrace) {
                    return Ok(Expr::Map(entries))
                }
                loop {
                    let key = match self.next() {
                        Some(Tok::Ident(k)) | Some(Tok::Str(k)) => k,
                        t => return Err(self.err(format!("expecting map key, got {t:?}"))),
                    };
                    self.expect(&Tok::Colon)?;
                    entries.push((key, self.expr()?));
                    if self.eat(&Tok::RBrace) {
                        break
                    }
                    self.expect(&Tok::Comma)?;
                    if self.eat(&Tok::RBrace) {
                        break
                    }
                }
                Ok(Expr::Map(entries))
            }
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if self.eat(&Tok::LParen) {
                        let args = self.list_until(&Tok::RParen)?;
                        return Ok(Expr::Call { name, args })
                    }
                    let mut path = vec![name];
                    while self.eat(&Tok::Dot) {
                        match self.next() {
                            Some(Tok::Ident(field)) => path.push(field),
                            Some(Tok::Int(i)) if i >= 0 => path.push(i.to_string()),
                            t => return Err(self.err(
                                format!("expecting field name or index, got {t:?}"))),
                        }
                    }
                    Ok(Expr::Path(path))
                }
            },
            Some(t) => Err(self.err(format!("unexpected {t:?}"))),
        }
    }
}
