// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Template tokenizer and parser

use serde_json::Value;

use super::RenderError;

/// Template body node
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    For {
        targets: Vec<String>,
        iter: Expr,
        body: Vec<Node>,
        otherwise: Option<Vec<Node>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Filter {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    Comma,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug)]
enum Segment {
    Text(String),
    Output { tokens: Vec<Tok>, line: usize },
    Block { tokens: Vec<Tok>, line: usize },
}

pub(crate) fn parse(source: &str) -> Result<Vec<Node>, RenderError> {
    let segments = scan(source)?;
    let mut parser = BodyParser {
        segments: segments.into_iter(),
        line: 1,
    };
    let (nodes, _) = parser.body(&[])?;
    Ok(nodes)
}

fn syntax(line: usize, message: impl Into<String>) -> RenderError {
    RenderError::Syntax {
        line,
        message: message.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanning
// ─────────────────────────────────────────────────────────────────────────────

fn scan(source: &str) -> Result<Vec<Segment>, RenderError> {
    let chars: Vec<char> = source.chars().collect();
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut line = 1;
    let mut trim_next = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        let opener = match (c, next) {
            ('{', Some(kind @ ('{' | '%' | '#'))) => Some(kind),
            _ => None,
        };
        let Some(kind) = opener else {
            if trim_next && c.is_whitespace() {
                if c == '\n' {
                    line += 1;
                }
                i += 1;
                continue;
            }
            trim_next = false;
            if c == '\n' {
                line += 1;
            }
            text.push(c);
            i += 1;
            continue;
        };
        trim_next = false;

        let start_line = line;
        i += 2;
        if chars.get(i) == Some(&'-') {
            text.truncate(text.trim_end().len());
            i += 1;
        }
        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut text)));
        }

        if kind == '#' {
            loop {
                match (chars.get(i), chars.get(i + 1)) {
                    (Some('#'), Some('}')) => break,
                    (Some(ch), _) => {
                        if *ch == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                    (None, _) => return Err(syntax(start_line, "missing end of comment tag")),
                }
            }
            if i > 0 && chars.get(i - 1) == Some(&'-') {
                trim_next = true;
            }
            i += 2;
            continue;
        }

        let closer = if kind == '{' { '}' } else { '%' };
        let (tokens, consumed, trim, newlines) = scan_tag(&chars[i..], closer, start_line)?;
        i += consumed;
        line += newlines;
        trim_next = trim;

        segments.push(if kind == '{' {
            Segment::Output {
                tokens,
                line: start_line,
            }
        } else {
            Segment::Block {
                tokens,
                line: start_line,
            }
        });
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

/// Tokenize the inside of a tag up to and including its closer
/// (`}}` or `%}`). Returns tokens, chars consumed, whether a `-` trim marker
/// preceded the closer, and the number of newlines crossed.
fn scan_tag(
    chars: &[char],
    closer: char,
    line: usize,
) -> Result<(Vec<Tok>, usize, bool, usize), RenderError> {
    let mut tokens = Vec::new();
    let mut newlines = 0;
    let mut i = 0;

    loop {
        let Some(&c) = chars.get(i) else {
            let what = if closer == '}' { "variable" } else { "block" };
            return Err(syntax(line, format!("unexpected end of template inside {} tag", what)));
        };
        let next = chars.get(i + 1).copied();

        if c == '-' && next == Some(closer) && chars.get(i + 2) == Some(&'}') {
            return Ok((tokens, i + 3, true, newlines));
        }
        if c == closer && next == Some('}') {
            return Ok((tokens, i + 2, false, newlines));
        }

        if c.is_whitespace() {
            if c == '\n' {
                newlines += 1;
            }
            i += 1;
            continue;
        }

        let (token, len) = match c {
            '.' => (Tok::Dot, 1),
            ',' => (Tok::Comma, 1),
            '|' => (Tok::Pipe, 1),
            '(' => (Tok::LParen, 1),
            ')' => (Tok::RParen, 1),
            '[' => (Tok::LBracket, 1),
            ']' => (Tok::RBracket, 1),
            '=' if next == Some('=') => (Tok::Eq, 2),
            '!' if next == Some('=') => (Tok::Ne, 2),
            '<' if next == Some('=') => (Tok::Le, 2),
            '<' => (Tok::Lt, 1),
            '>' if next == Some('=') => (Tok::Ge, 2),
            '>' => (Tok::Gt, 1),
            '"' | '\'' => {
                let mut j = i + 1;
                let mut text = String::new();
                loop {
                    match chars.get(j) {
                        None => return Err(syntax(line + newlines, "unterminated string")),
                        Some(&ch) if ch == c => break,
                        Some('\\') => {
                            let escaped = match chars.get(j + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some(&other) => other,
                                None => return Err(syntax(line + newlines, "unterminated string")),
                            };
                            text.push(escaped);
                            j += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                (Tok::Str(text), j - i + 1)
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while chars.get(j).is_some_and(|ch| ch.is_ascii_digit()) {
                    j += 1;
                }
                let is_float = chars.get(j) == Some(&'.')
                    && chars.get(j + 1).is_some_and(|ch| ch.is_ascii_digit());
                if is_float {
                    j += 1;
                    while chars.get(j).is_some_and(|ch| ch.is_ascii_digit()) {
                        j += 1;
                    }
                }
                let text: String = chars[i..j].iter().collect();
                let token = if is_float {
                    Tok::Float(text.parse().map_err(|_| {
                        syntax(line + newlines, format!("invalid number '{}'", text))
                    })?)
                } else {
                    Tok::Int(text.parse().map_err(|_| {
                        syntax(line + newlines, format!("invalid number '{}'", text))
                    })?)
                };
                (token, j - i)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while chars
                    .get(j)
                    .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_')
                {
                    j += 1;
                }
                (Tok::Name(chars[i..j].iter().collect()), j - i)
            }
            other => {
                return Err(syntax(
                    line + newlines,
                    format!("unexpected char '{}'", other),
                ))
            }
        };

        tokens.push(token);
        i += len;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Body parsing
// ─────────────────────────────────────────────────────────────────────────────

/// A block tag that ended a body
struct EndTag {
    keyword: String,
    rest: Vec<Tok>,
    line: usize,
}

struct BodyParser {
    segments: std::vec::IntoIter<Segment>,
    /// Line of the last tag seen, for end-of-input errors
    line: usize,
}

impl BodyParser {
    /// Parse nodes until one of `ends` (or the end of input when `ends` is
    /// empty)
    fn body(&mut self, ends: &[&str]) -> Result<(Vec<Node>, Option<EndTag>), RenderError> {
        let mut nodes = Vec::new();

        while let Some(segment) = self.segments.next() {
            match segment {
                Segment::Text(text) => nodes.push(Node::Text(text)),
                Segment::Output { tokens, line } => {
                    self.line = line;
                    if tokens.is_empty() {
                        return Err(syntax(line, "expected an expression, got end of tag"));
                    }
                    nodes.push(Node::Output(parse_expr(tokens, line)?));
                }
                Segment::Block { tokens, line } => {
                    self.line = line;
                    let mut tokens = tokens.into_iter();
                    let keyword = match tokens.next() {
                        Some(Tok::Name(keyword)) => keyword,
                        _ => return Err(syntax(line, "tag name expected")),
                    };
                    let rest: Vec<Tok> = tokens.collect();

                    if ends.contains(&keyword.as_str()) {
                        return Ok((nodes, Some(EndTag { keyword, rest, line })));
                    }
                    match keyword.as_str() {
                        "if" => nodes.push(self.if_block(rest, line)?),
                        "for" => nodes.push(self.for_block(rest, line)?),
                        other => {
                            let message = if ends.is_empty() {
                                format!("encountered unknown tag '{}'", other)
                            } else {
                                format!(
                                    "encountered unknown tag '{}', expected one of {}",
                                    other,
                                    quoted_list(ends)
                                )
                            };
                            return Err(syntax(line, message));
                        }
                    }
                }
            }
        }

        if ends.is_empty() {
            Ok((nodes, None))
        } else {
            Err(syntax(
                self.line,
                format!("unexpected end of template, expected one of {}", quoted_list(ends)),
            ))
        }
    }

    fn if_block(&mut self, condition: Vec<Tok>, line: usize) -> Result<Node, RenderError> {
        let mut branches = Vec::new();
        let mut test = parse_expr(condition, line)?;
        let mut otherwise = None;

        loop {
            let (body, end) = self.body(&["elif", "else", "endif"])?;
            branches.push((test, body));
            let Some(end) = end else { break };
            match end.keyword.as_str() {
                "elif" => test = parse_expr(end.rest, end.line)?,
                "else" => {
                    expect_empty(&end)?;
                    let (body, _) = self.body(&["endif"])?;
                    otherwise = Some(body);
                    break;
                }
                _ => {
                    expect_empty(&end)?;
                    break;
                }
            }
        }

        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn for_block(&mut self, header: Vec<Tok>, line: usize) -> Result<Node, RenderError> {
        let in_at = header
            .iter()
            .position(|t| matches!(t, Tok::Name(n) if n == "in"))
            .ok_or_else(|| syntax(line, "expected 'in' in for loop"))?;

        let mut targets = Vec::new();
        for (i, token) in header[..in_at].iter().enumerate() {
            match (i % 2, token) {
                (0, Tok::Name(name)) => targets.push(name.clone()),
                (1, Tok::Comma) => {}
                _ => return Err(syntax(line, "invalid for loop target")),
            }
        }
        if targets.is_empty() {
            return Err(syntax(line, "for loop needs a target name"));
        }

        let iter = parse_expr(header[in_at + 1..].to_vec(), line)?;
        let (body, end) = self.body(&["else", "endfor"])?;
        let mut otherwise = None;
        if let Some(end) = end {
            expect_empty(&end)?;
            if end.keyword == "else" {
                let (alt, _) = self.body(&["endfor"])?;
                otherwise = Some(alt);
            }
        }

        Ok(Node::For {
            targets,
            iter,
            body,
            otherwise,
        })
    }
}

fn expect_empty(end: &EndTag) -> Result<(), RenderError> {
    if end.rest.is_empty() {
        Ok(())
    } else {
        Err(syntax(
            end.line,
            format!("unexpected tokens after '{}'", end.keyword),
        ))
    }
}

fn quoted_list(items: &[&str]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Expression parsing
// ─────────────────────────────────────────────────────────────────────────────

fn parse_expr(tokens: Vec<Tok>, line: usize) -> Result<Expr, RenderError> {
    if tokens.is_empty() {
        return Err(syntax(line, "expected an expression"));
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        line,
    };
    let expr = parser.or()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(syntax(line, format!("unexpected token {:?}", extra)));
    }
    Ok(expr)
}

struct ExprParser {
    tokens: Vec<Tok>,
    pos: usize,
    line: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_name(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Name(n)) if n == keyword)
    }

    fn next(&mut self) -> Option<Tok> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Tok) -> Result<(), RenderError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(syntax(
                self.line,
                format!("expected {:?}, got {:?}", expected, token),
            )),
            None => Err(syntax(
                self.line,
                format!("expected {:?}, got end of tag", expected),
            )),
        }
    }

    fn or(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.and()?;
        while self.peek_name("or") {
            self.pos += 1;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.not()?;
        while self.peek_name("and") {
            self.pos += 1;
            lhs = Expr::And(Box::new(lhs), Box::new(self.not()?));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, RenderError> {
        if self.peek_name("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, RenderError> {
        let mut lhs = self.filtered()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => CmpOp::Eq,
                Some(Tok::Ne) => CmpOp::Ne,
                Some(Tok::Lt) => CmpOp::Lt,
                Some(Tok::Le) => CmpOp::Le,
                Some(Tok::Gt) => CmpOp::Gt,
                Some(Tok::Ge) => CmpOp::Ge,
                Some(Tok::Name(n)) if n == "in" => CmpOp::In,
                Some(Tok::Name(n))
                    if n == "not"
                        && matches!(self.tokens.get(self.pos + 1), Some(Tok::Name(m)) if m == "in") =>
                {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.filtered()?;
            lhs = Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn filtered(&mut self) -> Result<Expr, RenderError> {
        let mut target = self.postfix()?;
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            let name = match self.next() {
                Some(Tok::Name(name)) => name,
                _ => return Err(syntax(self.line, "expected a filter name after '|'")),
            };
            let args = if self.peek() == Some(&Tok::LParen) {
                self.pos += 1;
                self.arguments()?
            } else {
                Vec::new()
            };
            target = Expr::Filter {
                target: Box::new(target),
                name,
                args,
            };
        }
        Ok(target)
    }

    fn postfix(&mut self) -> Result<Expr, RenderError> {
        let mut target = self.primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.pos += 1;
                    let name = match self.next() {
                        Some(Tok::Name(name)) => name,
                        Some(Tok::Int(i)) => i.to_string(),
                        _ => return Err(syntax(self.line, "expected an attribute name after '.'")),
                    };
                    if self.peek() == Some(&Tok::LParen) {
                        self.pos += 1;
                        let args = self.arguments()?;
                        target = Expr::Method {
                            target: Box::new(target),
                            name,
                            args,
                        };
                    } else {
                        target = Expr::Attr(Box::new(target), name);
                    }
                }
                Some(Tok::LBracket) => {
                    self.pos += 1;
                    let key = self.or()?;
                    self.expect(Tok::RBracket)?;
                    target = Expr::Index(Box::new(target), Box::new(key));
                }
                _ => return Ok(target),
            }
        }
    }

    /// Comma-separated expressions after an opening `(`, through the `)`
    fn arguments(&mut self) -> Result<Vec<Expr>, RenderError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.or()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => return Ok(args),
                _ => return Err(syntax(self.line, "expected ',' or ')' in argument list")),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, RenderError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Int(i)) => Ok(Expr::Literal(Value::from(i))),
            Some(Tok::Float(f)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
            )),
            Some(Tok::Name(name)) => Ok(match name.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "none" | "None" => Expr::Literal(Value::Null),
                _ => Expr::Name(name),
            }),
            Some(Tok::LParen) => {
                let inner = self.or()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Tok::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.or()?);
                    match self.next() {
                        Some(Tok::Comma) => continue,
                        Some(Tok::RBracket) => return Ok(Expr::List(items)),
                        _ => return Err(syntax(self.line, "expected ',' or ']' in list")),
                    }
                }
            }
            Some(other) => Err(syntax(self.line, format!("unexpected token {:?}", other))),
            None => Err(syntax(self.line, "unexpected end of expression")),
        }
    }
}
