// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Expression tokenizer

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    /// Field name; `quoted` for backtick names, which are never keywords
    Name { name: String, quoted: bool },
    /// `$name`; `$` alone is the empty name and `$$` is `"$"`
    Var(String),
    Dot,
    DotDot,
    Comma,
    Colon,
    Semicolon,
    Question,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Name { name, .. } => format!("name '{}'", name),
            Token::Var(v) => format!("variable '${}'", v),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Dot => ".",
            Token::DotDot => "..",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Question => "?",
            Token::Assign => ":=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Amp => "&",
            Token::Eq => "=",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            _ => "?",
        }
    }
}

/// Split `source` into tokens paired with their byte offsets
pub(crate) fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // block comments
        if c == '/' && next == Some('*') {
            let mut j = i + 2;
            loop {
                match (chars.get(j), chars.get(j + 1)) {
                    (Some(&(_, '*')), Some(&(_, '/'))) => break,
                    (Some(_), _) => j += 1,
                    (None, _) => return Err(ParseError::new(pos, "unterminated comment")),
                }
            }
            i = j + 2;
            continue;
        }

        let (token, consumed) = match c {
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            ':' if next == Some('=') => (Token::Assign, 2),
            ':' => (Token::Colon, 1),
            ';' => (Token::Semicolon, 1),
            '?' => (Token::Question, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '&' => (Token::Amp, 1),
            '=' => (Token::Eq, 1),
            '!' if next == Some('=') => (Token::Ne, 2),
            '<' if next == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '"' | '\'' => {
                let (text, len) = lex_string(&chars[i..], pos)?;
                (Token::Str(text), len)
            }
            '`' => {
                let mut j = i + 1;
                let mut name = String::new();
                loop {
                    match chars.get(j) {
                        Some(&(_, '`')) => break,
                        Some(&(_, ch)) => name.push(ch),
                        None => return Err(ParseError::new(pos, "unterminated quoted name")),
                    }
                    j += 1;
                }
                (Token::Name { name, quoted: true }, j - i + 1)
            }
            '$' => {
                if next == Some('$') {
                    (Token::Var("$".to_string()), 2)
                } else {
                    let mut j = i + 1;
                    let mut name = String::new();
                    while let Some(&(_, ch)) = chars.get(j) {
                        if ch.is_alphanumeric() || ch == '_' {
                            name.push(ch);
                            j += 1;
                        } else {
                            break;
                        }
                    }
                    (Token::Var(name), j - i)
                }
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                let mut text = String::new();
                while let Some(&(_, ch)) = chars.get(j) {
                    if ch.is_ascii_digit() {
                        text.push(ch);
                        j += 1;
                    } else {
                        break;
                    }
                }
                // fraction only when a digit follows the dot, so `1..3` stays a range
                if let (Some(&(_, '.')), Some(&(_, d))) = (chars.get(j), chars.get(j + 1)) {
                    if d.is_ascii_digit() {
                        text.push('.');
                        j += 1;
                        while let Some(&(_, ch)) = chars.get(j) {
                            if ch.is_ascii_digit() {
                                text.push(ch);
                                j += 1;
                            } else {
                                break;
                            }
                        }
                    }
                }
                if let Some(&(_, 'e' | 'E')) = chars.get(j) {
                    let mut k = j + 1;
                    let mut exponent = String::from("e");
                    if let Some(&(_, sign @ ('+' | '-'))) = chars.get(k) {
                        exponent.push(sign);
                        k += 1;
                    }
                    let digits_start = k;
                    while let Some(&(_, ch)) = chars.get(k) {
                        if ch.is_ascii_digit() {
                            exponent.push(ch);
                            k += 1;
                        } else {
                            break;
                        }
                    }
                    if k > digits_start {
                        text.push_str(&exponent);
                        j = k;
                    }
                }
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::new(pos, format!("invalid number '{}'", text)))?;
                (Token::Number(value), j - i)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                let mut name = String::new();
                while let Some(&(_, ch)) = chars.get(j) {
                    if ch.is_alphanumeric() || ch == '_' {
                        name.push(ch);
                        j += 1;
                    } else {
                        break;
                    }
                }
                (Token::Name { name, quoted: false }, j - i)
            }
            other => {
                return Err(ParseError::new(pos, format!("unexpected character '{}'", other)));
            }
        };

        tokens.push((token, pos));
        i += consumed;
    }

    Ok(tokens)
}

/// Lex a quoted string starting at `chars[0]`; returns the text and the number
/// of chars consumed including both quotes
fn lex_string(chars: &[(usize, char)], pos: usize) -> Result<(String, usize), ParseError> {
    let quote = chars[0].1;
    let mut text = String::new();
    let mut j = 1;

    loop {
        let Some(&(at, ch)) = chars.get(j) else {
            return Err(ParseError::new(pos, "unterminated string literal"));
        };
        j += 1;

        if ch == quote {
            return Ok((text, j));
        }
        if ch != '\\' {
            text.push(ch);
            continue;
        }

        let Some(&(_, escaped)) = chars.get(j) else {
            return Err(ParseError::new(at, "unterminated escape sequence"));
        };
        j += 1;
        match escaped {
            '"' => text.push('"'),
            '\'' => text.push('\''),
            '\\' => text.push('\\'),
            '/' => text.push('/'),
            'b' => text.push('\u{0008}'),
            'f' => text.push('\u{000C}'),
            'n' => text.push('\n'),
            'r' => text.push('\r'),
            't' => text.push('\t'),
            'u' => {
                let hex: String = chars.iter().skip(j).take(4).map(|&(_, c)| c).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| ParseError::new(at, "invalid unicode escape"))?;
                text.push(code);
                j += 4;
            }
            other => {
                return Err(ParseError::new(at, format!("unsupported escape '\\{}'", other)));
            }
        }
    }
}
