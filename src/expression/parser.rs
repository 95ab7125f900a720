// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Expression syntax tree and Pratt parser

use serde_json::Value;

use super::functions;
use super::lexer::{tokenize, Token};
use super::ParseError;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

impl BinOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Concat => "&",
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::In => "in",
        }
    }
}

/// One step of a path, with its filter/index stages
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    pub node: Node,
    pub stages: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(Value),
    /// Field of the context value
    Name(String),
    /// `$name`, `$` (context) or `$$` (root)
    Variable(String),
    Path(Vec<Step>),
    Negate(Box<Node>),
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Condition {
        test: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
    Block(Vec<Node>),
    Bind {
        name: String,
        value: Box<Node>,
    },
    Object(Vec<(Node, Node)>),
    Array(Vec<Node>),
    Range(Box<Node>, Box<Node>),
    Call {
        name: String,
        args: Vec<Node>,
    },
}

pub(crate) fn parse(source: &str) -> Result<Node, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    if parser.peek().is_none() {
        return Err(ParseError::new(0, "empty expression"));
    }
    let node = parser.expression(0)?;
    if let Some((token, at)) = parser.tokens.get(parser.pos) {
        return Err(ParseError::new(*at, format!("unexpected {}", token.describe())));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

// Binding powers
const BP_ASSIGN: u8 = 10;
const BP_CONDITION: u8 = 20;
const BP_OR: u8 = 25;
const BP_AND: u8 = 30;
const BP_COMPARE: u8 = 40;
const BP_ADD: u8 = 50;
const BP_MUL: u8 = 60;
const BP_PREFIX: u8 = 70;
const BP_DOT: u8 = 75;
const BP_POSTFIX: u8 = 80;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |&(_, at)| at)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let at = self.position();
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ParseError::new(
                at,
                format!("expected {} but found {}", expected.describe(), token.describe()),
            )),
            None => Err(ParseError::new(
                at,
                format!("expected {} but the expression ended", expected.describe()),
            )),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Node, ParseError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(token) = self.peek() else { break };
            let Some(bp) = infix_power(token) else { break };
            if bp <= min_bp {
                break;
            }
            lhs = self.infix(lhs, bp)?;
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Node, ParseError> {
        let at = self.position();
        let Some(token) = self.advance() else {
            return Err(ParseError::new(at, "unexpected end of expression"));
        };

        match token {
            Token::Number(n) => Ok(Node::Literal(number_literal(n))),
            Token::Str(s) => Ok(Node::Literal(Value::String(s))),
            Token::Name { name, quoted: false } => Ok(match name.as_str() {
                "true" => Node::Literal(Value::Bool(true)),
                "false" => Node::Literal(Value::Bool(false)),
                "null" => Node::Literal(Value::Null),
                _ => Node::Name(name),
            }),
            Token::Name { name, quoted: true } => Ok(Node::Name(name)),
            Token::Var(name) => Ok(Node::Variable(name)),
            Token::Minus => Ok(Node::Negate(Box::new(self.expression(BP_PREFIX)?))),
            Token::LParen => {
                let mut body = Vec::new();
                while self.peek() != Some(&Token::RParen) {
                    body.push(self.expression(0)?);
                    if !self.eat(&Token::Semicolon) {
                        break;
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Node::Block(body))
            }
            Token::LBracket => {
                let mut elements = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        let element = self.expression(0)?;
                        if self.eat(&Token::DotDot) {
                            let upper = self.expression(0)?;
                            elements.push(Node::Range(Box::new(element), Box::new(upper)));
                        } else {
                            elements.push(element);
                        }
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                Ok(Node::Array(elements))
            }
            Token::LBrace => {
                let mut pairs = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = self.expression(0)?;
                        self.expect(Token::Colon)?;
                        let value = self.expression(0)?;
                        pairs.push((key, value));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBrace)?;
                }
                Ok(Node::Object(pairs))
            }
            Token::Star => Err(ParseError::new(at, "wildcards are not supported")),
            other => Err(ParseError::new(at, format!("unexpected {}", other.describe()))),
        }
    }

    fn infix(&mut self, lhs: Node, bp: u8) -> Result<Node, ParseError> {
        let at = self.position();
        let Some(token) = self.advance() else {
            return Err(ParseError::new(at, "unexpected end of expression"));
        };

        match token {
            Token::Dot => {
                let rhs = self.expression(BP_DOT)?;
                Ok(append_step(lhs, rhs))
            }
            Token::LBracket => {
                if self.peek() == Some(&Token::RBracket) {
                    return Err(ParseError::new(at, "empty filter '[]' is not supported"));
                }
                let stage = self.expression(0)?;
                self.expect(Token::RBracket)?;
                Ok(append_stage(lhs, stage))
            }
            Token::LParen => {
                let Node::Variable(name) = lhs else {
                    return Err(ParseError::new(at, "only $functions can be called"));
                };
                if !functions::is_known(&name) {
                    return Err(ParseError::new(at, format!("unknown function '${}'", name)));
                }
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.expression(0)?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RParen)?;
                }
                Ok(Node::Call { name, args })
            }
            Token::Question => {
                let then = self.expression(0)?;
                let otherwise = if self.eat(&Token::Colon) {
                    Some(Box::new(self.expression(0)?))
                } else {
                    None
                };
                Ok(Node::Condition {
                    test: Box::new(lhs),
                    then: Box::new(then),
                    otherwise,
                })
            }
            Token::Assign => {
                let Node::Variable(name) = lhs else {
                    return Err(ParseError::new(at, "left side of ':=' must be a $variable"));
                };
                // right associative
                let value = self.expression(bp - 1)?;
                Ok(Node::Bind {
                    name,
                    value: Box::new(value),
                })
            }
            other => {
                let op = binary_op(&other)
                    .ok_or_else(|| ParseError::new(at, format!("unexpected {}", other.describe())))?;
                let rhs = self.expression(bp)?;
                Ok(Node::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
        }
    }
}

fn infix_power(token: &Token) -> Option<u8> {
    Some(match token {
        Token::Dot => BP_DOT,
        Token::LBracket | Token::LParen => BP_POSTFIX,
        Token::Star | Token::Slash | Token::Percent => BP_MUL,
        Token::Plus | Token::Minus | Token::Amp => BP_ADD,
        Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => BP_COMPARE,
        Token::Name { name, quoted: false } => match name.as_str() {
            "in" => BP_COMPARE,
            "and" => BP_AND,
            "or" => BP_OR,
            _ => return None,
        },
        Token::Question => BP_CONDITION,
        Token::Assign => BP_ASSIGN,
        _ => return None,
    })
}

fn binary_op(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::Percent => BinOp::Mod,
        Token::Amp => BinOp::Concat,
        Token::Eq => BinOp::Eq,
        Token::Ne => BinOp::Ne,
        Token::Lt => BinOp::Lt,
        Token::Le => BinOp::Le,
        Token::Gt => BinOp::Gt,
        Token::Ge => BinOp::Ge,
        Token::Name { name, quoted: false } => match name.as_str() {
            "and" => BinOp::And,
            "or" => BinOp::Or,
            "in" => BinOp::In,
            _ => return None,
        },
        _ => return None,
    })
}

fn append_step(lhs: Node, rhs: Node) -> Node {
    // `a.b[0]` parses its right side as a filtered one-step path
    let next = match rhs {
        Node::Path(steps) => steps,
        node => vec![Step {
            node,
            stages: Vec::new(),
        }],
    };
    match lhs {
        Node::Path(mut steps) => {
            steps.extend(next);
            Node::Path(steps)
        }
        other => {
            let mut steps = vec![Step {
                node: other,
                stages: Vec::new(),
            }];
            steps.extend(next);
            Node::Path(steps)
        }
    }
}

fn append_stage(lhs: Node, stage: Node) -> Node {
    match lhs {
        Node::Path(mut steps) => {
            if let Some(last) = steps.last_mut() {
                last.stages.push(stage);
            }
            Node::Path(steps)
        }
        other => Node::Path(vec![Step {
            node: other,
            stages: vec![stage],
        }]),
    }
}

/// Integral literals stay integers so `2` prints as `2`, not `2.0`
pub(crate) fn number_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
