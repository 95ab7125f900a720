// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Prompt templates
//!
//! Jinja-style templates rendered with the step's resolved arguments bound
//! as `args`. Undefined values are strict: printing, testing or iterating a
//! missing name or attribute fails the render instead of producing empty
//! text. The `default` filter and `.get()` are the ways to read optional
//! fields.

mod render;
mod syntax;

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use thiserror::Error;

use self::syntax::{Expr, Node};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("template syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{0}")]
    Undefined(String),

    #[error("{0}")]
    Type(String),
}

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse without rendering; fails only on syntax errors
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        Ok(Self {
            nodes: syntax::parse(source)?,
        })
    }

    pub fn render(&self, args: &Value) -> Result<String, RenderError> {
        let mut vars = HashMap::new();
        vars.insert("args".to_string(), args.clone());
        let mut out = String::new();
        render::render_nodes(&self.nodes, &vars, &mut out)?;
        Ok(out)
    }

    /// Every `KEY` read as `args.KEY` or `args['KEY']`
    pub fn args_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for node in &self.nodes {
            node_keys(node, &mut keys);
        }
        keys
    }
}

/// Parse and render in one go
pub fn render(source: &str, args: &Value) -> Result<String, RenderError> {
    Template::parse(source)?.render(args)
}

fn node_keys(node: &Node, keys: &mut BTreeSet<String>) {
    match node {
        Node::Text(_) => {}
        Node::Output(expr) => expr_keys(expr, keys),
        Node::If {
            branches,
            otherwise,
        } => {
            for (test, body) in branches {
                expr_keys(test, keys);
                body.iter().for_each(|n| node_keys(n, keys));
            }
            for n in otherwise.iter().flatten() {
                node_keys(n, keys);
            }
        }
        Node::For {
            iter,
            body,
            otherwise,
            ..
        } => {
            expr_keys(iter, keys);
            body.iter().for_each(|n| node_keys(n, keys));
            for n in otherwise.iter().flatten() {
                node_keys(n, keys);
            }
        }
    }
}

fn expr_keys(expr: &Expr, keys: &mut BTreeSet<String>) {
    match expr {
        Expr::Attr(target, name) => {
            if matches!(target.as_ref(), Expr::Name(n) if n == "args") {
                keys.insert(name.clone());
            } else {
                expr_keys(target, keys);
            }
        }
        Expr::Index(target, key) => {
            match (target.as_ref(), key.as_ref()) {
                (Expr::Name(n), Expr::Literal(Value::String(k))) if n == "args" => {
                    keys.insert(k.clone());
                }
                _ => expr_keys(target, keys),
            }
            expr_keys(key, keys);
        }
        // `args.get('k')` is an optional read and does not require the key
        Expr::Method { target, args, .. } | Expr::Filter { target, args, .. } => {
            expr_keys(target, keys);
            args.iter().for_each(|a| expr_keys(a, keys));
        }
        Expr::List(items) => items.iter().for_each(|i| expr_keys(i, keys)),
        Expr::Not(inner) => expr_keys(inner, keys),
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) | Expr::Compare { lhs, rhs, .. } => {
            expr_keys(lhs, keys);
            expr_keys(rhs, keys);
        }
        Expr::Literal(_) | Expr::Name(_) => {}
    }
}
