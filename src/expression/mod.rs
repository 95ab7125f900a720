// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Step argument expressions
//!
//! A JSONata-compatible subset: dotted paths that map over arrays, `[...]`
//! filters and indexes, object and array constructors, arithmetic, string
//! concatenation with `&`, comparisons, `and`/`or`/`in`, `? :` conditions,
//! `( ; )` blocks with `$var :=` bindings, `$` and `$$`, and a set of
//! built-in `$functions`.
//!
//! Expressions are evaluated against the flattened scope, so a bare name at
//! the start of a path refers to a bound step result (or `input`, `item`,
//! `item_index`).

mod eval;
mod functions;
mod lexer;
mod parser;

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::errors::PipelineError;

use self::eval::{Evaluator, Vars};
use self::parser::Node;

pub(crate) use self::eval::type_name;

/// Syntax error with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Runtime failure such as a type mismatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EvalError(String);

impl EvalError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A parsed expression
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.to_string(),
            ast: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names read from the evaluation root, i.e. the first segment of every
    /// path that is not relative to a filter or a later step
    pub fn root_references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_references(&self.ast, &mut names);
        names
    }

    /// Keys of a top-level object constructor with literal keys, `None` for
    /// any other shape
    pub fn object_keys(&self) -> Option<Vec<String>> {
        let Node::Object(pairs) = &self.ast else {
            return None;
        };
        let mut keys = Vec::with_capacity(pairs.len());
        for (key, _) in pairs {
            match key {
                Node::Literal(Value::String(k)) => keys.push(k.clone()),
                _ => return None,
            }
        }
        Some(keys)
    }

    /// Whether `$` or `$$` appears anywhere, in which case the whole root
    /// may be observed and `root_references` does not bound what is read
    pub fn reads_whole_root(&self) -> bool {
        mentions_root(&self.ast)
    }

    /// Evaluate against `data`; `Ok(None)` is an undefined result
    pub fn evaluate(&self, data: &Value) -> Result<Option<Value>, EvalError> {
        Evaluator::new(data).eval(&self.ast, data, &mut Vars::new())
    }
}

fn mentions_root(node: &Node) -> bool {
    match node {
        Node::Variable(name) => name.is_empty() || name == "$",
        Node::Literal(_) | Node::Name(_) => false,
        Node::Path(steps) => steps
            .iter()
            .any(|step| mentions_root(&step.node) || step.stages.iter().any(mentions_root)),
        Node::Negate(inner) | Node::Bind { value: inner, .. } => mentions_root(inner),
        Node::Binary { lhs, rhs, .. } | Node::Range(lhs, rhs) => {
            mentions_root(lhs) || mentions_root(rhs)
        }
        Node::Condition {
            test,
            then,
            otherwise,
        } => {
            mentions_root(test)
                || mentions_root(then)
                || otherwise.as_deref().is_some_and(mentions_root)
        }
        Node::Block(body) | Node::Array(body) | Node::Call { args: body, .. } => {
            body.iter().any(mentions_root)
        }
        Node::Object(pairs) => pairs
            .iter()
            .any(|(key, value)| mentions_root(key) || mentions_root(value)),
    }
}

fn collect_references(node: &Node, names: &mut BTreeSet<String>) {
    match node {
        Node::Name(name) => {
            names.insert(name.clone());
        }
        Node::Path(steps) => {
            if let Some(first) = steps.first() {
                collect_references(&first.node, names);
            }
        }
        Node::Negate(inner) => collect_references(inner, names),
        Node::Binary { lhs, rhs, .. } | Node::Range(lhs, rhs) => {
            collect_references(lhs, names);
            collect_references(rhs, names);
        }
        Node::Condition {
            test,
            then,
            otherwise,
        } => {
            collect_references(test, names);
            collect_references(then, names);
            if let Some(otherwise) = otherwise {
                collect_references(otherwise, names);
            }
        }
        Node::Block(body) | Node::Array(body) | Node::Call { args: body, .. } => {
            for node in body {
                collect_references(node, names);
            }
        }
        Node::Bind { value, .. } => collect_references(value, names),
        Node::Object(pairs) => {
            for (key, value) in pairs {
                collect_references(key, names);
                collect_references(value, names);
            }
        }
        Node::Literal(_) | Node::Variable(_) => {}
    }
}

/// Parse and evaluate in one go, mapping failures (and undefined results,
/// which become `null`) onto the error taxonomy
pub fn evaluate(source: &str, data: &Value) -> Result<Value, PipelineError> {
    compile(source)?.value(data)
}

/// Parse `source`, reporting failures as expression errors
pub fn compile(source: &str) -> Result<Expression, PipelineError> {
    Expression::parse(source).map_err(|e| PipelineError::Expression {
        expression: source.to_string(),
        message: e.to_string(),
    })
}

impl Expression {
    /// Evaluate with undefined results mapped to `null`
    pub fn value(&self, data: &Value) -> Result<Value, PipelineError> {
        self.evaluate(data)
            .map(|value| value.unwrap_or(Value::Null))
            .map_err(|e| PipelineError::Expression {
                expression: self.source.clone(),
                message: e.to_string(),
            })
    }
}
