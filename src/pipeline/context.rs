// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Execution scopes
//!
//! A [`Scope`] maps names to values and may borrow a parent. Reads walk the
//! parent chain outward; writes only ever touch the local bindings, so a loop
//! iteration's child scope cannot leak into its parent or its siblings.

use serde_json::{Map, Value};

use crate::errors::PipelineError;

/// Name→value bindings with parent-chained lookup
#[derive(Debug, Default)]
pub struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    bindings: Map<String, Value>,
}

impl Scope<'static> {
    /// Root scope of a run, with the pipeline input bound as `input`
    pub fn root(input: Value) -> Self {
        let mut bindings = Map::new();
        bindings.insert("input".to_string(), input);
        Self {
            parent: None,
            bindings,
        }
    }
}

impl<'p> Scope<'p> {
    /// Look a name up locally, then in each ancestor outward
    pub fn get(&self, name: &str) -> Result<&Value, PipelineError> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(value) = scope.bindings.get(name) {
                return Ok(value);
            }
            current = scope.parent;
        }
        Err(PipelineError::NameResolution {
            name: name.to_string(),
        })
    }

    /// Bind a name in this scope only
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), PipelineError> {
        if self.bindings.contains_key(name) {
            return Err(PipelineError::DuplicateName {
                name: name.to_string(),
            });
        }
        self.bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// New empty scope whose reads fall through to this one
    pub fn child(&self) -> Scope<'_> {
        Scope {
            parent: Some(self),
            bindings: Map::new(),
        }
    }

    /// Whether the name is bound here or in an ancestor
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Names bound locally, in binding order
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Nesting depth (the root scope is 0)
    pub fn depth(&self) -> usize {
        self.parent.map_or(0, |p| p.depth() + 1)
    }

    /// Object holding only `names`, each resolved through the chain; unbound
    /// names are left out
    pub fn view<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> Value {
        let mut view = Map::new();
        for name in names {
            if let Ok(value) = self.get(name) {
                view.insert(name.to_string(), value.clone());
            }
        }
        Value::Object(view)
    }

    /// Flattened value tree for expression evaluation; inner bindings shadow
    /// outer ones
    pub fn flatten(&self) -> Value {
        let mut merged = match self.parent {
            Some(parent) => match parent.flatten() {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };
        for (name, value) in &self.bindings {
            merged.insert(name.clone(), value.clone());
        }
        Value::Object(merged)
    }
}
