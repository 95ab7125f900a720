// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Step handlers
//!
//! One handler per non-looping step kind. The runner resolves a step's
//! `arguments` expression and hands the value to the handler registered for
//! the step's kind; handlers never see each other or the scope.

mod chunk;
mod evaluate;
mod files;
mod prompt;
mod transform;

pub use chunk::{split_chunks, ChunkHandler};
pub use evaluate::EvaluateHandler;
pub use files::{FindFilesHandler, ReadFileHandler};
pub use prompt::PromptHandler;
pub use transform::TransformHandler;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::judge::ModelJudge;
use crate::llm::ModelClient;
use crate::pipeline::{StepKind, StepSpec};

/// What a step produced
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Value bound to the step's name
    pub value: Value,

    /// Cost of external calls made by the step, if any
    pub cost_usd: Option<f64>,
}

impl StepOutput {
    /// Output of a step that made no paid calls
    pub fn value(value: Value) -> Self {
        Self {
            value,
            cost_usd: None,
        }
    }
}

/// Trait for step handlers
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Kind this handler runs
    fn kind(&self) -> StepKind;

    /// Run `step` with its resolved arguments
    ///
    /// Failures that are not already a [`crate::errors::PipelineError`] are
    /// wrapped by the runner with the step's name and kind.
    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput>;
}

/// Handlers keyed by the kind they run
pub type HandlerTable = HashMap<StepKind, Box<dyn StepHandler>>;

/// Register every built-in handler, sharing one model client
pub fn default_handlers(client: Arc<dyn ModelClient>) -> HandlerTable {
    let handlers: Vec<Box<dyn StepHandler>> = vec![
        Box::new(ReadFileHandler),
        Box::new(FindFilesHandler),
        Box::new(TransformHandler),
        Box::new(ChunkHandler),
        Box::new(PromptHandler::new(client.clone())),
        Box::new(EvaluateHandler::new(Arc::new(ModelJudge::new(client)))),
    ];

    handlers.into_iter().map(|h| (h.kind(), h)).collect()
}

fn wrong_step(expected: StepKind, step: &StepSpec) -> anyhow::Error {
    anyhow::anyhow!(
        "handler for {} steps was given a {} step",
        expected,
        step.kind()
    )
}
