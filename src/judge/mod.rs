// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! LLM-as-judge scoring for `evaluate` steps
//!
//! Each [`Strategy`] is a short chain of structured model calls whose
//! answers are folded into a report object with a `score` in `[0, 1]`
//! (higher is better for every strategy).

mod model_judge;
mod prompts;

pub use model_judge::ModelJudge;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::ModelError;
use crate::pipeline::{Model, Strategy};

/// A finished judgement
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Strategy-specific report, always carrying `score`
    pub report: Value,
    /// Summed cost of the judge's model calls
    pub cost_usd: f64,
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{stage} answer unusable: {message}")]
    Output { stage: &'static str, message: String },
}

/// Scores the arguments of an `evaluate` step
#[async_trait]
pub trait Scorer: Send + Sync {
    /// `args` holds at least the strategy's required keys
    async fn score(
        &self,
        strategy: Strategy,
        args: &Map<String, Value>,
        model: Model,
    ) -> Result<Scored, JudgeError>;
}

/// Text handed to a judge prompt
pub(crate) fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A list of retrieved documents becomes one text with `[Document N]`
/// headers; anything else is used as is
pub(crate) fn normalize_context(value: &Value) -> String {
    match value {
        Value::Array(docs) => docs
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[Document {}]\n{}", i + 1, as_text(doc)))
            .collect::<Vec<_>>()
            .join("\n\n"),
        other => as_text(other),
    }
}

pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
