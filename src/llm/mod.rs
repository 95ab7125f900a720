// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Model gateway
//!
//! The runner never talks to a model directly. Steps that need one call
//! through [`ModelClient`], which keeps the transport swappable (the Claude
//! CLI in production, a scripted double in tests).

mod claude;
mod reconcile;

pub use claude::ClaudeCliClient;
pub use reconcile::reconcile;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::pipeline::Model;

/// One model call
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub prompt: String,
    pub model: Model,
    pub system_prompt: Option<String>,
    /// JSON schema the answer should follow
    pub output_schema: Option<Value>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>, model: Model) -> Self {
        Self {
            prompt: prompt.into(),
            model,
            system_prompt: None,
            output_schema: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_output_schema(mut self, schema: Option<Value>) -> Self {
        self.output_schema = schema;
        self
    }
}

/// What the model sent back
///
/// Either shape may be missing. `structured_output` is only filled in when
/// a schema was requested and the transport supports constrained output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub structured_output: Option<Value>,
    pub result: Option<String>,
    pub cost_usd: Option<f64>,
    pub is_error: bool,
}

impl ModelResponse {
    /// Plain text answer
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Self::default()
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }
}

/// Model transport errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call failed: {0}")]
    Api(String),

    #[error("model call timed out after {0} seconds")]
    Timeout(u64),

    #[error("model transport error: {0}")]
    Internal(String),
}

/// Anything that can answer a prompt
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}
