// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! `prompt` steps: render the template and call the model

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::{wrong_step, StepHandler, StepOutput};
use crate::errors::PipelineError;
use crate::llm::{reconcile, ModelClient, ModelRequest};
use crate::pipeline::{StepKind, StepSpec};
use crate::template;

const PREVIEW_CHARS: usize = 200;

pub struct PromptHandler {
    client: Arc<dyn ModelClient>,
}

impl PromptHandler {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for PromptHandler {
    fn kind(&self) -> StepKind {
        StepKind::Prompt
    }

    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput> {
        let StepSpec::Prompt(spec) = step else {
            return Err(wrong_step(self.kind(), step));
        };

        // Templates always see an object as `args`
        let args = match arguments {
            Value::Object(_) => arguments,
            other => json!({ "value": other }),
        };

        let prompt = template::render(&spec.template, &args)?;
        debug!(
            step_name = %spec.name,
            model = %spec.model,
            prompt = %preview(&prompt),
            "Rendered prompt"
        );

        let request = ModelRequest::new(prompt, spec.model)
            .with_system_prompt(spec.system_prompt.clone())
            .with_output_schema(spec.output.clone());

        let response = self
            .client
            .complete(request)
            .await
            .map_err(|e| PipelineError::Llm {
                step: spec.name.clone(),
                message: e.to_string(),
            })?;

        let value = reconcile(&spec.name, &response, spec.output.as_ref())?;

        Ok(StepOutput {
            value,
            cost_usd: response.cost_usd,
        })
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", head)
}
