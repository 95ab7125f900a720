// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! `evaluate` steps: LLM-as-judge scoring

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{wrong_step, StepHandler, StepOutput};
use crate::errors::PipelineError;
use crate::expression::type_name;
use crate::judge::Scorer;
use crate::pipeline::{StepKind, StepSpec};

pub struct EvaluateHandler {
    scorer: Arc<dyn Scorer>,
}

impl EvaluateHandler {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl StepHandler for EvaluateHandler {
    fn kind(&self) -> StepKind {
        StepKind::Evaluate
    }

    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput> {
        let StepSpec::Evaluate {
            name,
            strategy,
            model,
            ..
        } = step
        else {
            return Err(wrong_step(self.kind(), step));
        };

        let args = match arguments {
            Value::Object(args) => args,
            other => bail!(
                "evaluate arguments must produce an object, got {}",
                type_name(&other)
            ),
        };

        for key in strategy.required_keys() {
            if args.get(*key).map_or(true, Value::is_null) {
                bail!("Strategy '{}' requires key '{}' in arguments", strategy, key);
            }
        }

        let scored = self
            .scorer
            .score(*strategy, &args, *model)
            .await
            .map_err(|e| PipelineError::Llm {
                step: name.clone(),
                message: e.to_string(),
            })?;

        Ok(StepOutput {
            value: scored.report,
            cost_usd: Some(scored.cost_usd),
        })
    }
}
