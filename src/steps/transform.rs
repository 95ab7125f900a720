// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! `transform` steps: the resolved arguments are the result

use async_trait::async_trait;
use serde_json::Value;

use super::{wrong_step, StepHandler, StepOutput};
use crate::pipeline::{StepKind, StepSpec};

pub struct TransformHandler;

#[async_trait]
impl StepHandler for TransformHandler {
    fn kind(&self) -> StepKind {
        StepKind::Transform
    }

    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput> {
        if !matches!(step, StepSpec::Transform { .. }) {
            return Err(wrong_step(self.kind(), step));
        }
        Ok(StepOutput::value(arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_returns_arguments() {
        let step = StepSpec::Transform {
            name: "t".into(),
            arguments: "input".into(),
        };
        let out = TransformHandler.run(&step, json!({"a": [1, 2]})).await.unwrap();
        assert_eq!(out, StepOutput::value(json!({"a": [1, 2]})));
    }

    #[tokio::test]
    async fn test_rejects_other_kinds() {
        let step = StepSpec::ReadFile {
            name: "r".into(),
            arguments: "input".into(),
        };
        let err = TransformHandler.run(&step, json!(null)).await.unwrap_err();
        assert!(err.to_string().contains("read_file"));
    }
}
