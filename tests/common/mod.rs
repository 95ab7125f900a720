// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ai_pipelines::llm::{ModelClient, ModelError, ModelRequest, ModelResponse};
use ai_pipelines::{PipelineDefinition, PipelineRunner};
use async_trait::async_trait;
use serde_json::Value;

/// Model double that answers from a script, in order
///
/// Every request is recorded so tests can check what was sent. Running off
/// the end of the script is an API error.
#[derive(Clone, Default)]
pub struct MockModel {
    responses: Arc<Vec<ModelResponse>>,
    index: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl MockModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Arc::new(responses),
            ..Self::default()
        }
    }

    /// Script of structured answers, each costing `cost_usd`
    pub fn structured(answers: Vec<Value>, cost_usd: f64) -> Self {
        Self::new(
            answers
                .into_iter()
                .map(|answer| ModelResponse {
                    structured_output: Some(answer),
                    cost_usd: Some(cost_usd),
                    ..ModelResponse::default()
                })
                .collect(),
        )
    }

    /// How many calls were made
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(idx)
            .cloned()
            .ok_or_else(|| ModelError::Api(format!("no scripted response #{}", idx)))
    }
}

pub fn pipeline(yaml: &str) -> PipelineDefinition {
    PipelineDefinition::from_yaml(yaml).unwrap()
}

/// Runner with the built-in handlers talking to `model`
pub fn runner(model: &MockModel) -> PipelineRunner {
    PipelineRunner::with_client(Arc::new(model.clone()))
}
