// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Pipeline runner
//!
//! Runs a validated pipeline's steps in declaration order. Each step's
//! `arguments` expression is evaluated against the flattened scope, the
//! result is handed to the handler registered for the step's kind, and the
//! step's name is bound only once the handler succeeds. `for_each` steps are
//! run here: every element gets a fresh child scope with `item` and
//! `item_index` bound, which is dropped when the iteration ends.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::errors::PipelineError;
use crate::expression::{self, type_name};
use crate::llm::ModelClient;
use crate::pipeline::{schema, PipelineDefinition, PipelineValidator, Scope, StepKind, StepSpec};
use crate::steps::{default_handlers, HandlerTable, StepHandler, StepOutput};

/// Label of the root scope in the step ledger
pub const ROOT_SCOPE: &str = "root";

/// Runner options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Abort a step (and the run) when a handler takes longer than this
    pub step_timeout: Option<Duration>,
}

/// Ledger entry for one successful step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step_name: String,
    pub kind: StepKind,
    /// Scope the step ran in: `root`, or `root.loop[i]` inside loops
    pub scope: String,
    pub value: Value,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Result of running a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Result of the last top-level step (null when there are none)
    pub output: Value,
    /// Every step that ran, in completion order
    pub steps: Vec<StepRecord>,
    pub total_duration_ms: u64,
    pub total_cost_usd: f64,
}

/// Progress notifications
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        total_steps: usize,
    },
    StepStarted {
        step_name: String,
        kind: StepKind,
        scope: String,
    },
    StepSucceeded {
        step_name: String,
        kind: StepKind,
        scope: String,
        duration: Duration,
        cost_usd: Option<f64>,
    },
    StepFailed {
        step_name: String,
        kind: StepKind,
        scope: String,
        error: String,
    },
    RunCompleted {
        duration: Duration,
        cost_usd: f64,
    },
    RunAborted {
        error_kind: &'static str,
        error: String,
    },
}

/// Receives every [`RunEvent`] as it happens
pub type Observer = Arc<dyn Fn(&RunEvent) + Send + Sync>;

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, PipelineError>> + Send + 'a>>;

/// Pipeline runner
pub struct PipelineRunner {
    /// Registered handlers by step kind
    handlers: HandlerTable,
    options: RunOptions,
    observers: Vec<Observer>,
}

impl PipelineRunner {
    /// Runner with the given handler table
    pub fn new(handlers: HandlerTable) -> Self {
        Self {
            handlers,
            options: RunOptions::default(),
            observers: Vec::new(),
        }
    }

    /// Runner with every built-in handler, calling `client` for model steps
    pub fn with_client(client: Arc<dyn ModelClient>) -> Self {
        Self::new(default_handlers(client))
    }

    /// Register (or replace) the handler for its kind
    pub fn register_handler(&mut self, handler: Box<dyn StepHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribe to run progress
    pub fn on_event(&mut self, observer: impl Fn(&RunEvent) + Send + Sync + 'static) {
        self.observers.push(Arc::new(observer));
    }

    /// Validate and run `pipeline` against `input`
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        input: Value,
    ) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        self.emit(RunEvent::RunStarted {
            total_steps: pipeline.total_steps(),
        });

        match self.execute(pipeline, input, start).await {
            Ok(result) => {
                info!(
                    duration_ms = result.total_duration_ms,
                    cost_usd = result.total_cost_usd,
                    "Pipeline completed"
                );
                self.emit(RunEvent::RunCompleted {
                    duration: start.elapsed(),
                    cost_usd: result.total_cost_usd,
                });
                Ok(result)
            }
            Err(err) => {
                error!(error_kind = err.kind_name(), "Pipeline aborted: {}", err);
                self.emit(RunEvent::RunAborted {
                    error_kind: err.kind_name(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        input: Value,
        start: Instant,
    ) -> Result<PipelineResult, PipelineError> {
        let report = PipelineValidator::validate(pipeline).into_result()?;
        for finding in report.warnings() {
            warn!("{}", finding);
        }

        schema::check(&pipeline.input, &input).map_err(|violation| PipelineError::Validation {
            message: format!("Pipeline input does not match its schema: {}", violation),
        })?;

        let mut ledger = Vec::new();
        let mut root = Scope::root(input);
        let output = self
            .run_steps(&pipeline.steps, &mut root, ROOT_SCOPE, &mut ledger)
            .await?;

        let total_cost_usd = leaf_cost(&ledger).unwrap_or(0.0);
        Ok(PipelineResult {
            output,
            steps: ledger,
            total_duration_ms: millis(start.elapsed()),
            total_cost_usd,
        })
    }

    /// Run `steps` in order in `scope`, returning the last step's result
    fn run_steps<'a>(
        &'a self,
        steps: &'a [StepSpec],
        scope: &'a mut Scope<'_>,
        label: &'a str,
        ledger: &'a mut Vec<StepRecord>,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            let mut last = Value::Null;
            for step in steps {
                let value = self.run_step(step, scope, label, ledger).await?;
                scope.set(step.name(), value.clone())?;
                last = value;
            }
            Ok(last)
        })
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        scope: &Scope<'_>,
        label: &str,
        ledger: &mut Vec<StepRecord>,
    ) -> Result<Value, PipelineError> {
        let kind = step.kind();
        info!(step_name = step.name(), step_kind = %kind, scope = label, "Step started");
        self.emit(RunEvent::StepStarted {
            step_name: step.name().to_string(),
            kind,
            scope: label.to_string(),
        });

        let started = Instant::now();
        match self.dispatch(step, scope, label, ledger).await {
            Ok(output) => {
                let duration = started.elapsed();
                info!(
                    step_name = step.name(),
                    step_kind = %kind,
                    duration_ms = millis(duration),
                    cost_usd = output.cost_usd.unwrap_or(0.0),
                    "Step completed"
                );
                self.emit(RunEvent::StepSucceeded {
                    step_name: step.name().to_string(),
                    kind,
                    scope: label.to_string(),
                    duration,
                    cost_usd: output.cost_usd,
                });
                ledger.push(StepRecord {
                    step_name: step.name().to_string(),
                    kind,
                    scope: label.to_string(),
                    value: output.value.clone(),
                    duration_ms: millis(duration),
                    cost_usd: output.cost_usd,
                });
                Ok(output.value)
            }
            Err(err) => {
                error!(
                    step_name = step.name(),
                    step_kind = %kind,
                    error_kind = err.kind_name(),
                    "Step failed: {}",
                    err
                );
                self.emit(RunEvent::StepFailed {
                    step_name: step.name().to_string(),
                    kind,
                    scope: label.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        step: &StepSpec,
        scope: &Scope<'_>,
        label: &str,
        ledger: &mut Vec<StepRecord>,
    ) -> Result<StepOutput, PipelineError> {
        let arguments = match step.arguments() {
            Some(source) => evaluate_arguments(source, scope)?,
            None => Value::Object(Map::new()),
        };

        if let StepSpec::ForEach { steps, .. } = step {
            return self
                .run_loop(step, steps, arguments, scope, label, ledger)
                .await;
        }

        let kind = step.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| PipelineError::StepExecution {
                step: step.name().to_string(),
                kind,
                message: format!("no handler registered for {} steps", kind),
            })?;

        let outcome = match self.options.step_timeout {
            Some(limit) => timeout(limit, handler.run(step, arguments))
                .await
                .map_err(|_| PipelineError::StepExecution {
                    step: step.name().to_string(),
                    kind,
                    message: format!("timed out after {:.1}s", limit.as_secs_f64()),
                })?,
            None => handler.run(step, arguments).await,
        };

        outcome.map_err(|err| PipelineError::from_step_failure(step.name(), kind, err))
    }

    async fn run_loop(
        &self,
        step: &StepSpec,
        body: &[StepSpec],
        arguments: Value,
        scope: &Scope<'_>,
        label: &str,
        ledger: &mut Vec<StepRecord>,
    ) -> Result<StepOutput, PipelineError> {
        let items = match arguments {
            Value::Array(items) => items,
            other => {
                return Err(PipelineError::StepExecution {
                    step: step.name().to_string(),
                    kind: StepKind::ForEach,
                    message: format!(
                        "for_each arguments must resolve to an array, got {}",
                        type_name(&other)
                    ),
                })
            }
        };

        let first_record = ledger.len();
        let mut results = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let mut child = scope.child();
            child.set("item", item)?;
            child.set("item_index", json!(index))?;

            let child_label = format!("{}.{}[{}]", label, step.name(), index);
            let value = self
                .run_steps(body, &mut child, &child_label, ledger)
                .await?;
            results.push(value);
        }

        Ok(StepOutput {
            value: Value::Array(results),
            cost_usd: leaf_cost(&ledger[first_record..]),
        })
    }

    fn emit(&self, event: RunEvent) {
        for observer in &self.observers {
            observer(&event);
        }
    }
}

/// Summed cost of the non-loop records, `None` when none reported a cost.
/// Loop records already carry their body's cost and are skipped.
/// Evaluate a step's `arguments` against just the bindings it names, so the
/// work per step is bounded by its references rather than the whole scope
fn evaluate_arguments(source: &str, scope: &Scope<'_>) -> Result<Value, PipelineError> {
    let expression = expression::compile(source)?;
    let data = if expression.reads_whole_root() {
        scope.flatten()
    } else {
        scope.view(expression.root_references().iter().map(String::as_str))
    };
    expression.value(&data)
}

fn leaf_cost(records: &[StepRecord]) -> Option<f64> {
    records
        .iter()
        .filter(|r| r.kind != StepKind::ForEach)
        .filter_map(|r| r.cost_usd)
        .fold(None, |total, cost| Some(total.unwrap_or(0.0) + cost))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn runner() -> PipelineRunner {
        let mut table = HandlerTable::new();
        table.insert(StepKind::Transform, Box::new(crate::steps::TransformHandler));
        PipelineRunner::new(table)
    }

    fn load(yaml: &str) -> PipelineDefinition {
        PipelineDefinition::from_yaml(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_loop_reads_parent_scope() {
        let pipeline = load(
            r#"
input:
  type: object
  properties: { count: { type: integer } }
  required: [count]
steps:
  - kind: transform
    name: step1
    arguments: input.count * 2
  - kind: for_each
    name: loop
    arguments: "[1, 2, 3]"
    steps:
      - kind: transform
        name: nested
        arguments: step1 + item_index
"#,
        );

        let result = runner().run(&pipeline, json!({"count": 3})).await.unwrap();
        assert_eq!(result.output, json!([6, 7, 8]));

        let labels: Vec<(&str, &str)> = result
            .steps
            .iter()
            .map(|r| (r.step_name.as_str(), r.scope.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("step1", "root"),
                ("nested", "root.loop[0]"),
                ("nested", "root.loop[1]"),
                ("nested", "root.loop[2]"),
                ("loop", "root"),
            ]
        );
    }

    #[tokio::test]
    async fn test_whole_root_expression_sees_every_binding() {
        let pipeline = load(
            r#"
input: { type: object }
steps:
  - kind: transform
    name: a
    arguments: "1"
  - kind: for_each
    name: each
    arguments: "[10]"
    steps:
      - kind: transform
        name: seen
        arguments: "$count($keys($$)) + item"
"#,
        );
        let result = runner().run(&pipeline, json!({})).await.unwrap();
        assert_eq!(result.output, json!([14]));
    }

    #[tokio::test]
    async fn test_empty_pipeline_outputs_null() {
        let pipeline = load("input: { type: object }\nsteps: []\n");
        let result = runner().run(&pipeline, json!({})).await.unwrap();
        assert_eq!(result.output, Value::Null);
        assert!(result.steps.is_empty());
        assert_eq!(result.total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_loop_over_non_array_fails() {
        let pipeline = load(
            r#"
input: { type: object }
steps:
  - kind: for_each
    name: loop
    arguments: input
    steps: []
"#,
        );
        let err = runner().run(&pipeline, json!({"a": 1})).await.unwrap_err();
        match err {
            PipelineError::StepExecution {
                step,
                kind,
                message,
            } => {
                assert_eq!(step, "loop");
                assert_eq!(kind, StepKind::ForEach);
                assert!(message.contains("got object"));
            }
            other => panic!("Expected StepExecution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_schema_mismatch_runs_nothing() {
        let pipeline = load(
            r#"
input:
  type: object
  properties: { count: { type: integer } }
  required: [count]
steps:
  - kind: transform
    name: t
    arguments: input.count
"#,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut runner = runner();
        let sink = seen.clone();
        runner.on_event(move |e| {
            if let RunEvent::StepStarted { step_name, .. } = e {
                sink.lock().unwrap().push(step_name.clone());
            }
        });

        let err = runner.run(&pipeline, json!({"count": "three"})).await.unwrap_err();
        assert_eq!(err.kind_name(), "ValidationError");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_handler_is_step_error() {
        let pipeline = load(
            r#"
input: { type: object }
steps:
  - kind: chunk
    name: pieces
    arguments: "'text'"
"#,
        );
        let err = runner().run(&pipeline, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("no handler registered for chunk steps"));
    }

    struct Slow;

    #[async_trait]
    impl StepHandler for Slow {
        fn kind(&self) -> StepKind {
            StepKind::Transform
        }

        async fn run(&self, _step: &StepSpec, _arguments: Value) -> anyhow::Result<StepOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepOutput::value(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let pipeline = load(
            r#"
input: { type: object }
steps:
  - kind: transform
    name: slow
    arguments: "1"
"#,
        );
        let mut runner = runner().with_options(RunOptions {
            step_timeout: Some(Duration::from_millis(20)),
        });
        runner.register_handler(Box::new(Slow));

        let err = runner.run(&pipeline, json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::StepExecution { ref step, .. } if step == "slow"));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_leaf_cost_skips_loops() {
        let record = |kind, cost| StepRecord {
            step_name: "s".into(),
            kind,
            scope: ROOT_SCOPE.into(),
            value: Value::Null,
            duration_ms: 0,
            cost_usd: cost,
        };
        assert_eq!(leaf_cost(&[record(StepKind::Transform, None)]), None);
        assert_eq!(
            leaf_cost(&[
                record(StepKind::Prompt, Some(0.25)),
                record(StepKind::ForEach, Some(0.25)),
                record(StepKind::Evaluate, Some(0.5)),
            ]),
            Some(0.75)
        );
    }
}
