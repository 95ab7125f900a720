// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! End-to-end runs through the public API

mod common;

use std::sync::{Arc, Mutex};

use ai_pipelines::llm::ModelResponse;
use ai_pipelines::pipeline::{FindingKind, RunEvent, StepKind};
use ai_pipelines::PipelineError;
use common::{pipeline, runner, MockModel};
use serde_json::json;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_nested_loop_reads_outer_binding() {
    let definition = pipeline(
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
    name: each
    arguments: "[1, 2, 3]"
    steps:
      - kind: transform
        name: nested
        arguments: step1 + item_index
"#,
    );

    let model = MockModel::default();
    let result = runner(&model).run(&definition, json!({"count": 3})).await.unwrap();

    assert_eq!(result.output, json!([6, 7, 8]));
    let ledger: Vec<(&str, &str)> = result
        .steps
        .iter()
        .map(|r| (r.step_name.as_str(), r.scope.as_str()))
        .collect();
    assert_eq!(
        ledger,
        vec![
            ("step1", "root"),
            ("nested", "root.each[0]"),
            ("nested", "root.each[1]"),
            ("nested", "root.each[2]"),
            ("each", "root"),
        ]
    );
    assert_eq!(model.calls(), 0);
    assert_eq!(result.total_cost_usd, 0.0);
}

#[tokio::test]
async fn test_iteration_bindings_do_not_leak() {
    // each iteration binds `label` afresh; a second binding in the same
    // scope would be a duplicate-name error
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: for_each
    name: each
    arguments: "['a', 'b']"
    steps:
      - kind: transform
        name: label
        arguments: item & '-' & $string(item_index)
  - kind: transform
    name: after
    arguments: each
"#,
    );

    let result = runner(&MockModel::default())
        .run(&definition, json!({}))
        .await
        .unwrap();
    assert_eq!(result.output, json!(["a-0", "b-1"]));
}

#[tokio::test]
async fn test_loop_locals_are_unresolved_outside() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: for_each
    name: each
    arguments: "[1]"
    steps:
      - kind: transform
        name: inner
        arguments: item
  - kind: transform
    name: after
    arguments: inner
"#,
    );

    let err = runner(&MockModel::default())
        .run(&definition, json!({}))
        .await
        .unwrap_err();
    match err {
        PipelineError::InvalidPipeline { findings } => {
            assert_eq!(findings.len(), 1);
            assert_eq!(findings[0].kind, FindingKind::UnresolvedReference);
            assert_eq!(findings[0].step.as_deref(), Some("after"));
        }
        other => panic!("expected InvalidPipeline, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reserved_name_never_runs() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: for_each
    name: each
    arguments: "[1, 2]"
    steps:
      - kind: transform
        name: item
        arguments: item
"#,
    );

    let started = Arc::new(Mutex::new(0usize));
    let seen = started.clone();
    let mut runner = runner(&MockModel::default());
    runner.on_event(move |event| {
        if let RunEvent::StepStarted { .. } = event {
            *seen.lock().unwrap() += 1;
        }
    });

    let err = runner.run(&definition, json!({})).await.unwrap_err();
    assert_eq!(err.kind_name(), "InvalidPipeline");
    assert_eq!(*started.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_and_unresolved_reported_together() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: transform
    name: a
    arguments: input
  - kind: for_each
    name: each
    arguments: "[1]"
    steps:
      - kind: transform
        name: a
        arguments: nowhere.field
"#,
    );

    let err = assert_err!(runner(&MockModel::default()).run(&definition, json!({})).await);
    let PipelineError::InvalidPipeline { findings } = err else {
        panic!("expected InvalidPipeline");
    };
    let kinds: Vec<FindingKind> = findings.iter().map(|f| f.kind).collect();
    assert!(kinds.contains(&FindingKind::DuplicateName));
    assert!(kinds.contains(&FindingKind::UnresolvedReference));
}

#[tokio::test]
async fn test_expression_error_is_not_rewrapped() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: transform
    name: doubled
    arguments: input.name * 2
"#,
    );

    let err = runner(&MockModel::default())
        .run(&definition, json!({"name": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Expression { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_handler_failure_names_the_step() {
    let dir = TempDir::new().unwrap();
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: read_file
    name: source
    arguments: input.path
"#,
    );

    let missing = dir.path().join("missing.txt");
    let err = runner(&MockModel::default())
        .run(&definition, json!({"path": missing.to_string_lossy()}))
        .await
        .unwrap_err();
    match err {
        PipelineError::StepExecution { step, kind, message } => {
            assert_eq!(step, "source");
            assert_eq!(kind, StepKind::ReadFile);
            assert!(message.contains("File not found"), "{}", message);
        }
        other => panic!("expected StepExecution, got {:?}", other),
    }
}

#[tokio::test]
async fn test_files_chunks_and_loop() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("b.md"), "bbbbbb").unwrap();
    std::fs::write(dir.path().join("a.md"), "aaa").unwrap();
    std::fs::write(dir.path().join("skip.txt"), "nope").unwrap();

    let definition = pipeline(
        r#"
input:
  type: object
  properties: { dir: { type: string } }
  required: [dir]
steps:
  - kind: find_files
    name: docs
    arguments: input.dir
    pattern: "*.md"
  - kind: for_each
    name: per_doc
    arguments: docs
    steps:
      - kind: read_file
        name: body
        arguments: item.path
      - kind: chunk
        name: pieces
        arguments: body
        chunk_size: 4
        overlap: 1
      - kind: transform
        name: summary
        arguments: '{"file": item.name, "chunks": $count(pieces.chunks)}'
"#,
    );

    let result = assert_ok!(
        runner(&MockModel::default())
            .run(&definition, json!({"dir": dir.path().to_string_lossy()}))
            .await
    );
    assert_eq!(
        result.output,
        json!([
            {"file": "a.md", "chunks": 1},
            {"file": "b.md", "chunks": 2}
        ])
    );
}

#[tokio::test]
async fn test_structured_block_beats_conflicting_text() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: prompt
    name: verdict
    arguments: '{"topic": input.topic}'
    template: "Is {{ args.topic }} good?"
    output:
      type: object
      properties: { good: { type: boolean } }
      required: [good]
"#,
    );

    let model = MockModel::new(vec![ModelResponse {
        structured_output: Some(json!({"good": true})),
        result: Some(r#"{"good": false}"#.into()),
        cost_usd: Some(0.02),
        is_error: false,
    }]);
    let result = runner(&model)
        .run(&definition, json!({"topic": "rust"}))
        .await
        .unwrap();

    assert_eq!(result.output, json!({"good": true}));
    assert_eq!(result.total_cost_usd, 0.02);
    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "Is rust good?");
    assert!(requests[0].output_schema.is_some());
}

#[tokio::test]
async fn test_unusable_model_output_is_llm_error() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: prompt
    name: verdict
    template: "Anything?"
    output:
      type: object
      required: [good]
"#,
    );

    let model = MockModel::new(vec![ModelResponse::text("no json here")]);
    let err = runner(&model).run(&definition, json!({})).await.unwrap_err();
    assert!(matches!(err, PipelineError::Llm { ref step, .. } if step == "verdict"));
}

#[tokio::test]
async fn test_loop_cost_counts_once() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: for_each
    name: each
    arguments: "['x', 'y']"
    steps:
      - kind: prompt
        name: echo
        arguments: '{"word": item}'
        template: "Say {{ args.word }}"
"#,
    );

    let model = MockModel::new(vec![
        ModelResponse::text("x").with_cost(0.25),
        ModelResponse::text("y").with_cost(0.5),
    ]);
    let result = runner(&model).run(&definition, json!({})).await.unwrap();

    assert_eq!(result.output, json!(["x", "y"]));
    let each = result.steps.last().unwrap();
    assert_eq!(each.step_name, "each");
    assert_eq!(each.cost_usd, Some(0.75));
    assert_eq!(result.total_cost_usd, 0.75);
}

#[tokio::test]
async fn test_evaluate_faithfulness() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: evaluate
    name: judged
    strategy: faithfulness
    arguments: '{"source": input.source, "response": input.response}'
"#,
    );

    let model = MockModel::structured(
        vec![
            json!({"claims": [
                {"claim": "Paris is in France", "original_sentence": "Paris is in France."},
                {"claim": "Paris has 90M people", "original_sentence": "It has 90M people."}
            ]}),
            json!({"verdicts": [
                {"claim": "Paris is in France", "verdict": 1, "reasoning": "stated"},
                {"claim": "Paris has 90M people", "verdict": 0, "reasoning": "not stated"}
            ]}),
        ],
        0.01,
    );
    let result = runner(&model)
        .run(
            &definition,
            json!({"source": "Paris is the capital of France.", "response": "Paris is in France. It has 90M people."}),
        )
        .await
        .unwrap();

    assert_eq!(result.output["score"], json!(0.5));
    assert_eq!(result.output["supported_claims"], json!(1));
    assert_eq!(model.calls(), 2);
    assert_eq!(result.total_cost_usd, 0.02);
}

#[tokio::test]
async fn test_input_must_match_schema() {
    let definition = pipeline(
        r#"
input:
  type: object
  required: [dir]
steps:
  - kind: transform
    name: echo
    arguments: input.dir
"#,
    );

    let err = runner(&MockModel::default())
        .run(&definition, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind_name(), "ValidationError");
}

#[tokio::test]
async fn test_structured_block_outside_bounds_is_llm_error() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: prompt
    name: rating
    template: "Rate it from 0 to 1"
    output:
      type: object
      properties:
        score: { type: number, minimum: 0, maximum: 1 }
        label: { type: string, minLength: 1 }
      required: [score]
"#,
    );

    let model = MockModel::structured(vec![json!({"score": 5})], 0.01);
    let err = runner(&model).run(&definition, json!({})).await.unwrap_err();
    match err {
        PipelineError::Llm { step, message } => {
            assert_eq!(step, "rating");
            assert!(message.contains("maximum"), "{}", message);
        }
        other => panic!("expected Llm, got {:?}", other),
    }

    let model = MockModel::structured(vec![json!({"score": 0.5, "label": ""})], 0.01);
    let err = runner(&model).run(&definition, json!({})).await.unwrap_err();
    assert_eq!(err.kind_name(), "LLMError");
}

#[tokio::test]
async fn test_input_bounds_are_enforced() {
    let definition = pipeline(
        r#"
input:
  type: object
  properties: { limit: { type: integer, minimum: 1 } }
  required: [limit]
steps:
  - kind: transform
    name: echo
    arguments: input.limit
"#,
    );

    let err = runner(&MockModel::default())
        .run(&definition, json!({"limit": 0}))
        .await
        .unwrap_err();
    assert_eq!(err.kind_name(), "ValidationError");
    assert!(err.to_string().contains("/limit"), "{}", err);
}

#[tokio::test]
async fn test_huge_numeric_arguments() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: transform
    name: tail
    arguments: $substring(input.text, 1, 1e19)
  - kind: transform
    name: head
    arguments: $substring(input.text, -1e19, 2)
"#,
    );

    let result = runner(&MockModel::default())
        .run(&definition, json!({"text": "abc"}))
        .await
        .unwrap();
    assert_eq!(result.steps[0].value, json!("bc"));
    assert_eq!(result.output, json!("ab"));

    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: transform
    name: span
    arguments: "[-1e19..1e19]"
"#,
    );
    let err = runner(&MockModel::default())
        .run(&definition, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Expression { .. }), "{:?}", err);
    assert!(err.to_string().contains("too large"), "{}", err);
}

#[tokio::test]
async fn test_repeated_runs_produce_the_same_ledger() {
    let definition = pipeline(
        r#"
input: { type: object }
steps:
  - kind: transform
    name: words
    arguments: "['alpha', 'beta', 'gamma']"
  - kind: for_each
    name: each
    arguments: words
    steps:
      - kind: prompt
        name: echo
        arguments: '{"word": item}'
        template: "Repeat {{ args.word }}"
      - kind: transform
        name: tagged
        arguments: echo & '#' & $string(item_index)
"#,
    );

    let responses = || {
        vec![
            ModelResponse::text("alpha"),
            ModelResponse::text("beta"),
            ModelResponse::text("gamma"),
        ]
    };

    let mut ledgers = Vec::new();
    for _ in 0..2 {
        let model = MockModel::new(responses());
        let result = runner(&model).run(&definition, json!({})).await.unwrap();
        let ledger: Vec<(String, String, serde_json::Value)> = result
            .steps
            .into_iter()
            .map(|r| (r.step_name, r.scope, r.value))
            .collect();
        ledgers.push((ledger, result.output));
    }

    assert_eq!(ledgers[0], ledgers[1]);
    assert_eq!(ledgers[0].1, json!(["alpha#0", "beta#1", "gamma#2"]));
    assert_eq!(ledgers[0].0.len(), 8);
}
