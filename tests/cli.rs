// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Binary tests for `run` and `validate`

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const LOOP_PIPELINE: &str = r#"
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
"#;

const BROKEN_PIPELINE: &str = r#"
input: { type: object }
steps:
  - kind: transform
    name: a
    arguments: input
  - kind: transform
    name: b
    arguments: nowhere.x
"#;

/// A scratch directory with an empty settings file
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("ai-pipelines").unwrap();
        cmd.current_dir(self.path())
            .arg("--config")
            .arg(self.path().join("config.toml"))
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .env_remove("AI_PIPELINES_LOG_DIR")
            .env_remove("AI_PIPELINES_CLAUDE")
            .env_remove("AI_PIPELINES_TIMEOUT");
        cmd
    }
}

#[test]
fn test_validate_valid_pipeline() {
    let ws = Workspace::new();
    ws.write("loop.yaml", LOOP_PIPELINE);

    ws.cmd()
        .args(["validate", "loop.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid (3 steps)"));
}

#[test]
fn test_validate_reports_findings() {
    let ws = Workspace::new();
    ws.write("broken.yaml", BROKEN_PIPELINE);

    ws.cmd()
        .args(["validate", "broken.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "[error] b.arguments: Reference 'nowhere' is not available",
        ))
        .stderr(predicate::str::contains("1 error(s), 0 warning(s)"));
}

#[test]
fn test_validate_json_format() {
    let ws = Workspace::new();
    ws.write("broken.yaml", BROKEN_PIPELINE);

    let output = ws
        .cmd()
        .args(["validate", "broken.yaml", "--format", "json"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["findings"][0]["kind"], json!("unresolved_reference"));
    assert_eq!(report["findings"][0]["step"], json!("b"));
    assert_eq!(report["findings"][0]["severity"], json!("error"));
}

#[test]
fn test_run_prints_result_json() {
    let ws = Workspace::new();
    ws.write("loop.yaml", LOOP_PIPELINE);

    let output = ws
        .cmd()
        .args(["run", "loop.yaml", "-i", "count=3"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["output"], json!([6, 7, 8]));
    assert_eq!(result["steps"].as_array().unwrap().len(), 5);
    assert_eq!(result["total_cost_usd"], json!(0.0));
}

#[test]
fn test_run_writes_output_file_and_log() {
    let ws = Workspace::new();
    ws.write("loop.yaml", LOOP_PIPELINE);
    ws.write("input.json", r#"{"count": 1}"#);

    ws.cmd()
        .args([
            "run",
            "loop.yaml",
            "--input-json",
            "input.json",
            "-o",
            "out.json",
            "--log-dir",
            "logs",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Output written to"));

    let result: Value =
        serde_json::from_str(&std::fs::read_to_string(ws.path().join("out.json")).unwrap())
            .unwrap();
    assert_eq!(result["output"], json!([2, 3, 4]));

    let log = std::fs::read_to_string(ws.path().join("logs").join("pipeline.log")).unwrap();
    let lines: Vec<Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(lines
        .iter()
        .any(|line| line["fields"]["message"] == json!("Step completed")
            && line["fields"]["step_name"] == json!("step1")));
}

#[test]
fn test_run_rejects_input_outside_schema() {
    let ws = Workspace::new();
    ws.write("loop.yaml", LOOP_PIPELINE);

    ws.cmd()
        .args(["run", "loop.yaml", "-i", "count=three"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("does not match its schema"));
}

#[test]
fn test_run_missing_pipeline() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["run", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Pipeline file not found"));
}

#[test]
fn test_run_refuses_invalid_pipeline() {
    let ws = Workspace::new();
    ws.write("broken.yaml", BROKEN_PIPELINE);

    ws.cmd()
        .args(["run", "broken.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Reference 'nowhere' is not available"));
}
