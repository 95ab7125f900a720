// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Claude CLI client
//!
//! Runs `claude -p --output-format json` as a subprocess with the prompt on
//! stdin and reads the JSON result envelope from stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ModelClient, ModelError, ModelRequest, ModelResponse};

/// Model client backed by the `claude` executable
#[derive(Debug, Clone)]
pub struct ClaudeCliClient {
    claude_path: PathBuf,
    timeout_secs: u64,
}

impl ClaudeCliClient {
    pub fn new(claude_path: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            claude_path: claude_path.into(),
            timeout_secs,
        }
    }

    /// Find `claude` on `PATH`
    pub fn locate(timeout_secs: u64) -> Result<Self, ModelError> {
        let path = which::which("claude").map_err(|_| {
            ModelError::Internal(
                "could not find 'claude' on PATH; install Claude Code or set AI_PIPELINES_CLAUDE"
                    .to_string(),
            )
        })?;
        Ok(Self::new(path, timeout_secs))
    }

    pub fn claude_path(&self) -> &Path {
        &self.claude_path
    }

    fn args(request: &ModelRequest) -> Result<Vec<String>, ModelError> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--model".to_string(),
            request.model.to_string(),
        ];
        if let Some(system_prompt) = &request.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        if let Some(schema) = &request.output_schema {
            let schema = serde_json::to_string(schema)
                .map_err(|e| ModelError::Internal(format!("could not encode schema: {}", e)))?;
            args.push("--json-schema".to_string());
            args.push(schema);
        }
        Ok(args)
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<std::process::Output, ModelError> {
        let mut child = Command::new(&self.claude_path)
            .args(Self::args(request)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ModelError::Internal(format!(
                    "failed to start {}: {}",
                    self.claude_path.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| ModelError::Internal(format!("failed to send prompt: {}", e)))?;
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| ModelError::Internal(format!("failed to read claude output: {}", e)))
    }
}

#[async_trait]
impl ModelClient for ClaudeCliClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        debug!(
            model = %request.model,
            prompt_len = request.prompt.len(),
            structured = request.output_schema.is_some(),
            "Calling claude"
        );

        let output = timeout(
            Duration::from_secs(self.timeout_secs),
            self.invoke(&request),
        )
        .await
        .map_err(|_| ModelError::Timeout(self.timeout_secs))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_envelope(&stdout) {
            Ok(response) => Ok(response),
            Err(err) if output.status.success() => Err(err),
            Err(_) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code().unwrap_or(-1);
                warn!("claude exited with code {}: {}", exit_code, stderr.trim());
                Err(ModelError::Api(format!(
                    "claude exited with code {}: {}",
                    exit_code,
                    stderr.trim()
                )))
            }
        }
    }
}

/// The fields of the result envelope we use; everything else is ignored
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    structured_output: Option<Value>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    is_error: bool,
}

/// Parse stdout of `claude --output-format json`
///
/// Accepts either the single result object or a list of messages (as
/// printed with `--verbose`), in which case the last `result` message is
/// used.
pub(crate) fn parse_envelope(stdout: &str) -> Result<ModelResponse, ModelError> {
    let raw: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| ModelError::Api(format!("claude output is not JSON: {}", e)))?;

    let raw = match raw {
        Value::Array(messages) => messages
            .into_iter()
            .rev()
            .find(|m| m.get("type").and_then(Value::as_str) == Some("result"))
            .ok_or_else(|| ModelError::Api("claude output has no result message".to_string()))?,
        other => other,
    };

    let envelope: Envelope = serde_json::from_value(raw)
        .map_err(|e| ModelError::Api(format!("unexpected claude output: {}", e)))?;

    if let Some(kind) = envelope.kind.as_deref() {
        if kind != "result" {
            debug!(kind, "claude envelope has unexpected type");
        }
    }

    Ok(ModelResponse {
        structured_output: envelope.structured_output.filter(|v| !v.is_null()),
        result: envelope.result,
        cost_usd: envelope.total_cost_usd,
        is_error: envelope.is_error,
    })
}
