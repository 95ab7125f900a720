// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Run command - execute a pipeline

use colored::Colorize;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::config::Settings;
use super::progress;
use crate::errors::PipelineError;
use crate::expression::type_name;
use crate::llm::ClaudeCliClient;
use crate::pipeline::{PipelineDefinition, PipelineRunner, RunOptions};

/// Where the run's input comes from
#[derive(Debug, Clone, Default)]
pub struct InputSource {
    /// `KEY=VALUE` pairs, applied after the JSON file
    pub pairs: Vec<String>,
    pub json_file: Option<PathBuf>,
}

/// Run the pipeline
pub async fn run(
    pipeline_path: PathBuf,
    inputs: InputSource,
    output: Option<PathBuf>,
    settings: Settings,
) -> Result<()> {
    let pipeline = PipelineDefinition::from_file(&pipeline_path)?;
    let input = parse_inputs(&inputs.pairs, inputs.json_file.as_deref())?;

    let client = claude_client(&settings);
    let mut runner = PipelineRunner::with_client(Arc::new(client)).with_options(RunOptions {
        step_timeout: settings.step_timeout(),
    });

    let spinner = progress::create_spinner("Loading pipeline");
    runner.on_event(progress::observer(spinner.clone()));

    let result = match runner.run(&pipeline, input).await {
        Ok(result) => result,
        Err(err) => {
            spinner.finish_and_clear();
            if let PipelineError::InvalidPipeline { findings } = &err {
                for finding in findings.iter().filter(|f| f.is_error()) {
                    eprintln!("  {} {}", "✗".red(), finding);
                }
            }
            return Err(err.into());
        }
    };

    let text = serde_json::to_string_pretty(&result).into_diagnostic()?;
    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Output written to {}", path.display().to_string().bold());
        }
        None => println!("{}", text),
    }

    Ok(())
}

/// The `claude` client for this run.
///
/// When no path is configured and `claude` is not on PATH the bare name is
/// kept, so pipelines without model steps still run and model steps fail
/// with a clear error.
fn claude_client(settings: &Settings) -> ClaudeCliClient {
    let timeout = settings.model_timeout_secs();
    match &settings.claude_path {
        Some(path) => ClaudeCliClient::new(path.clone(), timeout),
        None => ClaudeCliClient::locate(timeout).unwrap_or_else(|e| {
            debug!("{}", e);
            ClaudeCliClient::new("claude", timeout)
        }),
    }
}

/// Build the run input from an optional JSON file and `KEY=VALUE` pairs.
///
/// Pair values are parsed as JSON when they can be, otherwise kept as
/// strings; pairs override keys from the file.
pub fn parse_inputs(pairs: &[String], json_file: Option<&Path>) -> Result<Value> {
    let mut data = Map::new();

    if let Some(path) = json_file {
        let content = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let loaded: Value = serde_json::from_str(&content)
            .into_diagnostic()
            .wrap_err_with(|| format!("Invalid JSON in {}", path.display()))?;
        match loaded {
            Value::Object(map) => data.extend(map),
            other => {
                return Err(miette::miette!(
                    "--input-json must contain a JSON object, got {}",
                    type_name(&other)
                ))
            }
        }
    }

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(miette::miette!(
                "--input values must be KEY=VALUE, got '{}'",
                pair
            ));
        };
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        data.insert(key.to_string(), value);
    }

    Ok(Value::Object(data))
}
