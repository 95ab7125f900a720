// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Error taxonomy
//!
//! Every failure that crosses the runner boundary is one of the variants of
//! [`PipelineError`]. Step handlers may fail with anything (`anyhow::Error`);
//! the runner keeps taxonomy errors as they are and wraps everything else
//! exactly once into [`PipelineError::StepExecution`].

use miette::Diagnostic;
use thiserror::Error;

use crate::pipeline::{Finding, StepKind};

/// Result type for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Main error type for ai-pipelines
#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    // ─────────────────────────────────────────────────────────────────────────
    // Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to load pipeline: {message}")]
    #[diagnostic(code(ai_pipelines::load))]
    PipelineLoad {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Pipeline failed pre-flight validation ({} error(s))", count_errors(.findings))]
    #[diagnostic(
        code(ai_pipelines::invalid_pipeline),
        help("Run 'ai-pipelines validate' to list every finding")
    )]
    InvalidPipeline { findings: Vec<Finding> },

    // ─────────────────────────────────────────────────────────────────────────
    // Data Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(ai_pipelines::validation))]
    Validation { message: String },

    #[error("Expression '{expression}' failed: {message}")]
    #[diagnostic(
        code(ai_pipelines::expression),
        help("Expressions use JSONata syntax, e.g. input.dir or {{\"key\": item.name}}")
    )]
    Expression { expression: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Step '{step}' ({kind}) failed: {message}")]
    #[diagnostic(code(ai_pipelines::step_failed))]
    StepExecution {
        step: String,
        kind: StepKind,
        message: String,
    },

    #[error("LLM call in step '{step}' failed: {message}")]
    #[diagnostic(code(ai_pipelines::llm))]
    Llm { step: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Scope Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Name '{name}' is not bound in this scope or any enclosing scope")]
    #[diagnostic(code(ai_pipelines::name_resolution))]
    NameResolution { name: String },

    #[error("Name '{name}' is already bound in this scope")]
    #[diagnostic(
        code(ai_pipelines::duplicate_name),
        help("Step names must be unique across the whole pipeline")
    )]
    DuplicateName { name: String },
}

fn count_errors(findings: &[Finding]) -> usize {
    findings.iter().filter(|f| f.is_error()).count()
}

impl PipelineError {
    /// Wrap a non-taxonomy failure raised while running `step`.
    ///
    /// Taxonomy errors are returned unchanged so their kind survives.
    pub fn from_step_failure(step: &str, kind: StepKind, err: anyhow::Error) -> Self {
        match err.downcast::<PipelineError>() {
            Ok(taxonomy) => taxonomy,
            Err(other) => Self::StepExecution {
                step: step.to_string(),
                kind,
                message: format!("{:#}", other),
            },
        }
    }

    /// Stable short name of the error kind, used in logs and the CLI
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::PipelineLoad { .. } => "PipelineLoadError",
            Self::InvalidPipeline { .. } => "InvalidPipeline",
            Self::Validation { .. } => "ValidationError",
            Self::Expression { .. } => "ExpressionError",
            Self::StepExecution { .. } => "StepExecutionError",
            Self::Llm { .. } => "LLMError",
            Self::NameResolution { .. } => "NameResolutionError",
            Self::DuplicateName { .. } => "DuplicateNameError",
        }
    }

    pub(crate) fn load(message: impl Into<String>) -> Self {
        Self::PipelineLoad {
            message: message.into(),
            help: None,
        }
    }
}
