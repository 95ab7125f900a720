// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Pipeline definitions, validation and execution
//!
//! This module holds the definition model loaded from YAML, the static
//! validator that vets it before any step runs, the scoped bindings steps
//! read from, and the runner that drives it all.

mod context;
mod definition;
mod runner;
pub mod schema;
mod validation;

pub use context::Scope;
pub use definition::*;
pub use runner::{
    Observer, PipelineResult, PipelineRunner, RunEvent, RunOptions, StepRecord, ROOT_SCOPE,
};
pub use validation::{
    Field, Finding, FindingKind, PipelineValidator, Severity, ValidationReport,
};
