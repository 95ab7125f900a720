// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! # ai-pipelines - YAML-driven LLM pipeline executor
//!
//! A pipeline is a YAML document declaring an input schema and an ordered
//! list of steps. Each step evaluates a JSONata-style `arguments`
//! expression against everything bound so far and binds its result under
//! its name for later steps.
//!
//! ## Features
//!
//! - **Pre-flight validation** - duplicate names, unresolved references and
//!   template/argument mismatches are reported before any step runs
//! - **Step kinds** - `read_file`, `find_files`, `transform`, `chunk`,
//!   `prompt`, `evaluate` and `for_each`
//! - **Structured output** - prompt results are reconciled against a JSON
//!   schema
//! - **LLM-as-judge** - summarization, faithfulness, hallucination and
//!   RAG-context scoring strategies
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a pipeline
//! ai-pipelines validate review.yaml
//!
//! # Run it
//! ai-pipelines run review.yaml -i dir=src
//! ```

pub mod cli;
pub mod errors;
pub mod expression;
pub mod judge;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod steps;
pub mod template;

// Re-export commonly used types
pub use errors::PipelineError;
pub use pipeline::{PipelineDefinition, PipelineResult, PipelineRunner, PipelineValidator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
