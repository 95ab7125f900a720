// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Validate command - check a pipeline without running it

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use super::OutputFormat;
use crate::pipeline::{PipelineDefinition, PipelineValidator, ValidationReport};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, format: OutputFormat, verbose: bool) -> Result<()> {
    let pipeline = PipelineDefinition::from_file(&pipeline_path)?;
    let report = PipelineValidator::validate(&pipeline);

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).into_diagnostic()?
            );
        }
        OutputFormat::Text => print_text(&pipeline, &report, verbose),
    }

    if report.is_valid() {
        Ok(())
    } else {
        Err(miette::miette!(
            "Pipeline {} is invalid",
            pipeline_path.display()
        ))
    }
}

fn print_text(pipeline: &PipelineDefinition, report: &ValidationReport, verbose: bool) {
    for finding in report.errors() {
        eprintln!("  {} {}", "✗".red(), finding);
    }
    for finding in report.warnings() {
        eprintln!("  {} {}", "⚠".yellow(), finding);
    }

    if report.is_valid() {
        println!(
            "{} Pipeline is valid ({} steps)",
            "✓".green(),
            pipeline.total_steps()
        );
    }

    if !report.findings.is_empty() {
        eprintln!();
        eprintln!("{}", summary(report));
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        if let Some(description) = &pipeline.description {
            println!("  Description: {}", description);
        }
        for step in &pipeline.steps {
            println!("  • {} {}", step.name(), step.kind().to_string().dimmed());
        }
    }
}

/// `N error(s), M warning(s)`
pub fn summary(report: &ValidationReport) -> String {
    format!(
        "{} error(s), {} warning(s)",
        report.errors().count(),
        report.warnings().count()
    )
}
