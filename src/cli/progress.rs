// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Terminal progress for `run`
//!
//! A spinner shows the step in flight; finished steps are printed above it
//! as one line each, indented by loop depth. Everything goes to stderr so
//! stdout stays clean for the JSON result.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::pipeline::{RunEvent, ROOT_SCOPE};

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Observer printing one line per finished step
pub fn observer(bar: ProgressBar) -> impl Fn(&RunEvent) + Send + Sync + 'static {
    move |event: &RunEvent| match event {
        RunEvent::RunStarted { total_steps } => {
            bar.set_message(format!("Running pipeline ({} steps)", total_steps));
        }
        RunEvent::StepStarted {
            step_name,
            kind,
            scope,
        } => {
            let message = format!("{} {} {}", kind, step_name, scope_suffix(scope));
            bar.set_message(message.trim_end().to_string());
        }
        RunEvent::StepSucceeded {
            step_name,
            kind,
            scope,
            duration,
            cost_usd,
        } => {
            let cost = cost_usd.map(|c| format!(", ${:.4}", c)).unwrap_or_default();
            let detail = format!("({}ms{})", duration.as_millis(), cost);
            bar.println(format!(
                "{}{} {} {} {}",
                indent(scope),
                "✓".green(),
                step_name,
                kind.to_string().dimmed(),
                detail.dimmed()
            ));
        }
        RunEvent::StepFailed {
            step_name,
            kind,
            scope,
            error,
        } => {
            bar.println(format!(
                "{}{} {} {} {}",
                indent(scope),
                "✗".red(),
                step_name,
                kind.to_string().dimmed(),
                error.red()
            ));
        }
        RunEvent::RunCompleted { duration, cost_usd } => {
            bar.finish_and_clear();
            eprintln!(
                "{} Pipeline completed in {}ms (${:.4})",
                "✓".green().bold(),
                duration.as_millis(),
                cost_usd
            );
        }
        RunEvent::RunAborted { error_kind, .. } => {
            bar.finish_and_clear();
            eprintln!("{} Pipeline aborted: {}", "✗".red().bold(), error_kind);
        }
    }
}

/// Loop depth of a scope label, `root` being 0
fn depth(scope: &str) -> usize {
    scope.matches('.').count()
}

fn indent(scope: &str) -> String {
    "  ".repeat(depth(scope) + 1)
}

fn scope_suffix(scope: &str) -> String {
    if scope == ROOT_SCOPE {
        String::new()
    } else {
        format!("in {}", scope)
    }
}
