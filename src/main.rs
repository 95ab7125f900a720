// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! ai-pipelines - YAML-driven LLM pipeline executor

use clap::Parser;
use miette::Result;

use ai_pipelines::cli::config::{Overrides, Settings};
use ai_pipelines::cli::run::InputSource;
use ai_pipelines::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let mut overrides = Overrides {
        log_dir: cli.log_dir.clone(),
        ..Overrides::default()
    };
    if let Commands::Run {
        step_timeout,
        claude,
        timeout,
        ..
    } = &cli.command
    {
        overrides.claude_path = claude.clone();
        overrides.model_timeout_secs = *timeout;
        overrides.step_timeout_secs = *step_timeout;
    }
    let settings = Settings::load(cli.config.as_deref())?.apply(overrides);

    ai_pipelines::logging::init(cli.verbose, settings.log_dir.as_deref())?;

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            pipeline,
            inputs,
            input_json,
            output,
            ..
        } => {
            let source = InputSource {
                pairs: inputs,
                json_file: input_json,
            };
            ai_pipelines::cli::run::run(pipeline, source, output, settings).await
        }
        Commands::Validate { pipeline, format } => {
            ai_pipelines::cli::validate::run(pipeline, format, cli.verbose).await
        }
    }
}
