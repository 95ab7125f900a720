// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for ai-pipelines.

pub mod config;
mod progress;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// YAML-driven LLM pipeline executor
#[derive(Parser, Debug)]
#[clap(
    name = "ai-pipelines",
    version,
    about = "YAML-driven LLM pipeline executor",
    long_about = None,
    after_help = "Examples:\n\
        ai-pipelines validate review.yaml                Check a pipeline without running it\n\
        ai-pipelines run review.yaml -i dir=src          Run with an input value\n\
        ai-pipelines run review.yaml --input-json in.json -o out.json\n\n\
        See 'ai-pipelines <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Settings file (default: <config dir>/ai-pipelines/config.toml)
    #[clap(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Also write JSON-lines logs to DIR/pipeline.log
    #[clap(long, global = true, value_name = "DIR", env = "AI_PIPELINES_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a pipeline
    Run {
        /// Pipeline YAML file
        pipeline: PathBuf,

        /// Input value (repeatable); VALUE is parsed as JSON when possible
        #[clap(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Read the pipeline input from a JSON file
        #[clap(long, value_name = "FILE")]
        input_json: Option<PathBuf>,

        /// Write the JSON result to a file instead of stdout
        #[clap(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Abort when a single step runs longer than this
        #[clap(long, value_name = "SECS")]
        step_timeout: Option<u64>,

        /// Path to the claude executable
        #[clap(long, value_name = "PATH", env = "AI_PIPELINES_CLAUDE")]
        claude: Option<PathBuf>,

        /// Timeout for a single model call
        #[clap(long, value_name = "SECS", env = "AI_PIPELINES_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Validate a pipeline without executing it
    Validate {
        /// Pipeline YAML file
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

/// Output format for the validate command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "ai-pipelines",
            "run",
            "p.yaml",
            "-i",
            "dir=src",
            "--input",
            "limit=3",
            "--step-timeout",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                pipeline,
                inputs,
                step_timeout,
                ..
            } => {
                assert_eq!(pipeline, PathBuf::from("p.yaml"));
                assert_eq!(inputs, vec!["dir=src", "limit=3"]);
                assert_eq!(step_timeout, Some(30));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_output_format() {
        assert_eq!(OutputFormat::from_str("JSON", true), Ok(OutputFormat::Json));
        assert!(OutputFormat::from_str("xml", true).is_err());
    }
}
