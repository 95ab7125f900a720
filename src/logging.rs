// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Tracing setup for the binary
//!
//! Human-readable events go to stderr, filtered by `RUST_LOG` (default
//! `ai_pipelines=info`, or debug with `-v`). With a log directory, every
//! event is also appended as one JSON object per line to
//! `<dir>/pipeline.log`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use miette::{IntoDiagnostic, Result, WrapErr};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE: &str = "pipeline.log";

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "ai_pipelines=debug"
    } else {
        "ai_pipelines=info"
    }
}

/// Install the global subscriber
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(verbose).into());

    let json = match log_dir {
        Some(dir) => {
            let file = open_log(dir)?;
            Some(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(json)
        .try_init()
        .into_diagnostic()
        .wrap_err("Failed to install the log subscriber")
}

/// Path of the JSON log inside `dir`
pub fn log_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE)
}

fn open_log(dir: &Path) -> Result<fs::File> {
    fs::create_dir_all(dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = log_path(dir);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("logs").join("today");
        open_log(&nested).unwrap();
        assert!(log_path(&nested).is_file());
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(false), "ai_pipelines=info");
        assert_eq!(default_filter(true), "ai_pipelines=debug");
    }
}
