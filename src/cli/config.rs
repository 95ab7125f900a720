// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! User settings
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! the environment and command-line flags (both handled by clap, see
//! [`Settings::apply`]). The file lives at
//! `<config dir>/ai-pipelines/config.toml` unless `--config` points
//! elsewhere:
//!
//! ```toml
//! claude_path = "/usr/local/bin/claude"
//! model_timeout_secs = 600
//! step_timeout_secs = 900
//! log_dir = "/var/log/ai-pipelines"
//! ```

use directories::ProjectDirs;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Seconds a single model call may take unless configured otherwise
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 600;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// `claude` executable; looked up on PATH when unset
    pub claude_path: Option<PathBuf>,
    pub model_timeout_secs: Option<u64>,
    pub step_timeout_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub claude_path: Option<PathBuf>,
    pub model_timeout_secs: Option<u64>,
    pub step_timeout_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from `explicit`, or from the default location.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).into_diagnostic()
    }

    /// Layer command-line and environment values over the file's
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if overrides.claude_path.is_some() {
            self.claude_path = overrides.claude_path;
        }
        if overrides.model_timeout_secs.is_some() {
            self.model_timeout_secs = overrides.model_timeout_secs;
        }
        if overrides.step_timeout_secs.is_some() {
            self.step_timeout_secs = overrides.step_timeout_secs;
        }
        if overrides.log_dir.is_some() {
            self.log_dir = overrides.log_dir;
        }
        self
    }

    pub fn model_timeout_secs(&self) -> u64 {
        self.model_timeout_secs.unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

/// `<config dir>/ai-pipelines/config.toml`, when the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ai-pipelines").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
