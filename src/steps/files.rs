// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! `read_file` and `find_files` steps

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{wrong_step, StepHandler, StepOutput};
use crate::expression::type_name;
use crate::pipeline::{StepKind, StepSpec};

/// Reads a file as UTF-8 text
pub struct ReadFileHandler;

#[async_trait]
impl StepHandler for ReadFileHandler {
    fn kind(&self) -> StepKind {
        StepKind::ReadFile
    }

    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput> {
        if !matches!(step, StepSpec::ReadFile { .. }) {
            return Err(wrong_step(self.kind(), step));
        }

        // Either "item.path" or an object such as a find_files entry
        let path = match &arguments {
            Value::String(path) => PathBuf::from(path),
            Value::Object(map) => match map.get("path") {
                Some(Value::String(path)) => PathBuf::from(path),
                _ => bail!("read_file arguments object has no string 'path'"),
            },
            other => bail!(
                "read_file arguments must be a path or an object with 'path', got {}",
                type_name(other)
            ),
        };

        if !path.is_file() {
            bail!("File not found: {}", path.display());
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        Ok(StepOutput::value(Value::String(text)))
    }
}

/// Globs files in a directory
pub struct FindFilesHandler;

#[async_trait]
impl StepHandler for FindFilesHandler {
    fn kind(&self) -> StepKind {
        StepKind::FindFiles
    }

    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput> {
        let StepSpec::FindFiles { pattern, .. } = step else {
            return Err(wrong_step(self.kind(), step));
        };

        let directory = match &arguments {
            Value::String(dir) => PathBuf::from(dir),
            other => bail!(
                "find_files arguments must resolve to a directory path, got {}",
                type_name(other)
            ),
        };

        if !directory.is_dir() {
            bail!("Directory not found: {}", directory.display());
        }

        let files = find_files(&directory, pattern)?;
        Ok(StepOutput::value(Value::Array(files)))
    }
}

/// Files under `base` matching `pattern`, as `{name, path}` sorted by name
fn find_files(base: &Path, pattern: &str) -> anyhow::Result<Vec<Value>> {
    let full_pattern = base.join(pattern).to_string_lossy().to_string();

    let mut files: Vec<(String, String)> = glob::glob(&full_pattern)
        .with_context(|| format!("invalid glob pattern '{}'", pattern))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .filter_map(|p| {
            let name = p.file_name()?.to_string_lossy().to_string();
            Some((name, p.to_string_lossy().to_string()))
        })
        .collect();

    files.sort();

    Ok(files
        .into_iter()
        .map(|(name, path)| json!({"name": name, "path": path}))
        .collect())
}
