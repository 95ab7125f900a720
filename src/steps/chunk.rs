// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! `chunk` steps: overlapping character windows

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{wrong_step, StepHandler, StepOutput};
use crate::pipeline::{StepKind, StepSpec};

pub struct ChunkHandler;

#[async_trait]
impl StepHandler for ChunkHandler {
    fn kind(&self) -> StepKind {
        StepKind::Chunk
    }

    /// Produces `{"chunks": [{"text", "index"}]}` so later steps can loop
    /// over `name.chunks`
    async fn run(&self, step: &StepSpec, arguments: Value) -> anyhow::Result<StepOutput> {
        let StepSpec::Chunk {
            chunk_size,
            overlap,
            ..
        } = step
        else {
            return Err(wrong_step(self.kind(), step));
        };

        if *chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }

        let text = match arguments {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        let chunks: Vec<Value> = split_chunks(&text, *chunk_size, *overlap)
            .into_iter()
            .enumerate()
            .map(|(index, text)| json!({"text": text, "index": index}))
            .collect();

        Ok(StepOutput::value(json!({ "chunks": chunks })))
    }
}

/// Split `text` into windows of `size` characters, each starting
/// `size - overlap` characters after the previous one
///
/// An overlap of `size` or more is clamped to `size - 1`.
pub fn split_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let stride = size - overlap.min(size - 1);

    (0..chars.len())
        .step_by(stride)
        .map(|start| chars[start..(start + size).min(chars.len())].iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_with_overlap() {
        assert_eq!(split_chunks("abcdefghij", 4, 1), vec!["abcd", "defg", "ghij", "j"]);
    }

    #[test]
    fn test_split_without_overlap() {
        assert_eq!(split_chunks("abcdef", 3, 0), vec!["abc", "def"]);
    }

    #[test]
    fn test_overlap_is_clamped() {
        assert_eq!(split_chunks("abc", 2, 5), vec!["ab", "bc", "c"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(split_chunks("", 10, 2).is_empty());
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        assert_eq!(split_chunks("héllo", 2, 0), vec!["hé", "ll", "o"]);
    }

    #[tokio::test]
    async fn test_handler_output_shape() {
        let step = StepSpec::Chunk {
            name: "pieces".into(),
            arguments: "input.text".into(),
            chunk_size: 5,
            overlap: 0,
        };
        let out = ChunkHandler.run(&step, json!("hello world")).await.unwrap();
        assert_eq!(
            out.value,
            json!({"chunks": [
                {"text": "hello", "index": 0},
                {"text": " worl", "index": 1},
                {"text": "d", "index": 2}
            ]})
        );
        assert_eq!(out.cost_usd, None);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_fails() {
        let step = StepSpec::Chunk {
            name: "pieces".into(),
            arguments: "input.text".into(),
            chunk_size: 0,
            overlap: 0,
        };
        assert!(ChunkHandler.run(&step, json!("x")).await.is_err());
    }
}
