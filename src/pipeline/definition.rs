// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Pipeline definition structures
//!
//! Defines the schema for pipeline YAML files: an `input` JSON schema and an
//! ordered list of steps discriminated by `kind`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use super::schema;
use crate::errors::PipelineError;

/// Names that steps must not use: they are bound by the runner itself
pub const RESERVED_NAMES: [&str; 3] = ["input", "item", "item_index"];

/// Pipeline definition from a YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// JSON schema the run input must satisfy
    pub input: Value,

    /// Pipeline description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Steps in execution order
    pub steps: Vec<StepSpec>,
}

impl PipelineDefinition {
    /// Load pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::PipelineLoad {
                message: format!("Pipeline file not found: {}", path.display()),
                help: Some("Pass the path to a pipeline YAML file".into()),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::load(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::load(format!("Invalid YAML: {}", e)))?;

        if !raw.is_mapping() {
            return Err(PipelineError::load(format!(
                "Pipeline YAML must be a mapping, got {}",
                yaml_type_name(&raw)
            )));
        }

        let definition: Self = serde_yaml::from_value(raw)
            .map_err(|e| PipelineError::load(format!("Pipeline structure invalid: {}", e)))?;

        if !definition.input.is_object() {
            return Err(PipelineError::load(
                "Pipeline 'input' must be a JSON schema object",
            ));
        }
        definition.compile_schemas()?;

        Ok(definition)
    }

    /// Reject `input` and prompt `output` schemas that do not compile
    fn compile_schemas(&self) -> Result<(), PipelineError> {
        fn invalid(owner: &str, reason: String) -> PipelineError {
            PipelineError::load(format!("Invalid JSON schema for {}: {}", owner, reason))
        }

        fn walk(steps: &[StepSpec]) -> Result<(), PipelineError> {
            for step in steps {
                match step {
                    StepSpec::Prompt(PromptSpec {
                        name,
                        output: Some(output),
                        ..
                    }) => {
                        schema::compile(output)
                            .map_err(|reason| invalid(&format!("'{}.output'", name), reason))?;
                    }
                    StepSpec::ForEach { steps, .. } => walk(steps)?,
                    _ => {}
                }
            }
            Ok(())
        }

        schema::compile(&self.input).map_err(|reason| invalid("'input'", reason))?;
        walk(&self.steps)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::load(e.to_string()))
    }

    /// Number of steps, counting loop bodies
    pub fn total_steps(&self) -> usize {
        fn count(steps: &[StepSpec]) -> usize {
            steps
                .iter()
                .map(|s| 1 + s.nested_steps().map(count).unwrap_or(0))
                .sum()
        }
        count(&self.steps)
    }
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "list",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

/// A single pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpec {
    /// Read a file as UTF-8 text
    ReadFile { name: String, arguments: String },

    /// Glob files in a directory
    FindFiles {
        name: String,
        arguments: String,
        pattern: String,
    },

    /// Reshape data with an expression
    Transform { name: String, arguments: String },

    /// Split text into overlapping chunks
    Chunk {
        name: String,
        arguments: String,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default = "default_overlap")]
        overlap: usize,
    },

    /// Render a template and call the model
    Prompt(PromptSpec),

    /// Score data with an LLM-as-judge strategy
    Evaluate {
        name: String,
        arguments: String,
        strategy: Strategy,
        #[serde(default = "default_judge_model")]
        model: Model,
    },

    /// Run nested steps once per element
    #[serde(alias = "pipeline")]
    ForEach {
        name: String,
        arguments: String,
        steps: Vec<StepSpec>,
    },
}

/// Fields of a `prompt` step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub name: String,

    /// Expression producing the template's `args`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,

    #[serde(default)]
    pub model: Model,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Jinja-style prompt template
    pub template: String,

    /// JSON schema the model output must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

fn default_chunk_size() -> usize {
    4000
}

fn default_overlap() -> usize {
    200
}

fn default_judge_model() -> Model {
    Model::Haiku
}

impl StepSpec {
    /// Unique step name
    pub fn name(&self) -> &str {
        match self {
            Self::ReadFile { name, .. }
            | Self::FindFiles { name, .. }
            | Self::Transform { name, .. }
            | Self::Chunk { name, .. }
            | Self::Evaluate { name, .. }
            | Self::ForEach { name, .. } => name,
            Self::Prompt(p) => &p.name,
        }
    }

    /// Step kind discriminant
    pub fn kind(&self) -> StepKind {
        match self {
            Self::ReadFile { .. } => StepKind::ReadFile,
            Self::FindFiles { .. } => StepKind::FindFiles,
            Self::Transform { .. } => StepKind::Transform,
            Self::Chunk { .. } => StepKind::Chunk,
            Self::Prompt(_) => StepKind::Prompt,
            Self::Evaluate { .. } => StepKind::Evaluate,
            Self::ForEach { .. } => StepKind::ForEach,
        }
    }

    /// The data-access expression, if the step has one
    pub fn arguments(&self) -> Option<&str> {
        match self {
            Self::ReadFile { arguments, .. }
            | Self::FindFiles { arguments, .. }
            | Self::Transform { arguments, .. }
            | Self::Chunk { arguments, .. }
            | Self::Evaluate { arguments, .. }
            | Self::ForEach { arguments, .. } => Some(arguments),
            Self::Prompt(p) => p.arguments.as_deref(),
        }
    }

    /// Loop body, for `for_each` steps
    pub fn nested_steps(&self) -> Option<&[StepSpec]> {
        match self {
            Self::ForEach { steps, .. } => Some(steps),
            _ => None,
        }
    }
}

/// Step kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ReadFile,
    FindFiles,
    Transform,
    Chunk,
    Prompt,
    Evaluate,
    ForEach,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::FindFiles => "find_files",
            Self::Transform => "transform",
            Self::Chunk => "chunk",
            Self::Prompt => "prompt",
            Self::Evaluate => "evaluate",
            Self::ForEach => "for_each",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model aliases understood by the model gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Haiku,
    #[default]
    Sonnet,
    Opus,
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Haiku => write!(f, "haiku"),
            Self::Sonnet => write!(f, "sonnet"),
            Self::Opus => write!(f, "opus"),
        }
    }
}

/// Judge strategies for `evaluate` steps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Summarization,
    Faithfulness,
    Hallucination,
    ContextRelevance,
    ContextUtilization,
    FactualAccuracy,
    ContextConciseness,
}

impl Strategy {
    /// Argument keys the strategy needs
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Summarization => &["source", "summary"],
            Self::Faithfulness => &["source", "response"],
            Self::Hallucination => &["context", "response"],
            Self::ContextRelevance => &["question", "context"],
            Self::ContextUtilization => &["question", "context", "response"],
            Self::FactualAccuracy => &["question", "context", "response"],
            Self::ContextConciseness => &["question", "context", "concise_context"],
        }
    }

    /// Every key used by at least one strategy
    pub fn all_known_keys() -> &'static [&'static str] {
        &[
            "source",
            "summary",
            "response",
            "context",
            "question",
            "concise_context",
        ]
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Summarization => "summarization",
            Self::Faithfulness => "faithfulness",
            Self::Hallucination => "hallucination",
            Self::ContextRelevance => "context_relevance",
            Self::ContextUtilization => "context_utilization",
            Self::FactualAccuracy => "factual_accuracy",
            Self::ContextConciseness => "context_conciseness",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_pipeline() {
        let yaml = r#"
input:
  type: object
  properties:
    dir: { type: string }
  required: [dir]
steps:
  - kind: find_files
    name: files
    arguments: input.dir
    pattern: "*.md"
  - kind: transform
    name: names
    arguments: files.name
"#;

        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[0].name(), "files");
        assert_eq!(pipeline.steps[0].kind(), StepKind::FindFiles);
        assert_eq!(pipeline.steps[1].arguments(), Some("files.name"));
    }

    #[test]
    fn test_parse_prompt_defaults() {
        let yaml = r#"
input: { type: object }
steps:
  - kind: prompt
    name: ask
    template: "Say hi"
"#;

        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        match &pipeline.steps[0] {
            StepSpec::Prompt(p) => {
                assert_eq!(p.model, Model::Sonnet);
                assert!(p.arguments.is_none());
                assert!(p.output.is_none());
            }
            other => panic!("Expected prompt step, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_chunk_and_evaluate_defaults() {
        let yaml = r#"
input: { type: object }
steps:
  - kind: chunk
    name: pieces
    arguments: input.text
  - kind: evaluate
    name: judged
    arguments: '{"source": input.text, "summary": input.summary}'
    strategy: summarization
"#;

        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        match &pipeline.steps[0] {
            StepSpec::Chunk {
                chunk_size,
                overlap,
                ..
            } => {
                assert_eq!(*chunk_size, 4000);
                assert_eq!(*overlap, 200);
            }
            other => panic!("Expected chunk step, got {:?}", other),
        }
        match &pipeline.steps[1] {
            StepSpec::Evaluate {
                strategy, model, ..
            } => {
                assert_eq!(*strategy, Strategy::Summarization);
                assert_eq!(*model, Model::Haiku);
            }
            other => panic!("Expected evaluate step, got {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_kind_is_for_each_alias() {
        let yaml = r#"
input: { type: object }
steps:
  - kind: pipeline
    name: per_doc
    arguments: input.docs
    steps:
      - kind: transform
        name: title
        arguments: item.title
"#;

        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.steps[0].kind(), StepKind::ForEach);
        assert_eq!(pipeline.steps[0].nested_steps().unwrap().len(), 1);
        assert_eq!(pipeline.total_steps(), 2);
    }

    #[test]
    fn test_unknown_kind_is_load_error() {
        let yaml = r#"
input: { type: object }
steps:
  - kind: teleport
    name: x
    arguments: input
"#;

        let err = PipelineDefinition::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PipelineError::PipelineLoad { .. }));
    }

    #[test]
    fn test_invalid_schema_is_load_error() {
        let err = PipelineDefinition::from_yaml("input: { type: banana }\nsteps: []\n").unwrap_err();
        assert!(matches!(err, PipelineError::PipelineLoad { .. }));
        assert!(err.to_string().contains("'input'"), "{}", err);

        let yaml = r#"
input: { type: object }
steps:
  - kind: for_each
    name: each
    arguments: "[1]"
    steps:
      - kind: prompt
        name: ask
        template: "Score it"
        output: { type: object, properties: { score: { minimum: low } } }
"#;
        let err = PipelineDefinition::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("'ask.output'"), "{}", err);
    }

    #[test]
    fn test_non_mapping_document_is_load_error() {
        let err = PipelineDefinition::from_yaml("- just\n- a list\n").unwrap_err();
        assert!(err.to_string().contains("must be a mapping, got list"));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = PipelineDefinition::from_file(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_strategy_required_keys() {
        assert_eq!(
            Strategy::ContextConciseness.required_keys(),
            &["question", "context", "concise_context"]
        );
        assert_eq!(Strategy::Hallucination.to_string(), "hallucination");
    }
}
