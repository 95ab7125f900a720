// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Pipeline validation
//!
//! Validates a pipeline definition before execution. Every check runs in a
//! single pass and all findings are collected, so one report shows every
//! problem in the file. Nothing here evaluates an expression, renders a
//! template or calls a model.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use crate::errors::PipelineError;
use crate::expression::Expression;
use crate::pipeline::{PipelineDefinition, PromptSpec, StepKind, StepSpec, Strategy, RESERVED_NAMES};
use crate::template::Template;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// Step field a finding points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Arguments,
    Template,
    Steps,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::Arguments => write!(f, "arguments"),
            Self::Template => write!(f, "template"),
            Self::Steps => write!(f, "steps"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    DuplicateName,
    ReservedName,
    UnresolvedReference,
    MalformedExpression,
    MalformedTemplate,
    TemplateArgumentMismatch,
    UnusedArgument,
    MissingStrategyKey,
    UnusedStrategyKey,
    LoopOverText,
    EmptyPipeline,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Step the finding belongs to; `None` for pipeline-level findings
    pub step: Option<String>,
    pub field: Field,
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}.{}: {}",
            self.severity,
            self.step.as_deref().unwrap_or("pipeline"),
            self.field,
            self.message
        )
    }
}

/// Result of pipeline validation
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, step: &str, field: Field, kind: FindingKind, message: String) {
        self.push(Severity::Error, Some(step), field, kind, message);
    }

    pub fn add_warning(&mut self, step: &str, field: Field, kind: FindingKind, message: String) {
        self.push(Severity::Warning, Some(step), field, kind, message);
    }

    fn push(
        &mut self,
        severity: Severity,
        step: Option<&str>,
        field: Field,
        kind: FindingKind,
        message: String,
    ) {
        self.findings.push(Finding {
            severity,
            step: step.map(str::to_string),
            field,
            kind,
            message,
        });
    }

    pub fn is_valid(&self) -> bool {
        !self.findings.iter().any(Finding::is_error)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.is_error())
    }

    /// `Err(InvalidPipeline)` carrying every finding when any is an error
    pub fn into_result(self) -> Result<Self, PipelineError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(PipelineError::InvalidPipeline {
                findings: self.findings,
            })
        }
    }
}

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition
    pub fn validate(definition: &PipelineDefinition) -> ValidationReport {
        let mut report = ValidationReport::new();

        if definition.steps.is_empty() {
            report.push(
                Severity::Warning,
                None,
                Field::Steps,
                FindingKind::EmptyPipeline,
                "Pipeline has no steps; its output will be null".to_string(),
            );
        }

        let mut seen = HashMap::new();
        Self::check_names(&definition.steps, "top level", &mut seen, &mut report);

        let available = BTreeSet::from(["input".to_string()]);
        Self::check_scope(&definition.steps, &available, &mut report);

        report
    }

    /// Names must be unique across every nesting depth and avoid the
    /// reserved identifiers
    fn check_names<'a>(
        steps: &'a [StepSpec],
        location: &str,
        seen: &mut HashMap<&'a str, String>,
        report: &mut ValidationReport,
    ) {
        for step in steps {
            let name = step.name();

            if RESERVED_NAMES.contains(&name) {
                report.add_error(
                    name,
                    Field::Name,
                    FindingKind::ReservedName,
                    format!(
                        "Step name '{}' is reserved ({} are bound by the runner)",
                        name,
                        RESERVED_NAMES.join(", ")
                    ),
                );
            }

            match seen.get(name) {
                Some(first) => report.add_error(
                    name,
                    Field::Name,
                    FindingKind::DuplicateName,
                    format!(
                        "Duplicate step name '{}' at {} (first defined at {})",
                        name, location, first
                    ),
                ),
                None => {
                    seen.insert(name, location.to_string());
                }
            }

            if let Some(nested) = step.nested_steps() {
                let inner = format!("loop '{}'", name);
                Self::check_names(nested, &inner, seen, report);
            }
        }
    }

    /// Expressions, references and prompt/evaluate consistency, one scope
    /// at a time
    fn check_scope(steps: &[StepSpec], parent: &BTreeSet<String>, report: &mut ValidationReport) {
        let mut available = parent.clone();
        let mut sibling_kinds: HashMap<&str, StepKind> = HashMap::new();

        for step in steps {
            let name = step.name();
            let expression = step
                .arguments()
                .and_then(|source| Self::check_expression(name, source, &available, report));

            match step {
                StepSpec::Prompt(prompt) => {
                    Self::check_prompt(prompt, expression.as_ref(), report);
                }
                StepSpec::Evaluate { strategy, .. } => {
                    if let Some(expression) = &expression {
                        Self::check_strategy_keys(name, *strategy, expression, report);
                    }
                }
                StepSpec::ForEach { steps: body, .. } => {
                    if let Some(expression) = &expression {
                        Self::check_loop_target(name, expression, &sibling_kinds, report);
                    }
                    let mut inner = available.clone();
                    inner.insert("item".to_string());
                    inner.insert("item_index".to_string());
                    Self::check_scope(body, &inner, report);
                }
                _ => {}
            }

            sibling_kinds.insert(name, step.kind());
            available.insert(name.to_string());
        }
    }

    /// Parse an `arguments` expression and resolve its root references
    fn check_expression(
        step: &str,
        source: &str,
        available: &BTreeSet<String>,
        report: &mut ValidationReport,
    ) -> Option<Expression> {
        let expression = match Expression::parse(source) {
            Ok(expression) => expression,
            Err(e) => {
                report.add_error(
                    step,
                    Field::Arguments,
                    FindingKind::MalformedExpression,
                    format!("Invalid expression '{}': {}", source, e),
                );
                return None;
            }
        };

        for reference in expression.root_references() {
            if !available.contains(&reference) {
                report.add_error(
                    step,
                    Field::Arguments,
                    FindingKind::UnresolvedReference,
                    format!(
                        "Reference '{}' is not available. Available names: {}",
                        reference,
                        available.iter().cloned().collect::<Vec<_>>().join(", ")
                    ),
                );
            }
        }

        Some(expression)
    }

    fn check_prompt(prompt: &PromptSpec, arguments: Option<&Expression>, report: &mut ValidationReport) {
        let template = match Template::parse(&prompt.template) {
            Ok(template) => template,
            Err(e) => {
                report.add_error(
                    &prompt.name,
                    Field::Template,
                    FindingKind::MalformedTemplate,
                    format!("Invalid template: {}", e),
                );
                return;
            }
        };

        let produced: BTreeSet<String> = match (&prompt.arguments, arguments) {
            // no arguments means an empty `args`
            (None, _) => BTreeSet::new(),
            (Some(_), Some(expression)) => match expression.object_keys() {
                Some(keys) => keys.into_iter().collect(),
                None => return,
            },
            (Some(_), None) => return,
        };
        let referenced = template.args_keys();

        for key in referenced.difference(&produced) {
            let detail = if prompt.arguments.is_none() {
                "the step has no arguments".to_string()
            } else {
                format!(
                    "arguments does not produce key '{}'. Arguments keys: {}",
                    key,
                    produced.iter().cloned().collect::<Vec<_>>().join(", ")
                )
            };
            report.add_error(
                &prompt.name,
                Field::Template,
                FindingKind::TemplateArgumentMismatch,
                format!("Template references 'args.{}' but {}", key, detail),
            );
        }

        for key in produced.difference(&referenced) {
            report.add_warning(
                &prompt.name,
                Field::Arguments,
                FindingKind::UnusedArgument,
                format!(
                    "Arguments produces key '{}' but the template never references 'args.{}'",
                    key, key
                ),
            );
        }
    }

    fn check_strategy_keys(
        step: &str,
        strategy: Strategy,
        expression: &Expression,
        report: &mut ValidationReport,
    ) {
        let Some(keys) = expression.object_keys() else {
            return;
        };
        let required = strategy.required_keys();

        for key in required {
            if !keys.iter().any(|k| k == key) {
                report.add_error(
                    step,
                    Field::Arguments,
                    FindingKind::MissingStrategyKey,
                    format!(
                        "Strategy '{}' requires key '{}' in arguments. Got keys: {}",
                        strategy,
                        key,
                        keys.join(", ")
                    ),
                );
            }
        }

        // keys meant for a different strategy; anything else is the author's business
        for key in &keys {
            if !required.contains(&key.as_str()) && Strategy::all_known_keys().contains(&key.as_str()) {
                report.add_warning(
                    step,
                    Field::Arguments,
                    FindingKind::UnusedStrategyKey,
                    format!("Strategy '{}' does not use key '{}'", strategy, key),
                );
            }
        }
    }

    /// Warn when a loop iterates the raw text of a `read_file` step
    fn check_loop_target(
        step: &str,
        expression: &Expression,
        sibling_kinds: &HashMap<&str, StepKind>,
        report: &mut ValidationReport,
    ) {
        let target = expression.source().trim();
        if sibling_kinds.get(target) == Some(&StepKind::ReadFile) {
            report.add_warning(
                step,
                Field::Arguments,
                FindingKind::LoopOverText,
                format!(
                    "for_each iterates over '{}' which is a read_file step (produces a string); \
                     the loop will fail because text is not a list",
                    target
                ),
            );
        }
    }
}
