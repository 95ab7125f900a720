// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! JSON schema checks
//!
//! Pipeline files carry JSON schemas for their input contract and for
//! declared prompt outputs. Both are compiled with `jsonschema`, so every
//! draft keyword applies (`minimum`, `pattern`, `oneOf`, ...).

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

/// Where and how an instance departs from its schema
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (at {path})")]
pub struct SchemaViolation {
    /// JSON pointer of the first failing location, `/` for the root
    pub path: String,
    /// Every failure, joined with `; `
    pub message: String,
}

/// Compile `schema`, reporting why it is not a usable JSON schema
pub fn compile(schema: &Value) -> Result<Validator, String> {
    jsonschema::validator_for(schema).map_err(|e| e.to_string())
}

/// Check `instance` against `schema`
pub fn check(schema: &Value, instance: &Value) -> Result<(), SchemaViolation> {
    let validator = compile(schema).map_err(|reason| SchemaViolation {
        path: "/".to_string(),
        message: format!("invalid schema: {}", reason),
    })?;
    conforms(&validator, instance)
}

/// Check `instance` against an already compiled validator
pub fn conforms(validator: &Validator, instance: &Value) -> Result<(), SchemaViolation> {
    let mut path = None;
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| {
            path.get_or_insert_with(|| pointer(&e.instance_path.to_string()));
            e.to_string()
        })
        .collect();

    match path {
        None => Ok(()),
        Some(path) => Err(SchemaViolation {
            path,
            message: messages.join("; "),
        }),
    }
}

fn pointer(location: &str) -> String {
    if location.is_empty() {
        "/".to_string()
    } else {
        location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir": {"type": "string"},
                "count": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["dir"]
        })
    }

    #[test]
    fn test_accepts_conforming_instance() {
        let instance = json!({"dir": "/tmp", "count": 3, "tags": ["a"]});
        assert!(check(&input_schema(), &instance).is_ok());
    }

    #[test]
    fn test_missing_required_property() {
        let err = check(&input_schema(), &json!({"count": 1})).unwrap_err();
        assert!(err.message.contains("\"dir\" is a required property"), "{}", err);
        assert_eq!(err.path, "/");
    }

    #[test]
    fn test_wrong_nested_type_reports_path() {
        let err = check(&input_schema(), &json!({"dir": "x", "tags": ["a", 2]})).unwrap_err();
        assert_eq!(err.path, "/tags/1");
        assert!(err.message.contains("string"));
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let err = check(&input_schema(), &json!({"dir": "x", "count": 1.5})).unwrap_err();
        assert_eq!(err.path, "/count");
    }

    #[test]
    fn test_enum_and_additional_properties() {
        let schema = json!({
            "type": "object",
            "properties": {"verdict": {"enum": ["full", "partial", "none"]}},
            "additionalProperties": false
        });
        assert!(check(&schema, &json!({"verdict": "full"})).is_ok());
        assert!(check(&schema, &json!({"verdict": "maybe"})).is_err());
        let err = check(&schema, &json!({"verdict": "full", "extra": 1})).unwrap_err();
        assert!(err.message.contains("extra"));
    }

    #[test]
    fn test_type_list() {
        let schema = json!({"type": ["string", "null"]});
        assert!(check(&schema, &json!(null)).is_ok());
        assert!(check(&schema, &json!(1)).is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        let schema = json!({
            "type": "object",
            "properties": {"score": {"type": "number", "minimum": 0, "maximum": 1}}
        });
        assert!(check(&schema, &json!({"score": 0.5})).is_ok());
        let err = check(&schema, &json!({"score": 5})).unwrap_err();
        assert_eq!(err.path, "/score");
        assert!(err.message.contains("maximum"), "{}", err);
        assert!(check(&schema, &json!({"score": -1})).is_err());
    }

    #[test]
    fn test_string_and_array_keywords() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "minLength": 2, "pattern": "^[a-z]+$"},
                "tags": {"type": "array", "minItems": 1}
            }
        });
        assert!(check(&schema, &json!({"id": "ab", "tags": ["x"]})).is_ok());
        assert_eq!(check(&schema, &json!({"id": "a"})).unwrap_err().path, "/id");
        assert_eq!(check(&schema, &json!({"id": "AB"})).unwrap_err().path, "/id");
        assert_eq!(check(&schema, &json!({"tags": []})).unwrap_err().path, "/tags");
    }

    #[test]
    fn test_one_of() {
        let schema = json!({"oneOf": [{"type": "string"}, {"type": "integer", "minimum": 10}]});
        assert!(check(&schema, &json!("x")).is_ok());
        assert!(check(&schema, &json!(12)).is_ok());
        assert!(check(&schema, &json!(3)).is_err());
    }

    #[test]
    fn test_every_failure_is_reported() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}, "b": {"type": "string"}}
        });
        let err = check(&schema, &json!({"a": 1, "b": 2})).unwrap_err();
        assert_eq!(err.message.matches("; ").count(), 1);
    }

    #[test]
    fn test_invalid_schema() {
        let err = check(&json!({"type": "banana"}), &json!(1)).unwrap_err();
        assert!(err.message.starts_with("invalid schema"), "{}", err);
        assert!(compile(&json!({"minimum": "zero"})).is_err());
    }
}
