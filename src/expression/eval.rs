// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Expression evaluation
//!
//! Results are `Option<Value>`: `None` is "undefined" (a missing field, an
//! empty match) and is distinct from JSON `null`. Path steps map over arrays
//! and flatten one level per step; a multi-value result comes back as an
//! array and a single match is unwrapped.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::functions;
use super::parser::{number_literal, BinOp, Node, Step};
use super::EvalError;

pub(crate) type Vars = HashMap<String, Value>;

type Eval = Result<Option<Value>, EvalError>;

/// Upper bound on the size of a `[a..b]` range
const MAX_RANGE: i64 = 10_000_000;

pub(crate) struct Evaluator<'r> {
    root: &'r Value,
}

impl<'r> Evaluator<'r> {
    pub(crate) fn new(root: &'r Value) -> Self {
        Self { root }
    }

    pub(crate) fn eval(&self, node: &Node, ctx: &Value, vars: &mut Vars) -> Eval {
        match node {
            Node::Literal(value) => Ok(Some(value.clone())),
            Node::Name(name) => Ok(field(ctx, name)),
            Node::Variable(name) => Ok(match name.as_str() {
                "" => Some(ctx.clone()),
                "$" => Some(self.root.clone()),
                other => vars.get(other).cloned(),
            }),
            Node::Path(steps) => self.path(steps, ctx, vars),
            Node::Negate(inner) => match self.eval(inner, ctx, vars)? {
                None => Ok(None),
                Some(value) => {
                    let n = as_number(&value)
                        .ok_or_else(|| EvalError::new("cannot negate a non-numeric value"))?;
                    number_value(-n).map(Some)
                }
            },
            Node::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, ctx, vars),
            Node::Condition {
                test,
                then,
                otherwise,
            } => {
                let test = self.eval(test, ctx, vars)?;
                if truthy(test.as_ref()) {
                    self.eval(then, ctx, vars)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, ctx, vars)
                } else {
                    Ok(None)
                }
            }
            Node::Block(body) => {
                let mut inner = vars.clone();
                let mut last = None;
                for node in body {
                    last = self.eval(node, ctx, &mut inner)?;
                }
                Ok(last)
            }
            Node::Bind { name, value } => {
                let value = self.eval(value, ctx, vars)?;
                match &value {
                    Some(v) => {
                        vars.insert(name.clone(), v.clone());
                    }
                    None => {
                        vars.remove(name);
                    }
                }
                Ok(value)
            }
            Node::Object(pairs) => {
                let mut object = Map::new();
                for (key, value) in pairs {
                    let key = match self.eval(key, ctx, vars)? {
                        Some(Value::String(s)) => s,
                        Some(other) => {
                            return Err(EvalError::new(format!(
                                "object key must be a string, got {}",
                                type_name(&other)
                            )))
                        }
                        None => continue,
                    };
                    if let Some(value) = self.eval(value, ctx, vars)? {
                        object.insert(key, value);
                    }
                }
                Ok(Some(Value::Object(object)))
            }
            Node::Array(elements) => {
                let mut array = Vec::new();
                for element in elements {
                    match element {
                        Node::Range(lower, upper) => {
                            array.extend(self.range(lower, upper, ctx, vars)?);
                        }
                        other => {
                            if let Some(value) = self.eval(other, ctx, vars)? {
                                array.push(value);
                            }
                        }
                    }
                }
                Ok(Some(Value::Array(array)))
            }
            Node::Range(lower, upper) => Ok(Some(Value::Array(
                self.range(lower, upper, ctx, vars)?,
            ))),
            Node::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, ctx, vars)?);
                }
                functions::call(name, values)
            }
        }
    }

    fn path(&self, steps: &[Step], ctx: &Value, vars: &mut Vars) -> Eval {
        let mut input = vec![ctx.clone()];
        // an array read straight out of the data is returned as-is
        let mut data_array = false;

        for step in steps {
            let single = input.len() == 1 && step.stages.is_empty();
            let mut output = Vec::new();
            data_array = false;

            for item in &input {
                let mut sequence = match self.eval(&step.node, item, vars)? {
                    None => Vec::new(),
                    Some(Value::Array(items)) => {
                        data_array = single;
                        items
                    }
                    Some(value) => vec![value],
                };
                for stage in &step.stages {
                    sequence = self.filter(sequence, stage, vars)?;
                }
                output.extend(sequence);
            }
            input = output;
        }

        if data_array {
            return Ok(Some(Value::Array(input)));
        }
        Ok(collapse(input))
    }

    /// Apply a `[...]` stage: numbers select by position (negative counts
    /// from the end), anything else is a predicate evaluated per element
    fn filter(&self, sequence: Vec<Value>, stage: &Node, vars: &mut Vars) -> Result<Vec<Value>, EvalError> {
        let len = sequence.len() as i64;
        let mut kept = Vec::new();

        for (i, item) in sequence.into_iter().enumerate() {
            let selector = self.eval(stage, &item, vars)?;
            let keep = match &selector {
                Some(Value::Number(n)) => index_matches(n.as_f64(), i as i64, len),
                Some(Value::Array(list)) if !list.is_empty() && list.iter().all(Value::is_number) => list
                    .iter()
                    .any(|n| index_matches(n.as_f64(), i as i64, len)),
                other => truthy(other.as_ref()),
            };
            if keep {
                kept.push(item);
            }
        }

        Ok(kept)
    }

    fn range(&self, lower: &Node, upper: &Node, ctx: &Value, vars: &mut Vars) -> Result<Vec<Value>, EvalError> {
        let bound = |value: Option<Value>| -> Result<Option<i64>, EvalError> {
            match value {
                None => Ok(None),
                Some(v) => match as_number(&v) {
                    Some(n) if n.fract() == 0.0 => Ok(Some(n as i64)),
                    _ => Err(EvalError::new("range bounds must be integers")),
                },
            }
        };
        let lower = bound(self.eval(lower, ctx, vars)?)?;
        let upper = bound(self.eval(upper, ctx, vars)?)?;
        let (Some(lower), Some(upper)) = (lower, upper) else {
            return Ok(Vec::new());
        };
        if upper < lower {
            return Ok(Vec::new());
        }
        if upper.checked_sub(lower).map_or(true, |span| span > MAX_RANGE) {
            return Err(EvalError::new(format!(
                "range [{}..{}] is too large",
                lower, upper
            )));
        }
        Ok((lower..=upper).map(Value::from).collect())
    }

    fn binary(&self, op: BinOp, lhs: &Node, rhs: &Node, ctx: &Value, vars: &mut Vars) -> Eval {
        match op {
            BinOp::And => {
                let left = self.eval(lhs, ctx, vars)?;
                if !truthy(left.as_ref()) {
                    return Ok(Some(Value::Bool(false)));
                }
                let right = self.eval(rhs, ctx, vars)?;
                Ok(Some(Value::Bool(truthy(right.as_ref()))))
            }
            BinOp::Or => {
                let left = self.eval(lhs, ctx, vars)?;
                if truthy(left.as_ref()) {
                    return Ok(Some(Value::Bool(true)));
                }
                let right = self.eval(rhs, ctx, vars)?;
                Ok(Some(Value::Bool(truthy(right.as_ref()))))
            }
            _ => {
                let left = self.eval(lhs, ctx, vars)?;
                let right = self.eval(rhs, ctx, vars)?;
                apply(op, left, right)
            }
        }
    }
}

fn apply(op: BinOp, left: Option<Value>, right: Option<Value>) -> Eval {
    match op {
        BinOp::Concat => {
            let mut text = left.as_ref().map(stringify).unwrap_or_default();
            text.push_str(&right.as_ref().map(stringify).unwrap_or_default());
            Ok(Some(Value::String(text)))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(None);
            };
            let (Some(a), Some(b)) = (as_number(&left), as_number(&right)) else {
                return Err(EvalError::new(format!(
                    "both operands of '{}' must be numbers, got {} and {}",
                    op.symbol(),
                    type_name(&left),
                    type_name(&right)
                )));
            };
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => a % b,
            };
            number_value(result).map(Some)
        }
        BinOp::Eq | BinOp::Ne => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };
            let same = equal(&left, &right);
            Ok(Some(Value::Bool(if op == BinOp::Eq { same } else { !same })))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(None);
            };
            let ordering = match (&left, &right) {
                (Value::Number(_), Value::Number(_)) => as_number(&left)
                    .zip(as_number(&right))
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let ordering = ordering.ok_or_else(|| {
                EvalError::new(format!(
                    "cannot compare {} with {} using '{}'",
                    type_name(&left),
                    type_name(&right),
                    op.symbol()
                ))
            })?;
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Some(Value::Bool(result)))
        }
        BinOp::In => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Some(Value::Bool(false)));
            };
            let found = match &right {
                Value::Array(items) => items.iter().any(|item| equal(&left, item)),
                other => equal(&left, other),
            };
            Ok(Some(Value::Bool(found)))
        }
        BinOp::And => Ok(Some(Value::Bool(
            truthy(left.as_ref()) && truthy(right.as_ref()),
        ))),
        BinOp::Or => Ok(Some(Value::Bool(
            truthy(left.as_ref()) || truthy(right.as_ref()),
        ))),
    }
}

fn field(ctx: &Value, name: &str) -> Option<Value> {
    match ctx {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => {
            let mut found = Vec::new();
            for item in items {
                match field(item, name) {
                    Some(Value::Array(inner)) => found.extend(inner),
                    Some(value) => found.push(value),
                    None => {}
                }
            }
            collapse(found)
        }
        _ => None,
    }
}

fn collapse(mut sequence: Vec<Value>) -> Option<Value> {
    match sequence.len() {
        0 => None,
        1 => sequence.pop(),
        _ => Some(Value::Array(sequence)),
    }
}

fn index_matches(selector: Option<f64>, index: i64, len: i64) -> bool {
    let Some(selector) = selector else {
        return false;
    };
    let mut wanted = selector.floor() as i64;
    if wanted < 0 {
        wanted += len;
    }
    wanted == index
}

/// Boolean cast: empty strings, zero, null, empty arrays and empty objects
/// are false
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => items.iter().any(|item| truthy(Some(item))),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// String cast used by `&` and `$string`
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Finite result of arithmetic, rounded to 15 significant digits so
/// `0.1 + 0.2` is `0.3`
pub(crate) fn number_value(n: f64) -> Result<Value, EvalError> {
    if !n.is_finite() {
        return Err(EvalError::new("number out of range"));
    }
    let rounded = format!("{:.14e}", n).parse::<f64>().unwrap_or(n);
    Ok(number_literal(rounded))
}

/// Deep equality where `1` and `1.0` are the same number
pub(crate) fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| equal(v, other)))
        }
        _ => a == b,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn run(source: &str, data: Value) -> Option<Value> {
        let node = parse(source).unwrap();
        Evaluator::new(&data)
            .eval(&node, &data, &mut Vars::new())
            .unwrap()
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        let data = json!({"input": {"count": 3}});
        assert_eq!(run("input.count * 2", data), Some(json!(6)));
        assert_eq!(run("0.1 + 0.2", json!({})), Some(json!(0.3)));
        assert_eq!(run("7 % 4 - -1", json!({})), Some(json!(4)));
    }

    #[test]
    fn test_missing_fields_are_undefined() {
        assert_eq!(run("a.b.c", json!({"a": {}})), None);
        assert_eq!(run("missing + 1", json!({})), None);
        assert_eq!(run("missing = 1", json!({})), Some(json!(false)));
    }

    #[test]
    fn test_path_maps_over_arrays() {
        let data = json!({"files": [{"name": "a.md"}, {"name": "b.md"}]});
        assert_eq!(run("files.name", data), Some(json!(["a.md", "b.md"])));
    }

    #[test]
    fn test_singleton_unwraps_but_data_arrays_do_not() {
        let data = json!({"files": [{"name": "a.md"}], "tags": ["x"]});
        assert_eq!(run("files.name", data.clone()), Some(json!("a.md")));
        assert_eq!(run("tags", data.clone()), Some(json!(["x"])));
        assert_eq!(run("$$.tags", data), Some(json!(["x"])));
    }

    #[test]
    fn test_filters_and_indexes() {
        let data = json!({"claims": [
            {"text": "a", "verdict": "yes"},
            {"text": "b", "verdict": "no"},
            {"text": "c", "verdict": "yes"}
        ]});
        assert_eq!(
            run("claims[verdict = 'yes'].text", data.clone()),
            Some(json!(["a", "c"]))
        );
        assert_eq!(run("claims[0].text", data.clone()), Some(json!("a")));
        assert_eq!(run("claims[-1].text", data.clone()), Some(json!("c")));
        assert_eq!(run("$count(claims[verdict = 'no'])", data), Some(json!(1)));
    }

    #[test]
    fn test_object_constructor_omits_undefined() {
        let data = json!({"item": {"text": "hi"}, "step": 2});
        assert_eq!(
            run(r#"{"text": item.text, "n": step, "gone": item.nope}"#, data),
            Some(json!({"text": "hi", "n": 2}))
        );
    }

    #[test]
    fn test_conditions_blocks_and_concat() {
        assert_eq!(run("3 > 2 ? 'big' : 'small'", json!({})), Some(json!("big")));
        assert_eq!(run("false ? 1", json!({})), None);
        assert_eq!(run("($x := 2; $x * 3)", json!({})), Some(json!(6)));
        assert_eq!(run("'n=' & 5 & missing", json!({})), Some(json!("n=5")));
    }

    #[test]
    fn test_ranges_and_membership() {
        assert_eq!(run("[1..3]", json!({})), Some(json!([1, 2, 3])));
        assert_eq!(run("'b' in ['a', 'b']", json!({})), Some(json!(true)));
    }

    #[test]
    fn test_huge_range_is_an_error() {
        let data = json!({});
        for source in ["[-1e19..1e19]", "[0..20000000]"] {
            let node = parse(source).unwrap();
            let err = Evaluator::new(&data)
                .eval(&node, &data, &mut Vars::new())
                .unwrap_err();
            assert!(err.to_string().contains("too large"), "{}", source);
        }
        assert_eq!(run("[3..1]", json!({})), Some(json!([])));
    }

    #[test]
    fn test_type_errors() {
        let data = json!({"s": "text"});
        let node = parse("s * 2").unwrap();
        let err = Evaluator::new(&data)
            .eval(&node, &data, &mut Vars::new())
            .unwrap_err();
        assert!(err.to_string().contains("must be numbers"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(Some(&json!(""))));
        assert!(!truthy(Some(&json!([]))));
        assert!(!truthy(Some(&json!({}))));
        assert!(truthy(Some(&json!([0, 1]))));
        assert!(!truthy(None));
    }
}
