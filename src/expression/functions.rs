// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Built-in `$functions`

use serde_json::{Map, Value};

use super::eval::{as_number, equal, number_value, stringify, truthy, type_name};
use super::EvalError;

type Call = Result<Option<Value>, EvalError>;

const FUNCTIONS: &[&str] = &[
    "count", "sum", "max", "min", "average", "string", "number", "boolean", "not", "exists",
    "length", "uppercase", "lowercase", "trim", "substring", "contains", "split", "join", "keys",
    "lookup", "append", "reverse", "distinct", "sort", "merge", "type", "round", "floor", "ceil",
    "abs",
];

pub(crate) fn is_known(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub(crate) fn call(name: &str, args: Vec<Option<Value>>) -> Call {
    match name {
        "count" => {
            arity(name, &args, 1, 1)?;
            let n = match &args[0] {
                None => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            };
            Ok(Some(Value::from(n)))
        }
        "sum" => {
            arity(name, &args, 1, 1)?;
            let Some(numbers) = numbers(name, args[0].as_ref())? else {
                return Ok(Some(Value::from(0)));
            };
            number_value(numbers.iter().sum()).map(Some)
        }
        "max" | "min" | "average" => {
            arity(name, &args, 1, 1)?;
            let Some(numbers) = numbers(name, args[0].as_ref())? else {
                return Ok(None);
            };
            if numbers.is_empty() {
                return Ok(None);
            }
            let result = match name {
                "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                "min" => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                _ => numbers.iter().sum::<f64>() / numbers.len() as f64,
            };
            number_value(result).map(Some)
        }
        "string" => {
            arity(name, &args, 1, 1)?;
            Ok(args[0].as_ref().map(|v| Value::String(stringify(v))))
        }
        "number" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                None => Ok(None),
                Some(Value::Number(n)) => Ok(Some(Value::Number(n.clone()))),
                Some(Value::Bool(b)) => Ok(Some(Value::from(u8::from(*b)))),
                Some(Value::String(s)) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| {
                        EvalError::new(format!("unable to cast \"{}\" to a number", s))
                    })?;
                    number_value(parsed).map(Some)
                }
                Some(other) => Err(EvalError::new(format!(
                    "unable to cast {} to a number",
                    type_name(other)
                ))),
            }
        }
        "boolean" => {
            arity(name, &args, 1, 1)?;
            Ok(args[0].as_ref().map(|v| Value::Bool(truthy(Some(v)))))
        }
        "not" => {
            arity(name, &args, 1, 1)?;
            Ok(args[0].as_ref().map(|v| Value::Bool(!truthy(Some(v)))))
        }
        "exists" => {
            arity(name, &args, 1, 1)?;
            Ok(Some(Value::Bool(args[0].is_some())))
        }
        "length" => {
            arity(name, &args, 1, 1)?;
            let Some(text) = string_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            Ok(Some(Value::from(text.chars().count())))
        }
        "uppercase" | "lowercase" | "trim" => {
            arity(name, &args, 1, 1)?;
            let Some(text) = string_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            let result = match name {
                "uppercase" => text.to_uppercase(),
                "lowercase" => text.to_lowercase(),
                _ => text.split_whitespace().collect::<Vec<_>>().join(" "),
            };
            Ok(Some(Value::String(result)))
        }
        "substring" => {
            arity(name, &args, 2, 3)?;
            let Some(text) = string_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len() as i64;
            let mut start = integer_arg(name, args[1].as_ref())?;
            if start < 0 {
                start = len.saturating_add(start).max(0);
            }
            let start = start.min(len);
            let end = match args.get(2) {
                Some(count) => start
                    .saturating_add(integer_arg(name, count.as_ref())?.max(0))
                    .min(len),
                None => len,
            };
            Ok(Some(Value::String(
                chars[start as usize..end as usize].iter().collect(),
            )))
        }
        "contains" => {
            arity(name, &args, 2, 2)?;
            let Some(text) = string_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            let needle = string_arg(name, args[1].as_ref())?.unwrap_or_default();
            Ok(Some(Value::Bool(text.contains(needle))))
        }
        "split" => {
            arity(name, &args, 2, 3)?;
            let Some(text) = string_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            let separator = string_arg(name, args[1].as_ref())?.unwrap_or_default();
            let mut parts: Vec<Value> = if separator.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(separator)
                    .map(|s| Value::String(s.to_string()))
                    .collect()
            };
            if let Some(limit) = args.get(2) {
                parts.truncate(integer_arg(name, limit.as_ref())?.max(0) as usize);
            }
            Ok(Some(Value::Array(parts)))
        }
        "join" => {
            arity(name, &args, 1, 2)?;
            let separator = match args.get(1) {
                Some(sep) => string_arg(name, sep.as_ref())?.unwrap_or_default(),
                None => "",
            };
            let items = match &args[0] {
                None => return Ok(None),
                Some(Value::Array(items)) => items.clone(),
                Some(single) => vec![single.clone()],
            };
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                match item {
                    Value::String(s) => parts.push(s.as_str()),
                    other => {
                        return Err(EvalError::new(format!(
                            "$join expects an array of strings, found {}",
                            type_name(other)
                        )))
                    }
                }
            }
            Ok(Some(Value::String(parts.join(separator))))
        }
        "keys" => {
            arity(name, &args, 1, 1)?;
            let mut keys: Vec<Value> = Vec::new();
            let mut add = |map: &Map<String, Value>| {
                for key in map.keys() {
                    let key = Value::String(key.clone());
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            };
            match &args[0] {
                Some(Value::Object(map)) => add(map),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_object)
                    .for_each(&mut add),
                _ => return Ok(None),
            }
            Ok(Some(Value::Array(keys)))
        }
        "lookup" => {
            arity(name, &args, 2, 2)?;
            let key = string_arg(name, args[1].as_ref())?.unwrap_or_default();
            Ok(match &args[0] {
                Some(Value::Object(map)) => map.get(key).cloned(),
                _ => None,
            })
        }
        "append" => {
            arity(name, &args, 2, 2)?;
            let mut args = args.into_iter();
            let (first, second) = (args.next().flatten(), args.next().flatten());
            Ok(match (first, second) {
                (None, other) | (other, None) => other,
                (Some(a), Some(b)) => {
                    let mut items = into_array(a);
                    items.extend(into_array(b));
                    Some(Value::Array(items))
                }
            })
        }
        "reverse" | "distinct" | "sort" => {
            arity(name, &args, 1, 1)?;
            let Some(value) = args.into_iter().next().flatten() else {
                return Ok(None);
            };
            let mut items = into_array(value);
            match name {
                "reverse" => items.reverse(),
                "distinct" => {
                    let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items {
                        if !unique.iter().any(|seen| equal(seen, &item)) {
                            unique.push(item);
                        }
                    }
                    items = unique;
                }
                _ => sort(&mut items)?,
            }
            Ok(Some(Value::Array(items)))
        }
        "merge" => {
            arity(name, &args, 1, 1)?;
            let Some(value) = args.into_iter().next().flatten() else {
                return Ok(None);
            };
            let mut merged = Map::new();
            for item in into_array(value) {
                match item {
                    Value::Object(map) => merged.extend(map),
                    other => {
                        return Err(EvalError::new(format!(
                            "$merge expects objects, found {}",
                            type_name(&other)
                        )))
                    }
                }
            }
            Ok(Some(Value::Object(merged)))
        }
        "type" => {
            arity(name, &args, 1, 1)?;
            Ok(args[0]
                .as_ref()
                .map(|v| Value::String(type_name(v).to_string())))
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let Some(n) = number_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            let precision = match args.get(1) {
                Some(p) => integer_arg(name, p.as_ref())?,
                None => 0,
            };
            number_value(round_half_even(n, precision)).map(Some)
        }
        "floor" | "ceil" | "abs" => {
            arity(name, &args, 1, 1)?;
            let Some(n) = number_arg(name, args[0].as_ref())? else {
                return Ok(None);
            };
            let result = match name {
                "floor" => n.floor(),
                "ceil" => n.ceil(),
                _ => n.abs(),
            };
            number_value(result).map(Some)
        }
        other => Err(EvalError::new(format!("unknown function '${}'", other))),
    }
}

fn arity(name: &str, args: &[Option<Value>], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::new(format!(
            "${} takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn string_arg<'a>(name: &str, value: Option<&'a Value>) -> Result<Option<&'a str>, EvalError> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(EvalError::new(format!(
            "${} expects a string, found {}",
            name,
            type_name(other)
        ))),
    }
}

fn number_arg(name: &str, value: Option<&Value>) -> Result<Option<f64>, EvalError> {
    match value {
        None => Ok(None),
        Some(v) => as_number(v).map(Some).ok_or_else(|| {
            EvalError::new(format!("${} expects a number, found {}", name, type_name(v)))
        }),
    }
}

fn integer_arg(name: &str, value: Option<&Value>) -> Result<i64, EvalError> {
    match number_arg(name, value)? {
        Some(n) => Ok(n.trunc() as i64),
        None => Err(EvalError::new(format!("${} is missing a number argument", name))),
    }
}

/// Numbers of a scalar-or-array argument; `None` when undefined
fn numbers(name: &str, value: Option<&Value>) -> Result<Option<Vec<f64>>, EvalError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| {
            as_number(item).ok_or_else(|| {
                EvalError::new(format!(
                    "${} expects numbers, found {}",
                    name,
                    type_name(item)
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn into_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        single => vec![single],
    }
}

fn sort(items: &mut [Value]) -> Result<(), EvalError> {
    if items.iter().all(Value::is_number) {
        items.sort_by(|a, b| {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.total_cmp(&b)
        });
        Ok(())
    } else if items.iter().all(Value::is_string) {
        items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        Ok(())
    } else {
        Err(EvalError::new(
            "$sort needs an array of all numbers or all strings",
        ))
    }
}

fn round_half_even(n: f64, precision: i64) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let scaled = n * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };
    rounded / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call1(name: &str, arg: Value) -> Option<Value> {
        call(name, vec![Some(arg)]).unwrap()
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(call1("count", json!([1, 2, 3])), Some(json!(3)));
        assert_eq!(call("count", vec![None]).unwrap(), Some(json!(0)));
        assert_eq!(call1("sum", json!([1, 2.5])), Some(json!(3.5)));
        assert_eq!(call1("max", json!([4, 9, 2])), Some(json!(9)));
        assert_eq!(call1("average", json!([1, 2])), Some(json!(1.5)));
        assert_eq!(call1("min", json!([])), None);
    }

    #[test]
    fn test_strings() {
        assert_eq!(call1("uppercase", json!("abc")), Some(json!("ABC")));
        assert_eq!(call1("trim", json!("  a   b ")), Some(json!("a b")));
        assert_eq!(call1("length", json!("héllo")), Some(json!(5)));
        assert_eq!(
            call("substring", vec![Some(json!("pipeline")), Some(json!(-4)), Some(json!(2))]).unwrap(),
            Some(json!("li"))
        );
        assert_eq!(
            call("substring", vec![Some(json!("abc")), Some(json!(1)), Some(json!(1e19))]).unwrap(),
            Some(json!("bc"))
        );
        assert_eq!(
            call("substring", vec![Some(json!("abc")), Some(json!(-1e19))]).unwrap(),
            Some(json!("abc"))
        );
        assert_eq!(
            call("split", vec![Some(json!("a,b,c")), Some(json!(","))]).unwrap(),
            Some(json!(["a", "b", "c"]))
        );
        assert_eq!(
            call("join", vec![Some(json!(["a", "b"])), Some(json!("-"))]).unwrap(),
            Some(json!("a-b"))
        );
        assert_eq!(call1("string", json!({"a": 1})), Some(json!("{\"a\":1}")));
    }

    #[test]
    fn test_arrays_and_objects() {
        assert_eq!(
            call("append", vec![Some(json!([1])), Some(json!(2))]).unwrap(),
            Some(json!([1, 2]))
        );
        assert_eq!(call1("distinct", json!([1, 1.0, 2])), Some(json!([1, 2])));
        assert_eq!(call1("sort", json!(["b", "a"])), Some(json!(["a", "b"])));
        assert_eq!(
            call1("merge", json!([{"a": 1}, {"b": 2}])),
            Some(json!({"a": 1, "b": 2}))
        );
        assert_eq!(call1("keys", json!({"x": 1, "y": 2})), Some(json!(["x", "y"])));
    }

    #[test]
    fn test_round_is_half_even() {
        assert_eq!(call1("round", json!(2.5)), Some(json!(2)));
        assert_eq!(call1("round", json!(3.5)), Some(json!(4)));
        assert_eq!(
            call("round", vec![Some(json!(0.12345)), Some(json!(3))]).unwrap(),
            Some(json!(0.123))
        );
    }

    #[test]
    fn test_arity_and_type_errors() {
        assert!(call("count", vec![]).is_err());
        assert!(call("uppercase", vec![Some(json!(1))]).is_err());
        assert!(call("number", vec![Some(json!("abc"))]).is_err());
        assert!(call("sort", vec![Some(json!([1, "a"]))]).is_err());
    }
}
