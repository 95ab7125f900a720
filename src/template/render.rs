// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Template rendering with strict undefined handling

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::syntax::{CmpOp, Expr, Node};
use super::RenderError;

type Vars = HashMap<String, Value>;

/// Result of evaluating a template expression. Undefined values carry the
/// message reported if they are ever printed, tested or iterated.
enum Slot {
    Defined(Value),
    Undefined(String),
}

impl Slot {
    fn require(self) -> Result<Value, RenderError> {
        match self {
            Slot::Defined(value) => Ok(value),
            Slot::Undefined(message) => Err(RenderError::Undefined(message)),
        }
    }
}

pub(crate) fn render_nodes(nodes: &[Node], vars: &Vars, out: &mut String) -> Result<(), RenderError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => {
                let value = eval(expr, vars)?.require()?;
                out.push_str(&display(&value));
            }
            Node::If {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (test, body) in branches {
                    if truthy(&eval(test, vars)?.require()?) {
                        render_nodes(body, vars, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    if let Some(body) = otherwise {
                        render_nodes(body, vars, out)?;
                    }
                }
            }
            Node::For {
                targets,
                iter,
                body,
                otherwise,
            } => {
                let items = iterate(eval(iter, vars)?.require()?)?;
                if items.is_empty() {
                    if let Some(body) = otherwise {
                        render_nodes(body, vars, out)?;
                    }
                    continue;
                }

                let length = items.len();
                for (index, item) in items.into_iter().enumerate() {
                    let mut scope = vars.clone();
                    bind_targets(&mut scope, targets, item)?;
                    scope.insert("loop".to_string(), loop_info(index, length));
                    render_nodes(body, &scope, out)?;
                }
            }
        }
    }
    Ok(())
}

fn bind_targets(scope: &mut Vars, targets: &[String], item: Value) -> Result<(), RenderError> {
    if let [single] = targets {
        scope.insert(single.clone(), item);
        return Ok(());
    }
    match item {
        Value::Array(parts) if parts.len() == targets.len() => {
            for (name, part) in targets.iter().zip(parts) {
                scope.insert(name.clone(), part);
            }
            Ok(())
        }
        other => Err(RenderError::Type(format!(
            "cannot unpack {} into {} loop variables",
            type_label(&other),
            targets.len()
        ))),
    }
}

fn loop_info(index: usize, length: usize) -> Value {
    let mut info = Map::new();
    info.insert("index".into(), Value::from(index + 1));
    info.insert("index0".into(), Value::from(index));
    info.insert("revindex".into(), Value::from(length - index));
    info.insert("revindex0".into(), Value::from(length - index - 1));
    info.insert("first".into(), Value::Bool(index == 0));
    info.insert("last".into(), Value::Bool(index + 1 == length));
    info.insert("length".into(), Value::from(length));
    Value::Object(info)
}

fn iterate(value: Value) -> Result<Vec<Value>, RenderError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(k, _)| Value::String(k)).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(RenderError::Type(format!(
            "'{}' object is not iterable",
            type_label(&other)
        ))),
    }
}

fn eval(expr: &Expr, vars: &Vars) -> Result<Slot, RenderError> {
    Ok(match expr {
        Expr::Literal(value) => Slot::Defined(value.clone()),
        Expr::Name(name) => match vars.get(name) {
            Some(value) => Slot::Defined(value.clone()),
            None => Slot::Undefined(format!("'{}' is undefined", name)),
        },
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, vars)?.require()?);
            }
            Slot::Defined(Value::Array(values))
        }
        Expr::Attr(target, name) => {
            let target = eval(target, vars)?.require()?;
            lookup(&target, &Value::String(name.clone()))
        }
        Expr::Index(target, key) => {
            let target = eval(target, vars)?.require()?;
            let key = eval(key, vars)?.require()?;
            lookup(&target, &key)
        }
        Expr::Method { target, name, args } => {
            let target = eval(target, vars)?.require()?;
            let args = eval_args(args, vars)?;
            Slot::Defined(call_method(&target, name, &args)?)
        }
        Expr::Filter { target, name, args } => {
            let target = eval(target, vars)?;
            let args = eval_args(args, vars)?;
            Slot::Defined(apply_filter(target, name, &args)?)
        }
        Expr::Not(inner) => Slot::Defined(Value::Bool(!truthy(&eval(inner, vars)?.require()?))),
        Expr::And(lhs, rhs) => {
            let left = eval(lhs, vars)?.require()?;
            if truthy(&left) {
                Slot::Defined(eval(rhs, vars)?.require()?)
            } else {
                Slot::Defined(left)
            }
        }
        Expr::Or(lhs, rhs) => {
            let left = eval(lhs, vars)?.require()?;
            if truthy(&left) {
                Slot::Defined(left)
            } else {
                Slot::Defined(eval(rhs, vars)?.require()?)
            }
        }
        Expr::Compare { op, lhs, rhs } => {
            let left = eval(lhs, vars)?.require()?;
            let right = eval(rhs, vars)?.require()?;
            Slot::Defined(Value::Bool(compare(*op, &left, &right)?))
        }
    })
}

fn eval_args(args: &[Expr], vars: &Vars) -> Result<Vec<Value>, RenderError> {
    args.iter().map(|arg| eval(arg, vars)?.require()).collect()
}

fn lookup(target: &Value, key: &Value) -> Slot {
    match (target, key) {
        (Value::Object(map), Value::String(k)) => match map.get(k) {
            Some(value) => Slot::Defined(value.clone()),
            None => Slot::Undefined(format!("'dict object' has no attribute '{}'", k)),
        },
        (Value::Array(items), key) => match as_index(key).and_then(|i| resolve_index(i, items.len())) {
            Some(i) => Slot::Defined(items[i].clone()),
            None => Slot::Undefined(format!("'list object' has no element {}", key)),
        },
        (Value::String(s), key) => {
            let chars: Vec<char> = s.chars().collect();
            match as_index(key).and_then(|i| resolve_index(i, chars.len())) {
                Some(i) => Slot::Defined(Value::String(chars[i].to_string())),
                None => Slot::Undefined(format!("'str object' has no element {}", key)),
            }
        }
        (other, key) => Slot::Undefined(format!(
            "'{}' object has no attribute {}",
            type_label(other),
            display(key)
        )),
    }
}

/// `items[1]` and `items.1` both index
fn as_index(key: &Value) -> Option<i64> {
    key.as_i64()
        .or_else(|| key.as_str().and_then(|s| s.parse().ok()))
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value, RenderError> {
    match (target, name) {
        (Value::Object(map), "get") => {
            let key = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| RenderError::Type("get() expects a string key".into()))?;
            Ok(map
                .get(key)
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Object(map), "items") => Ok(Value::Array(
            map.iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
                .collect(),
        )),
        (Value::Object(map), "keys") => Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        (Value::Object(map), "values") => Ok(Value::Array(map.values().cloned().collect())),
        (Value::String(s), "upper") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "lower") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "strip") => Ok(Value::String(s.trim().to_string())),
        (other, _) => Err(RenderError::Type(format!(
            "'{}' object has no method '{}'",
            type_label(other),
            name
        ))),
    }
}

fn apply_filter(target: Slot, name: &str, args: &[Value]) -> Result<Value, RenderError> {
    if name == "default" {
        let fallback = args.first().cloned().unwrap_or_else(|| Value::String(String::new()));
        let falsy_counts = args.get(1).is_some_and(truthy);
        return Ok(match target {
            Slot::Undefined(_) => fallback,
            Slot::Defined(value) if falsy_counts && !truthy(&value) => fallback,
            Slot::Defined(value) => value,
        });
    }

    let value = target.require()?;
    match name {
        "tojson" => {
            let value = sort_keys(value);
            let rendered = match args.first().and_then(Value::as_u64) {
                Some(indent) if indent > 0 => pretty_json(&value, indent as usize),
                _ => spaced_json(&value),
            };
            rendered
                .map(|json| Value::String(html_safe(&json)))
                .map_err(|e| RenderError::Type(format!("tojson failed: {}", e)))
        }
        "length" | "count" => match &value {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(RenderError::Type(format!(
                "object of type '{}' has no len()",
                type_label(other)
            ))),
        },
        "upper" => Ok(Value::String(display(&value).to_uppercase())),
        "lower" => Ok(Value::String(display(&value).to_lowercase())),
        "trim" => Ok(Value::String(display(&value).trim().to_string())),
        "join" => {
            let separator = args.first().map(display).unwrap_or_default();
            let items = iterate(value)?;
            Ok(Value::String(
                items.iter().map(display).collect::<Vec<_>>().join(&separator),
            ))
        }
        "round" => {
            let n = value
                .as_f64()
                .ok_or_else(|| RenderError::Type("round expects a number".into()))?;
            let precision = args.first().and_then(Value::as_i64).unwrap_or(0);
            let factor = 10f64.powi(precision as i32);
            let rounded = (n * factor).round() / factor;
            Ok(serde_json::Number::from_f64(rounded).map_or(Value::Null, Value::Number))
        }
        "format" => {
            let pattern = value
                .as_str()
                .ok_or_else(|| RenderError::Type("format expects a string pattern".into()))?;
            printf(pattern, args).map(Value::String)
        }
        other => Err(RenderError::Type(format!("no filter named '{}'", other))),
    }
}

fn pretty_json(value: &Value, indent: usize) -> Result<String, serde_json::Error> {
    use serde::Serialize;

    let spaces = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(spaces.as_bytes());
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Single-line JSON with `, ` and `: ` separators
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        writer.write_all(b": ")
    }
}

fn spaced_json(value: &Value) -> Result<String, serde_json::Error> {
    use serde::Serialize;

    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Escape the characters that would let JSON break out of an HTML context.
/// They only ever occur inside string literals, so the result is still JSON.
fn html_safe(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\'' => out.push_str("\\u0027"),
            other => out.push(other),
        }
    }
    out
}

/// `%`-style formatting: `%s`, `%d`/`%i`, `%f`, `%r` and `%%`, with optional
/// width and precision
fn printf(pattern: &str, args: &[Value]) -> Result<String, RenderError> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut width = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit() || **d == '-') {
            width.push(*d);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }

        let conversion = chars
            .next()
            .ok_or_else(|| RenderError::Type("incomplete format".into()))?;
        let arg = args
            .next()
            .ok_or_else(|| RenderError::Type("not enough arguments for format string".into()))?;

        let text = match conversion {
            's' => display(arg),
            'r' => repr(arg),
            'd' | 'i' => {
                let n = arg.as_f64().ok_or_else(|| {
                    RenderError::Type(format!("%{} format: a number is required", conversion))
                })?;
                format!("{}", n.trunc() as i64)
            }
            'f' | 'F' => {
                let n = arg.as_f64().ok_or_else(|| {
                    RenderError::Type("%f format: a number is required".into())
                })?;
                format!("{:.*}", precision.unwrap_or(6), n)
            }
            other => {
                return Err(RenderError::Type(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };

        let left_align = width.starts_with('-');
        let pad = width.trim_start_matches('-').parse::<usize>().unwrap_or(0);
        let len = text.chars().count();
        if len < pad {
            let fill = " ".repeat(pad - len);
            if left_align {
                out.push_str(&text);
                out.push_str(&fill);
            } else {
                out.push_str(&fill);
                out.push_str(&text);
            }
        } else {
            out.push_str(&text);
        }
    }

    Ok(out)
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, RenderError> {
    match op {
        CmpOp::Eq => Ok(equal(left, right)),
        CmpOp::Ne => Ok(!equal(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                RenderError::Type(format!(
                    "cannot order '{}' and '{}'",
                    type_label(left),
                    type_label(right)
                ))
            })?;
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, RenderError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| equal(item, needle))),
        Value::Object(map) => Ok(needle.as_str().is_some_and(|k| map.contains_key(k))),
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(RenderError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                type_label(other)
            ))),
        },
        other => Err(RenderError::Type(format!(
            "argument of type '{}' is not iterable",
            type_label(other)
        ))),
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Text of a value as it appears in rendered output
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => repr(other),
    }
}

fn repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.contains('\'') && !s.contains('"') {
                format!("\"{}\"", s.replace('\\', "\\\\").replace('\n', "\\n"))
            } else {
                format!(
                    "'{}'",
                    s.replace('\\', "\\\\")
                        .replace('\'', "\\'")
                        .replace('\n', "\\n")
                )
            }
        }
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(repr).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", repr(&Value::String(k.clone())), repr(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
