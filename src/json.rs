//! Conversion between runtime values and JSON.
//!
//! Hosts often receive command details as JSON; `parse_value` turns such text
//! into a [`Value`] that can be passed straight to
//! [`crate::engine::Engine::invoke_procedure`]. The reverse conversion is used
//! to dump session state.
//!
//! JSON `null` maps to Absent. Only integral numbers that fit in an `i64` are
//! accepted; ALang has no floating point.

use std::collections::BTreeMap;

use crate::value::Value;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Parse JSON text into a runtime value
pub fn parse_value(input: &str) -> Result<Value, Error> {
    let json: serde_json::Value = serde_json::from_str(input).map_err(|e| {
        let offset = byte_offset(input, e.line(), e.column());
        ParseError::with_context(
            ParseErrorKind::InvalidSyntax,
            format!("Invalid JSON: {e}"),
            input,
            offset,
        )
    })?;

    convert(json, 0)
}

/// Byte offset of a 1-based line and column as reported by serde_json
fn byte_offset(input: &str, line: usize, column: usize) -> usize {
    let line_start: usize = input
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(input.len())
}

fn convert(json: serde_json::Value, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(ParseError::from_message(
            ParseErrorKind::TooDeeplyNested,
            format!("JSON value too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        )
        .into());
    }

    match json {
        serde_json::Value::Null => Ok(Value::Absent),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Number).ok_or_else(|| {
            ParseError::from_message(
                ParseErrorKind::Unsupported,
                format!("Number too large or not integer: {n}"),
            )
            .into()
        }),
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| convert(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Object(entries) => entries
            .into_iter()
            .map(|(key, item)| Ok((key, convert(item, depth + 1)?)))
            .collect::<Result<BTreeMap<_, _>, Error>>()
            .map(Value::Map),
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(json: serde_json::Value) -> Result<Value, Error> {
        convert(json, 0)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Absent => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::from(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => items.iter().map(serde_json::Value::from).collect(),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), serde_json::Value::from(item)))
                    .collect(),
            ),
        }
    }
}
