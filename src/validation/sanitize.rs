//! Input sanitization. Never fails; always produces a cleaned value.

use super::schema::{ObjectSchema, PropertySchema};
use serde_json::{Map, Number, Value};

/// Cap applied to every string value, in characters.
pub const MAX_STRING_CHARS: usize = 1_000_000;
/// Cap applied to shell commands, in characters.
pub const MAX_COMMAND_CHARS: usize = 100_000;

const COMMAND_FIELD: &str = "command";

/// Clean `input` according to `schema`.
///
/// Non-object input is returned unchanged; the schema stage already reports it.
#[must_use]
pub fn sanitize_input(input: &Value, schema: &ObjectSchema) -> Value {
    let Some(object) = input.as_object() else {
        return input.clone();
    };

    let mut out = Map::with_capacity(object.len());
    for (key, value) in object {
        match schema.properties.get(key) {
            Some(property) => {
                let cleaned = if key == COMMAND_FIELD {
                    match value {
                        Value::String(s) => Value::String(sanitize_command(s)),
                        other => sanitize_value(other, property),
                    }
                } else {
                    sanitize_value(value, property)
                };
                out.insert(key.clone(), cleaned);
            }
            None if schema.allows_unknown() => {
                let cleaned = match value {
                    Value::String(s) => Value::String(sanitize_string(s)),
                    other => other.clone(),
                };
                out.insert(key.clone(), cleaned);
            }
            None => log::debug!("Dropping unknown input field field={key}"),
        }
    }

    Value::Object(out)
}

fn sanitize_value(value: &Value, schema: &PropertySchema) -> Value {
    match value {
        Value::Null => match &schema.default {
            Some(default) if !default.is_null() => sanitize_value(default, schema),
            _ => Value::Null,
        },
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Number(n) => sanitize_number(n, schema),
        Value::Array(items) => {
            let item_schema = schema.items.as_deref().cloned().unwrap_or_default();
            Value::Array(
                items
                    .iter()
                    .map(|item| sanitize_value(item, &item_schema))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn sanitize_number(n: &Number, schema: &PropertySchema) -> Value {
    let Some(original) = n.as_f64() else {
        return Value::Number(n.clone());
    };
    let mut clamped = if original.is_finite() { original } else { 0.0 };
    if let Some(min) = schema.minimum {
        clamped = clamped.max(min);
    }
    if let Some(max) = schema.maximum {
        clamped = clamped.min(max);
    }

    if (clamped - original).abs() < f64::EPSILON {
        return Value::Number(n.clone());
    }
    number_value(clamped)
}

#[allow(clippy::cast_possible_truncation)]
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map_or(Value::Number(Number::from(0)), Value::Number)
    }
}

/// Strip NUL bytes and cap length at [`MAX_STRING_CHARS`].
#[must_use]
pub fn sanitize_string(s: &str) -> String {
    truncate_chars(&s.replace('\0', ""), MAX_STRING_CHARS)
}

/// Strip NUL bytes and cap length at [`MAX_COMMAND_CHARS`].
#[must_use]
pub fn sanitize_command(command: &str) -> String {
    truncate_chars(&command.replace('\0', ""), MAX_COMMAND_CHARS)
}

/// Strip NUL bytes and normalize separators to `/`.
#[must_use]
pub fn sanitize_path(path: &str) -> String {
    path.replace('\0', "").replace('\\', "/")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
