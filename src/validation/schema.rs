//! Typed subset of JSON Schema used to check tool input.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// JSON value types a property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }
}

/// A single type or a union of types.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TypeSet {
    One(JsonType),
    Many(Vec<JsonType>),
}

impl TypeSet {
    fn types(&self) -> &[JsonType] {
        match self {
            Self::One(t) => std::slice::from_ref(t),
            Self::Many(ts) => ts,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        self.types().iter().any(|t| t.matches(value))
    }

    fn describe(&self) -> String {
        self.types()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Constraints declared for one property.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub ty: Option<TypeSet>,
    #[serde(rename = "enum")]
    pub allowed: Option<Vec<Value>>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub items: Option<Box<PropertySchema>>,
    pub default: Option<Value>,
}

/// Top-level schema of a tool's input object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    /// `false` rejects and drops unknown fields; anything else allows them.
    #[serde(default)]
    pub additional_properties: Option<bool>,
}

impl ObjectSchema {
    /// Interpret a tool's declared JSON schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema uses an unsupported shape.
    pub fn from_value(schema: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(schema)
    }

    #[must_use]
    pub const fn allows_unknown(&self) -> bool {
        !matches!(self.additional_properties, Some(false))
    }
}

/// Outcome of schema validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
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

/// Check `input` against `schema`, collecting every violation.
#[must_use]
pub fn validate_input(input: &Value, schema: &ObjectSchema) -> ValidationResult {
    let mut errors = Vec::new();

    let Some(object) = input.as_object() else {
        errors.push("Input must be an object".to_string());
        return ValidationResult { errors };
    };

    for field in &schema.required {
        if !object.contains_key(field) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    for (key, value) in object {
        match schema.properties.get(key) {
            Some(property) => validate_value(key, value, property, &mut errors),
            None if !schema.allows_unknown() => errors.push(format!("Unknown property: {key}")),
            None => {}
        }
    }

    ValidationResult { errors }
}

fn validate_value(name: &str, value: &Value, schema: &PropertySchema, errors: &mut Vec<String>) {
    if let Some(ty) = &schema.ty
        && !ty.matches(value)
    {
        errors.push(format!(
            "{name}: expected {}, got {}",
            ty.describe(),
            type_name(value)
        ));
        return;
    }

    if let Some(allowed) = &schema.allowed
        && !allowed.contains(value)
    {
        let options = allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        errors.push(format!("{name}: must be one of [{options}]"));
    }

    match value {
        Value::String(s) => validate_string(name, s, schema, errors),
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                if let Some(min) = schema.minimum
                    && n < min
                {
                    errors.push(format!("{name}: must be at least {min}"));
                }
                if let Some(max) = schema.maximum
                    && n > max
                {
                    errors.push(format!("{name}: must be at most {max}"));
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    validate_value(&format!("{name}[{i}]"), item, item_schema, errors);
                }
            }
        }
        _ => {}
    }
}

fn validate_string(name: &str, s: &str, schema: &PropertySchema, errors: &mut Vec<String>) {
    let len = s.chars().count();
    if let Some(min) = schema.min_length
        && len < min
    {
        errors.push(format!("{name}: must be at least {min} characters"));
    }
    if let Some(max) = schema.max_length
        && len > max
    {
        errors.push(format!("{name}: must be at most {max} characters"));
    }
    if let Some(pattern) = &schema.pattern {
        match regex::Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => {
                errors.push(format!("{name}: does not match pattern {pattern}"));
            }
            Ok(_) => {}
            Err(e) => log::warn!("Ignoring invalid schema pattern field={name} error={e}"),
        }
    }
}
