//! Tool input validation pipeline.
//!
//! Every invocation passes through three stages in a fixed order:
//!
//! 1. [`schema`] checks the raw input against the tool's declared schema
//! 2. [`sanitize`] produces a cleaned copy of the input
//! 3. [`security`] applies tool-specific policy to the cleaned copy
//!
//! The first failing stage short-circuits the rest.

pub mod sanitize;
pub mod schema;
pub mod security;

pub use sanitize::{sanitize_command, sanitize_input, sanitize_path, sanitize_string};
pub use schema::{ObjectSchema, PropertySchema, ValidationResult, validate_input};
pub use security::{SecurityPolicy, SecurityVerdict, upgrade_to_https};

use serde_json::Value;

/// Why an input was rejected before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Invalid(Vec<String>),
    Insecure(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(errors) => write!(f, "Invalid input: {}", errors.join(", ")),
            Self::Insecure(reason) => write!(f, "Security check failed: {reason}"),
        }
    }
}

/// Run all three stages, returning the sanitized input on success.
///
/// # Errors
///
/// Returns the first stage's [`Rejection`].
pub fn prepare_input(
    tool_name: &str,
    input: &Value,
    schema: &ObjectSchema,
    policy: &SecurityPolicy,
) -> Result<Value, Rejection> {
    let result = validate_input(input, schema);
    if !result.is_valid() {
        return Err(Rejection::Invalid(result.errors));
    }

    let sanitized = sanitize_input(input, schema);

    match policy.check(tool_name, &sanitized) {
        SecurityVerdict::Allowed => Ok(sanitized),
        SecurityVerdict::Denied(reason) => Err(Rejection::Insecure(reason)),
    }
}
