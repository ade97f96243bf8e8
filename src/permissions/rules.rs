//! `Tool` / `Tool(pattern)` permission rules.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static RULE_SYNTAX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\w+|\*)(?:\((.+)\))?$").ok());

/// Input fields a rule pattern is matched against, first present wins.
const MATCH_FIELDS: &[&str] = &["command", "file_path", "filePath", "path", "url", "pattern"];

/// A parsed allow or deny rule such as `Bash(git *)` or `Read`.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    source: String,
    tool: Regex,
    pattern: Option<Regex>,
}

impl PermissionRule {
    /// Parse a rule string.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool or pattern part cannot be compiled.
    pub fn parse(rule: &str) -> Result<Self> {
        let rule = rule.trim();
        let (tool, pattern) = match RULE_SYNTAX.as_ref().and_then(|re| re.captures(rule)) {
            Some(caps) => (
                caps.get(1).map_or(rule, |m| m.as_str()),
                caps.get(2).map(|m| m.as_str()),
            ),
            None => (rule, None),
        };

        Ok(Self {
            source: rule.to_string(),
            tool: wildcard_regex(tool).with_context(|| format!("Invalid rule tool: {rule}"))?,
            pattern: pattern
                .map(wildcard_regex)
                .transpose()
                .with_context(|| format!("Invalid rule pattern: {rule}"))?,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// A bare tool rule matches every invocation of the tool; a pattern rule
    /// also needs the invocation's subject to match.
    #[must_use]
    pub fn matches(&self, tool_name: &str, input: &Value) -> bool {
        if !self.tool.is_match(tool_name) {
            return false;
        }
        let Some(pattern) = &self.pattern else {
            return true;
        };
        rule_subject(input).is_some_and(|subject| pattern.is_match(subject))
    }
}

fn rule_subject(input: &Value) -> Option<&str> {
    MATCH_FIELDS
        .iter()
        .find_map(|field| input.get(*field).and_then(Value::as_str))
}

/// Compile a wildcard pattern where `*` matches any run of characters.
pub(crate) fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?s)^{escaped}$"))
}

/// Parse every rule, logging and skipping invalid ones.
pub(crate) fn parse_rules<S: AsRef<str>>(rules: &[S]) -> Vec<PermissionRule> {
    rules
        .iter()
        .filter_map(|rule| match PermissionRule::parse(rule.as_ref()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("Skipping invalid permission rule rule={} error={e:#}", rule.as_ref());
                None
            }
        })
        .collect()
}
