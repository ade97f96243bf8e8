//! Permission engine: decides whether an invocation needs human approval.
//!
//! Decision order, first match wins:
//!
//! 1. Session allowlist (signatures approved with "allow for session") and
//!    pre-approved [`Allowlist`] entries
//! 2. [`PermissionMode`]
//! 3. Deny rules force approval
//! 4. Allow rules skip approval
//! 5. Otherwise approval is required
//!
//! Deny rules never deny silently; they always surface to the human.

mod allowlist;
mod mode;
mod prompt;
mod rules;

pub use allowlist::{Allowlist, AllowlistEntry, EntryKind, EntryScope};
pub use mode::PermissionMode;
pub use prompt::{
    AutoApprove, AutoDeny, ChannelPrompter, PendingPermission, PermissionPrompter,
    PermissionRequest, PermissionResponse,
};
pub use rules::PermissionRule;

use crate::types::ToolCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Mode and rule lists, as they appear in settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub mode: PermissionMode,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            mode: PermissionMode::Default,
            allow: vec!["Read".into(), "Glob".into(), "Grep".into()],
            deny: Vec::new(),
        }
    }
}

impl PermissionConfig {
    #[must_use]
    pub const fn with_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_allow(mut self, rule: impl Into<String>) -> Self {
        self.allow.push(rule.into());
        self
    }

    #[must_use]
    pub fn with_deny(mut self, rule: impl Into<String>) -> Self {
        self.deny.push(rule.into());
        self
    }
}

/// Key identifying "the same" invocation for session grants.
///
/// `Bash:<command>` for the shell tool, the bare tool name otherwise.
#[must_use]
pub fn signature(tool_name: &str, input: &Value) -> String {
    if tool_name == "Bash" {
        let command = input.get("command").and_then(Value::as_str).unwrap_or_default();
        format!("Bash:{command}")
    } else {
        tool_name.to_string()
    }
}

/// Per-loop permission state.
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    mode: PermissionMode,
    allow: Vec<PermissionRule>,
    deny: Vec<PermissionRule>,
    session: HashSet<String>,
    allowlist: Allowlist,
}

impl Default for PermissionEngine {
    fn default() -> Self {
        Self::new(&PermissionConfig::default())
    }
}

impl PermissionEngine {
    /// Build an engine from settings. Invalid rules are logged and skipped.
    #[must_use]
    pub fn new(config: &PermissionConfig) -> Self {
        Self {
            mode: config.mode,
            allow: rules::parse_rules(&config.allow),
            deny: rules::parse_rules(&config.deny),
            session: HashSet::new(),
            allowlist: Allowlist::new(),
        }
    }

    #[must_use]
    pub fn with_allowlist(mut self, allowlist: Allowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Whether the invocation must be put in front of a human.
    #[must_use]
    pub fn needs_approval(&self, tool_name: &str, input: &Value, category: ToolCategory) -> bool {
        let sig = signature(tool_name, input);
        if self.session.contains(&sig) {
            log::debug!("Permission granted by session allowlist signature={sig}");
            return false;
        }
        if self.allowlist.permits(tool_name, input) {
            log::debug!("Permission granted by allowlist tool={tool_name}");
            return false;
        }

        if let Some(needs) = self.mode.decide(category) {
            log::debug!(
                "Permission decided by mode mode={} tool={tool_name} needs_approval={needs}",
                self.mode
            );
            return needs;
        }

        if let Some(rule) = self.deny.iter().find(|r| r.matches(tool_name, input)) {
            log::debug!("Deny rule requires approval rule={} tool={tool_name}", rule.as_str());
            return true;
        }
        if let Some(rule) = self.allow.iter().find(|r| r.matches(tool_name, input)) {
            log::debug!("Allow rule grants permission rule={} tool={tool_name}", rule.as_str());
            return false;
        }

        log::debug!("No rule matched, approval required tool={tool_name}");
        true
    }

    /// Remember the invocation's signature so identical invocations skip
    /// approval for the rest of the session.
    pub fn allow_for_session(&mut self, tool_name: &str, input: &Value) {
        let sig = signature(tool_name, input);
        log::debug!("Session grant added signature={sig}");
        self.session.insert(sig);
    }

    #[must_use]
    pub fn is_session_allowed(&self, tool_name: &str, input: &Value) -> bool {
        self.session.contains(&signature(tool_name, input))
    }

    /// Forget session grants and session-scoped allowlist entries.
    pub fn clear_session(&mut self) {
        self.session.clear();
        self.allowlist.clear_session();
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        log::info!("Permission mode changed from={} to={mode}", self.mode);
        self.mode = mode;
    }

    #[must_use]
    pub const fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// # Errors
    ///
    /// Returns an error if the rule does not parse.
    pub fn add_allow_rule(&mut self, rule: &str) -> anyhow::Result<()> {
        self.allow.push(PermissionRule::parse(rule)?);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the rule does not parse.
    pub fn add_deny_rule(&mut self, rule: &str) -> anyhow::Result<()> {
        self.deny.push(PermissionRule::parse(rule)?);
        Ok(())
    }

    #[must_use]
    pub const fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub const fn allowlist_mut(&mut self) -> &mut Allowlist {
        &mut self.allowlist
    }
}
