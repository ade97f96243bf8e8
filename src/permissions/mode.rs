use crate::types::ToolCategory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much autonomy the agent has.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Rules decide; anything unmatched asks.
    #[default]
    Default,
    /// Read-only tools run; everything else asks.
    Plan,
    /// File edits run; shell and network still go through rules.
    AcceptEdits,
    /// Every invocation not already allow-listed asks.
    DontAsk,
    /// Everything runs.
    BypassPermissions,
}

impl PermissionMode {
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::Plan,
        Self::AcceptEdits,
        Self::DontAsk,
        Self::BypassPermissions,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Plan => "plan",
            Self::AcceptEdits => "acceptEdits",
            Self::DontAsk => "dontAsk",
            Self::BypassPermissions => "bypassPermissions",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Default => "Ask before anything not covered by an allow rule",
            Self::Plan => "Only read operations run without asking",
            Self::AcceptEdits => "File edits run without asking; commands still ask",
            Self::DontAsk => "Ask for everything not already approved this session",
            Self::BypassPermissions => "Run every tool without asking",
        }
    }

    /// Whether the mode alone settles the question.
    ///
    /// `Some(needs_approval)` short-circuits; `None` defers to the rules.
    #[must_use]
    pub const fn decide(self, category: ToolCategory) -> Option<bool> {
        match self {
            Self::BypassPermissions => Some(false),
            Self::Plan => Some(!category.is_read_only()),
            Self::AcceptEdits if matches!(category, ToolCategory::Write) => Some(false),
            Self::DontAsk => Some(true),
            Self::Default | Self::AcceptEdits => None,
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown permission mode: {s}"))
    }
}
