//! Pre-approved tools, commands, paths and URLs.

use super::rules::wildcard_regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

/// What an entry's pattern is matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Tool name
    Tool,
    /// Shell command
    Command,
    /// File path
    Path,
    /// URL
    Url,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryScope {
    /// Dropped by [`Allowlist::clear_session`]
    Session,
    /// Survives session resets and is exported
    Persistent,
}

/// One allowlist entry.
///
/// Patterns match exactly unless they contain `*` (wildcard) or `regex` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub id: String,
    pub kind: EntryKind,
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
    pub scope: EntryScope,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl AllowlistEntry {
    #[must_use]
    pub fn new(kind: EntryKind, pattern: impl Into<String>, scope: EntryScope) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            pattern: pattern.into(),
            regex: false,
            scope,
            added_at: OffsetDateTime::now_utc(),
            expires_at: None,
        }
    }

    #[must_use]
    pub const fn with_regex(mut self) -> Self {
        self.regex = true;
        self
    }

    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.added_at + ttl);
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let compiled = if self.regex {
            regex::Regex::new(&self.pattern)
        } else if self.pattern.contains('*') {
            wildcard_regex(&self.pattern)
        } else {
            return value == self.pattern;
        };
        match compiled {
            Ok(re) => re.is_match(value),
            Err(e) => {
                log::warn!("Ignoring invalid allowlist pattern id={} error={e}", self.id);
                false
            }
        }
    }
}

/// Commands that are safe to run without asking.
const DEFAULT_SAFE_COMMANDS: &[&str] = &[
    "git status",
    "git diff*",
    "git log*",
    "git branch",
    "cargo check",
    "cargo test*",
    "cargo build",
    "npm test",
    "npm run *",
    "ls",
    "pwd",
];

/// Collection of pre-approved operations.
#[derive(Clone, Debug, Default)]
pub struct Allowlist {
    entries: Vec<AllowlistEntry>,
}

impl Allowlist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allowlist seeded with [`DEFAULT_SAFE_COMMANDS`] as persistent entries.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut list = Self::new();
        for command in DEFAULT_SAFE_COMMANDS {
            list.add(AllowlistEntry::new(EntryKind::Command, *command, EntryScope::Persistent));
        }
        list
    }

    /// Add an entry, replacing any entry with the same id.
    pub fn add(&mut self, entry: AllowlistEntry) -> &AllowlistEntry {
        self.entries.retain(|e| e.id != entry.id);
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Whether an unexpired entry of `kind` matches `value`.
    #[must_use]
    pub fn is_allowed(&self, kind: EntryKind, value: &str) -> bool {
        let now = OffsetDateTime::now_utc();
        self.entries
            .iter()
            .filter(|e| e.kind == kind && !e.is_expired(now))
            .any(|e| e.matches(value))
    }

    /// Whether a tool invocation is covered by any entry.
    #[must_use]
    pub fn permits(&self, tool_name: &str, input: &Value) -> bool {
        if self.is_allowed(EntryKind::Tool, tool_name) {
            return true;
        }
        let field = |name: &str| input.get(name).and_then(Value::as_str);
        if tool_name == "Bash" {
            return field("command").is_some_and(|c| self.is_allowed(EntryKind::Command, c));
        }
        if let Some(url) = field("url") {
            return self.is_allowed(EntryKind::Url, url);
        }
        ["file_path", "filePath", "path"]
            .into_iter()
            .find_map(field)
            .is_some_and(|p| self.is_allowed(EntryKind::Path, p))
    }

    /// Drop expired entries.
    pub fn prune_expired(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.entries.retain(|e| !e.is_expired(now));
    }

    pub fn by_kind(&self, kind: EntryKind) -> impl Iterator<Item = &AllowlistEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    #[must_use]
    pub fn entries(&self) -> &[AllowlistEntry] {
        &self.entries
    }

    pub fn clear_session(&mut self) {
        self.entries.retain(|e| e.scope == EntryScope::Persistent);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Persistent entries, for saving.
    #[must_use]
    pub fn export(&self) -> Vec<AllowlistEntry> {
        self.entries
            .iter()
            .filter(|e| e.scope == EntryScope::Persistent)
            .cloned()
            .collect()
    }

    pub fn import(&mut self, entries: impl IntoIterator<Item = AllowlistEntry>) {
        for entry in entries {
            self.add(entry);
        }
    }
}
