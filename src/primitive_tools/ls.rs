use super::MAX_RESULTS;
use crate::environment::{DirEntry, EntryKind, Environment};
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Tool for listing one directory
pub struct LsTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> LsTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct LsInput {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    detailed: bool,
}

impl<E, Ctx> Tool<Ctx> for LsTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Ls
    }

    fn display_name(&self) -> &'static str {
        "List directory"
    }

    fn description(&self) -> &'static str {
        "List directory contents. Directories come first with a trailing '/'. Use detailed=true for entry types and sizes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list. Defaults to the working directory."
                },
                "detailed": {
                    "type": "boolean",
                    "description": "Show the type and size of every entry"
                }
            }
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: LsInput = serde_json::from_value(input).context("Invalid input for Ls tool")?;
        let dir = input.path.as_deref().map_or_else(
            || self.environment.root().to_path_buf(),
            |p| self.environment.resolve_path(p),
        );

        let mut entries = match self.environment.list_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolResult::error(format!("Ls failed: {e:#}"))),
        };
        entries.sort_by(|a, b| {
            (a.kind != EntryKind::Dir)
                .cmp(&(b.kind != EntryKind::Dir))
                .then_with(|| a.name.cmp(&b.name))
        });

        let total = entries.len();
        let directories = entries.iter().filter(|e| e.kind == EntryKind::Dir).count();
        if total == 0 {
            return Ok(ToolResult::success_with_metadata(
                format!("{} is empty", dir.display()),
                json!({ "count": 0, "directories": 0, "files": 0 }),
            ));
        }

        let mut lines: Vec<String> = entries
            .iter()
            .take(MAX_RESULTS)
            .map(|entry| {
                if input.detailed {
                    detailed_line(entry)
                } else {
                    short_line(entry)
                }
            })
            .collect();
        if total > MAX_RESULTS {
            lines.push(format!("({} more entries not shown)", total - MAX_RESULTS));
        }

        Ok(ToolResult::success_with_metadata(
            lines.join("\n"),
            json!({
                "count": total,
                "directories": directories,
                "files": total - directories,
            }),
        ))
    }
}

fn short_line(entry: &DirEntry) -> String {
    match entry.kind {
        EntryKind::Dir => format!("{}/", entry.name),
        EntryKind::File | EntryKind::Symlink => entry.name.clone(),
    }
}

fn detailed_line(entry: &DirEntry) -> String {
    let kind = match entry.kind {
        EntryKind::Dir => "DIR",
        EntryKind::File => "FILE",
        EntryKind::Symlink => "SYMLINK",
    };
    format!("{kind:<8} {} ({} bytes)", entry.name, entry.size)
}
