use super::truncate_bytes;
use crate::environment::Environment;
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Tool for exact string replacement in existing files
pub struct EditTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> EditTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct EditInput {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

impl<E, Ctx> Tool<Ctx> for EditTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Edit
    }

    fn display_name(&self) -> &'static str {
        "Edit file"
    }

    fn description(&self) -> &'static str {
        "Replace an exact string in a file. The string must occur exactly once unless replace_all is set."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute path of the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence. Default: false"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: EditInput =
            serde_json::from_value(input).context("Invalid input for Edit tool")?;
        let path = self.environment.resolve_path(&input.file_path);
        let shown = path.display();

        if input.old_string.is_empty() {
            return Ok(ToolResult::error("old_string must not be empty"));
        }
        if input.old_string == input.new_string {
            return Ok(ToolResult::error("old_string and new_string are identical"));
        }
        if !self.environment.exists(&path).await {
            return Ok(ToolResult::error(format!("File not found: '{shown}'")));
        }
        if self.environment.is_dir(&path).await {
            return Ok(ToolResult::error(format!("'{shown}' is a directory, cannot edit")));
        }

        let content = self.environment.read_file(&path).await?;
        let count = content.matches(&input.old_string).count();

        if count == 0 {
            return Ok(ToolResult::error(format!(
                "String not found in '{shown}': '{}'",
                truncate_bytes(&input.old_string, 100)
            )));
        }
        if count > 1 && !input.replace_all {
            return Ok(ToolResult::error(format!(
                "Found {count} occurrences of the string in '{shown}'. Use replace_all: true to replace all, or provide a more specific string."
            )));
        }

        let updated = if input.replace_all {
            content.replace(&input.old_string, &input.new_string)
        } else {
            content.replacen(&input.old_string, &input.new_string, 1)
        };
        self.environment.write_file(&path, &updated).await?;

        Ok(ToolResult::success(format!(
            "Successfully replaced {count} occurrence(s) in '{shown}'"
        )))
    }
}
