use crate::environment::Environment;
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Tool for writing file contents
pub struct WriteTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> WriteTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct WriteInput {
    file_path: String,
    content: String,
}

impl<E, Ctx> Tool<Ctx> for WriteTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Write
    }

    fn display_name(&self) -> &'static str {
        "Write file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file, creating it and any missing parent directories. Overwrites existing files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: WriteInput =
            serde_json::from_value(input).context("Invalid input for Write tool")?;
        let path = self.environment.resolve_path(&input.file_path);

        if self.environment.is_dir(&path).await {
            return Ok(ToolResult::error(format!(
                "'{}' is a directory, cannot write",
                path.display()
            )));
        }

        self.environment.write_file(&path, &input.content).await?;

        let lines = input.content.lines().count();
        let bytes = input.content.len();
        Ok(ToolResult::success_with_metadata(
            format!(
                "Successfully wrote {lines} lines ({bytes} bytes) to '{}'",
                path.display()
            ),
            json!({ "lines": lines, "bytes": bytes }),
        ))
    }
}
