use crate::environment::Environment;
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Tool for reading file contents
pub struct ReadTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> ReadTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct ReadInput {
    file_path: String,
    /// Line to start from (1-based)
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

impl<E, Ctx> Tool<Ctx> for ReadTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Read
    }

    fn display_name(&self) -> &'static str {
        "Read file"
    }

    fn description(&self) -> &'static str {
        "Read file contents with line numbers. Use offset and limit for large files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Absolute path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start from (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of lines to read"
                }
            },
            "required": ["file_path"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: ReadInput =
            serde_json::from_value(input).context("Invalid input for Read tool")?;
        let path = self.environment.resolve_path(&input.file_path);
        let shown = path.display();

        if !self.environment.exists(&path).await {
            return Ok(ToolResult::error(format!("File not found: '{shown}'")));
        }
        if self.environment.is_dir(&path).await {
            return Ok(ToolResult::error(format!(
                "'{shown}' is a directory, not a file"
            )));
        }

        let content = self.environment.read_file(&path).await?;
        Ok(ToolResult::success(render_lines(
            &content,
            input.offset,
            input.limit,
        )))
    }
}

/// Numbered `cat -n` style listing of the selected window.
fn render_lines(content: &str, offset: Option<usize>, limit: Option<usize>) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let start = offset.unwrap_or(1).saturating_sub(1);
    let take = limit.unwrap_or(total);

    let selected: Vec<String> = lines
        .iter()
        .skip(start)
        .take(take)
        .enumerate()
        .map(|(i, line)| format!("{:>6}\t{line}", start + i + 1))
        .collect();

    if selected.is_empty() {
        return if total == 0 {
            "(empty file)".to_string()
        } else {
            format!("(no lines at offset {}; file has {total} lines)", start + 1)
        };
    }

    let body = selected.join("\n");
    if offset.is_some() || limit.is_some() {
        format!(
            "Showing lines {}-{} of {total} total\n{body}",
            start + 1,
            start + selected.len()
        )
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;

    fn tool_ctx() -> ToolContext<()> {
        ToolContext::new(())
    }

    #[tokio::test]
    async fn test_read_numbers_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("main.rs");
        std::fs::write(&path, "fn main() {\n}\n")?;

        let tool = ReadTool::new(Arc::new(LocalFileSystem::new(dir.path())));
        let result = tool
            .execute(&tool_ctx(), json!({"file_path": path.to_string_lossy()}))
            .await?;

        assert!(result.success);
        assert_eq!(result.output, "     1\tfn main() {\n     2\t}");
        Ok(())
    }

    #[tokio::test]
    async fn test_read_relative_to_root_with_window() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("notes.txt"), "a\nb\nc\nd\n")?;

        let tool = ReadTool::new(Arc::new(LocalFileSystem::new(dir.path())));
        let result = tool
            .execute(
                &tool_ctx(),
                json!({"file_path": "notes.txt", "offset": 2, "limit": 2}),
            )
            .await?;

        assert_eq!(
            result.output,
            "Showing lines 2-3 of 4 total\n     2\tb\n     3\tc"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_read_missing_and_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = ReadTool::new(Arc::new(LocalFileSystem::new(dir.path())));

        let missing = tool
            .execute(&tool_ctx(), json!({"file_path": "nope.txt"}))
            .await?;
        assert!(!missing.success);
        assert!(missing.content().starts_with("File not found"));

        let is_dir = tool
            .execute(&tool_ctx(), json!({"file_path": dir.path().to_string_lossy()}))
            .await?;
        assert!(is_dir.content().contains("is a directory"));
        Ok(())
    }

    #[test]
    fn test_render_lines_edges() {
        assert_eq!(render_lines("", None, None), "(empty file)");
        assert_eq!(
            render_lines("a\nb", Some(5), None),
            "(no lines at offset 5; file has 2 lines)"
        );
    }
}
