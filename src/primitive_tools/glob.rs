use super::MAX_RESULTS;
use crate::environment::Environment;
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Tool for finding files by glob pattern
pub struct GlobTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> GlobTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct GlobInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

impl<E, Ctx> Tool<Ctx> for GlobTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Glob
    }

    fn display_name(&self) -> &'static str {
        "Find files"
    }

    fn description(&self) -> &'static str {
        "Find files matching a glob pattern such as '**/*.rs'. Results are sorted newest first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. 'src/**/*.ts'"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search from. Defaults to the working directory."
                }
            },
            "required": ["pattern"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: GlobInput =
            serde_json::from_value(input).context("Invalid input for Glob tool")?;
        let base = input.path.as_deref().map_or_else(
            || self.environment.root().to_path_buf(),
            |p| self.environment.resolve_path(p),
        );

        let files = self.environment.glob(&input.pattern, &base).await?;
        if files.is_empty() {
            return Ok(ToolResult::success(format!(
                "No files found matching pattern '{}'",
                input.pattern
            )));
        }

        let total = files.len();
        let listed: Vec<String> = files
            .iter()
            .take(MAX_RESULTS)
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        let header = if total > MAX_RESULTS {
            format!("Found {total} files (showing first {MAX_RESULTS}):")
        } else {
            format!("Found {total} files:")
        };
        Ok(ToolResult::success_with_metadata(
            format!("{header}\n{}", listed.join("\n")),
            json!({ "count": total, "truncated": total > MAX_RESULTS }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;

    #[tokio::test]
    async fn test_glob_lists_matches() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("src"))?;
        std::fs::write(dir.path().join("src/a.rs"), "")?;
        std::fs::write(dir.path().join("src/b.rs"), "")?;
        std::fs::write(dir.path().join("README.md"), "")?;

        let tool = GlobTool::new(Arc::new(LocalFileSystem::new(dir.path())));
        let result = tool
            .execute(&ToolContext::new(()), json!({"pattern": "**/*.rs"}))
            .await?;

        assert!(result.success);
        assert!(result.output.starts_with("Found 2 files:"));
        assert!(result.output.contains("a.rs"));
        assert!(!result.output.contains("README.md"));
        Ok(())
    }

    #[tokio::test]
    async fn test_glob_no_matches() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = GlobTool::new(Arc::new(LocalFileSystem::new(dir.path())));
        let result = tool
            .execute(&ToolContext::new(()), json!({"pattern": "*.zig"}))
            .await?;
        assert!(result.success);
        assert_eq!(result.output, "No files found matching pattern '*.zig'");
        Ok(())
    }

    #[tokio::test]
    async fn test_glob_caps_results() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for i in 0..(MAX_RESULTS + 5) {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "")?;
        }

        let tool = GlobTool::new(Arc::new(LocalFileSystem::new(dir.path())));
        let result = tool
            .execute(&ToolContext::new(()), json!({"pattern": "*.txt"}))
            .await?;
        assert!(result.output.starts_with("Found 1005 files (showing first 1000):"));
        assert_eq!(result.output.lines().count(), MAX_RESULTS + 1);
        Ok(())
    }
}
