use super::{MAX_RESULTS, truncate_bytes};
use crate::environment::{Environment, GrepQuery};
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
const MAX_LINE_BYTES: usize = 500;

/// Tool for searching file contents with a regex
pub struct GrepTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> GrepTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct GrepInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    /// File name filter, e.g. `*.rs`
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
}

impl<E, Ctx> Tool<Ctx> for GrepTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Grep
    }

    fn display_name(&self) -> &'static str {
        "Search files"
    }

    fn description(&self) -> &'static str {
        "Search file contents with a regular expression. Returns file:line:text for each match."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search. Defaults to the working directory."
                },
                "glob": {
                    "type": "string",
                    "description": "Only search files whose name matches this glob, e.g. '*.rs'"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case insensitive search. Default: false"
                }
            },
            "required": ["pattern"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: GrepInput =
            serde_json::from_value(input).context("Invalid input for Grep tool")?;

        let pattern = match RegexBuilder::new(&input.pattern)
            .case_insensitive(input.case_insensitive)
            .build()
        {
            Ok(pattern) => pattern,
            Err(e) => return Ok(ToolResult::error(format!("Invalid regex pattern: {e}"))),
        };
        let include = match input.glob.as_deref().map(glob::Pattern::new).transpose() {
            Ok(include) => include,
            Err(e) => return Ok(ToolResult::error(format!("Invalid glob filter: {e}"))),
        };
        let path = input.path.as_deref().map_or_else(
            || self.environment.root().to_path_buf(),
            |p| self.environment.resolve_path(p),
        );

        let query = GrepQuery {
            pattern,
            path,
            include,
            // One extra to detect truncation.
            max_matches: MAX_RESULTS + 1,
            max_file_size: MAX_FILE_SIZE,
        };
        let matches = self.environment.grep(&query).await?;

        if matches.is_empty() {
            return Ok(ToolResult::success(format!(
                "No matches found for pattern '{}'",
                input.pattern
            )));
        }

        let truncated = matches.len() > MAX_RESULTS;
        let lines: Vec<String> = matches
            .iter()
            .take(MAX_RESULTS)
            .map(|m| {
                format!(
                    "{}:{}:{}",
                    m.path,
                    m.line_number,
                    truncate_bytes(m.line_content.trim_end(), MAX_LINE_BYTES)
                )
            })
            .collect();

        let header = if truncated {
            format!("Found more than {MAX_RESULTS} matches (showing first {MAX_RESULTS}):")
        } else {
            format!("Found {} matches:", lines.len())
        };
        Ok(ToolResult::success(format!("{header}\n{}", lines.join("\n"))))
    }
}
