use super::truncate_bytes;
use crate::environment::Environment;
use crate::executor::millis_to_u64;
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_BYTES: usize = 51_200;
const MAX_OUTPUT_LINES: usize = 2_000;
/// Room past the command's own deadline to kill it and collect its output.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Tool for executing shell commands
pub struct BashTool<E: Environment> {
    environment: Arc<E>,
}

impl<E: Environment> BashTool<E> {
    #[must_use]
    pub const fn new(environment: Arc<E>) -> Self {
        Self { environment }
    }
}

/// The command deadline requested by `input`, clamped to the allowed range.
fn requested_timeout_ms(input: &Value) -> u64 {
    input
        .get("timeout")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TIMEOUT_MS)
        .clamp(1, MAX_TIMEOUT_MS)
}

#[derive(Debug, Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
}

impl<E, Ctx> Tool<Ctx> for BashTool<E>
where
    E: Environment + 'static,
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::Bash
    }

    fn display_name(&self) -> &'static str {
        "Run command"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command. Use for git, cargo, npm and other CLI tools. Returns stdout, stderr and the exit code."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "description": {
                    "type": "string",
                    "description": "Short description of what the command does"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_TIMEOUT_MS,
                    "description": "Timeout in milliseconds. Default: 120000"
                },
                "workdir": {
                    "type": "string",
                    "description": "Absolute directory to run the command in"
                }
            },
            "required": ["command"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execute
    }

    fn timeout(&self, input: &Value) -> Option<Duration> {
        Some(Duration::from_millis(requested_timeout_ms(input)) + KILL_GRACE)
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let timeout_ms = requested_timeout_ms(&input);
        let input: BashInput =
            serde_json::from_value(input).context("Invalid input for Bash tool")?;
        let workdir = input
            .workdir
            .as_deref()
            .map(|dir| self.environment.resolve_path(dir));

        let started = std::time::Instant::now();
        let result = self
            .environment
            .exec(
                &input.command,
                workdir.as_ref().map(PathBuf::as_path),
                Duration::from_millis(timeout_ms),
            )
            .await
            .context("Failed to execute command")?;
        let duration_ms = millis_to_u64(started.elapsed().as_millis());

        let combined = combine_streams(&result.stdout, &result.stderr);

        if result.timed_out {
            let partial = if combined.is_empty() {
                "(no output before timeout)".to_string()
            } else {
                format!("Partial output:\n{}", truncate_output(&combined))
            };
            return Ok(ToolResult::failure_with_output(
                format!("Command timed out after {timeout_ms}ms"),
                partial,
            )
            .with_duration(duration_ms));
        }

        let output = if combined.is_empty() {
            "(no output)".to_string()
        } else {
            combined
        };
        let mut output = truncate_output(&output);
        let exit = result
            .exit_code
            .map_or_else(|| "killed".to_string(), |code| code.to_string());
        let _ = write!(output, "\n\nExit code: {exit}");

        let metadata = json!({ "exit_code": result.exit_code });
        if result.success() {
            Ok(ToolResult::success_with_metadata(output, metadata).with_duration(duration_ms))
        } else {
            Ok(
                ToolResult::failure_with_output(format!("Command exited with {exit}"), output)
                    .with_metadata(metadata)
                    .with_duration(duration_ms),
            )
        }
    }
}

fn combine_streams(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push_str("\n\n--- stderr ---\n");
        }
        output.push_str(stderr);
    }
    output
}

/// Keep at most [`MAX_OUTPUT_LINES`] lines and [`MAX_OUTPUT_BYTES`] bytes.
fn truncate_output(output: &str) -> String {
    let total_lines = output.lines().count();
    let by_lines = if total_lines > MAX_OUTPUT_LINES {
        output
            .lines()
            .take(MAX_OUTPUT_LINES)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        output.to_string()
    };
    let kept = truncate_bytes(&by_lines, MAX_OUTPUT_BYTES);

    if kept.len() == output.len() {
        return output.to_string();
    }
    format!(
        "{kept}\n\n(output truncated, {} bytes in {total_lines} lines total)",
        output.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use std::path::Path;

    fn tool(dir: &std::path::Path) -> BashTool<LocalFileSystem> {
        BashTool::new(Arc::new(LocalFileSystem::new(dir)))
    }

    fn tool_ctx() -> ToolContext<()> {
        ToolContext::new(())
    }

    #[tokio::test]
    async fn test_bash_success_includes_exit_code() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = tool(dir.path())
            .execute(&tool_ctx(), json!({"command": "echo hello"}))
            .await?;

        assert!(result.success);
        assert!(result.output.starts_with("hello\n"));
        assert!(result.output.ends_with("Exit code: 0"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bash_non_zero_exit_keeps_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = tool(dir.path())
            .execute(&tool_ctx(), json!({"command": "echo partial; echo bad >&2; exit 2"}))
            .await?;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command exited with 2"));
        assert!(result.output.contains("partial"));
        assert!(result.output.contains("--- stderr ---\nbad"));
        assert!(result.content().contains("Exit code: 2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bash_workdir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("sub/marker.txt"), "")?;

        let result = tool(dir.path())
            .execute(&tool_ctx(), json!({"command": "ls", "workdir": "sub"}))
            .await?;
        assert!(result.output.contains("marker.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bash_empty_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = tool(dir.path())
            .execute(&tool_ctx(), json!({"command": "true"}))
            .await?;
        assert!(result.output.starts_with("(no output)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bash_timeout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = tool(dir.path())
            .execute(&tool_ctx(), json!({"command": "sleep 5", "timeout": 100}))
            .await?;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command timed out after 100ms"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bash_timeout_keeps_partial_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = tool(dir.path())
            .execute(
                &tool_ctx(),
                json!({"command": "echo started; sleep 5", "timeout": 500}),
            )
            .await?;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Command timed out after 500ms"));
        assert!(result.output.starts_with("Partial output:\nstarted"));
        Ok(())
    }

    #[test]
    fn test_bash_asks_executor_for_its_own_deadline() {
        let bash = tool(Path::new("/tmp"));
        assert_eq!(
            Tool::<()>::timeout(&bash, &json!({"command": "make", "timeout": 600_000})),
            Some(Duration::from_secs(605))
        );
        assert_eq!(
            Tool::<()>::timeout(&bash, &json!({"command": "make"})),
            Some(Duration::from_secs(125))
        );
        assert_eq!(
            Tool::<()>::timeout(&bash, &json!({"command": "make", "timeout": 9_999_999})),
            Some(Duration::from_secs(605))
        );
    }

    #[test]
    fn test_truncate_output_by_lines() {
        let long = "line\n".repeat(MAX_OUTPUT_LINES + 10);
        let out = truncate_output(&long);
        assert_eq!(out.lines().filter(|l| *l == "line").count(), MAX_OUTPUT_LINES);
        assert!(out.contains("(output truncated"));
    }

    #[test]
    fn test_truncate_output_by_bytes() {
        let long = "x".repeat(MAX_OUTPUT_BYTES * 2);
        let out = truncate_output(&long);
        assert!(out.starts_with(&"x".repeat(MAX_OUTPUT_BYTES)));
        assert!(out.contains(&format!("{} bytes", MAX_OUTPUT_BYTES * 2)));

        assert_eq!(truncate_output("short"), "short");
    }
}
