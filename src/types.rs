//! Core types for the agent core.
//!
//! - [`ThreadId`]: Unique identifier for a conversation
//! - [`AgentConfig`]: Configuration for the agent loop
//! - [`RetryConfig`]: Backoff policy for the provider transport
//! - [`TokenUsage`]: Token consumption statistics
//! - [`ToolResult`]: Result of executing one tool invocation
//! - [`ToolCategory`]: Permission classification of a tool
//! - [`ToolInvocation`]: A complete tool request decoded from the model stream
//! - [`AgentState`]: The loop state machine
//! - [`AgentError`] / [`ErrorKind`]: Errors that terminate a turn
//! - [`RunSummary`]: What a finished turn produced

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a conversation thread
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the agent loop
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Model identifier sent with every request
    pub model: String,
    /// System prompt for the agent
    pub system_prompt: String,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// Hard cap on provider calls per user message
    pub max_iterations: usize,
    /// Hard cap on transcript length; the oldest turns are dropped first
    pub max_transcript_turns: usize,
    /// Per-invocation timeout enforced by the executor
    pub tool_timeout: Duration,
    /// Retry configuration for transient transport errors
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::from("claude-sonnet-4-5-20250929"),
            system_prompt: String::new(),
            max_tokens: 4096,
            max_iterations: 50,
            max_transcript_turns: 500,
            tool_timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_max_transcript_turns(mut self, max_turns: usize) -> Self {
        self.max_transcript_turns = max_turns;
        self
    }

    #[must_use]
    pub const fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for retry behavior on transient errors.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (for testing)
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
        }
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub const fn add(&mut self, other: &Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Result of a tool execution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content (fed back to the model)
    pub output: String,
    /// Failure description, set when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the execution
    pub duration_ms: u64,
    /// Optional structured data produced by the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Set when the executor gave up waiting for the tool
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn success_with_metadata(output: impl Into<String>, metadata: Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            metadata: Some(metadata),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// A failure that still carries the tool's output (e.g. a non-zero exit).
    #[must_use]
    pub fn failure_with_output(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            timed_out: true,
            duration_ms: timeout_ms,
            ..Self::error(format!("Tool execution timed out after {timeout_ms}ms"))
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Text handed back to the model as the outcome content.
    #[must_use]
    pub fn content(&self) -> String {
        match (&self.error, self.success) {
            (Some(error), false) if self.output.is_empty() => error.clone(),
            (Some(error), false) => format!("{error}\n{}", self.output),
            _ => self.output.clone(),
        }
    }
}

/// Permission classification of a tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Observes the workspace without side effects
    Read,
    /// Modifies files
    Write,
    /// Runs processes or otherwise unbounded actions
    #[default]
    Execute,
    /// Reaches the network
    Network,
}

impl ToolCategory {
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Read)
    }
}

/// A complete tool request decoded from the model stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolInvocation {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// State of the agent loop.
///
/// `Idle` is both the initial and the terminal state of every run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Processing,
    Streaming,
    ToolPending,
    ExecutingTool,
    Stopping,
}

impl AgentState {
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Streaming => "streaming",
            Self::ToolPending => "tool_pending",
            Self::ExecutingTool => "executing_tool",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Classification of an error that ends a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials were rejected (401/403)
    Auth,
    /// The provider rejected the request shape (400 and friends)
    InvalidRequest,
    /// Too many requests (429)
    RateLimited,
    /// Transient provider failure (500/502/503/504)
    Server,
    /// Connection reset, timeout, or a truncated stream
    Network,
    /// Any other non-retryable provider failure
    Provider,
    /// The iteration cap was hit
    MaxIterations,
    /// A message arrived while the loop was already running
    Busy,
}

impl ErrorKind {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Server | Self::Network)
    }
}

/// Error that terminates the current turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AgentError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn max_iterations(limit: usize) -> Self {
        Self::new(
            ErrorKind::MaxIterations,
            format!("Agent loop exceeded maximum iterations ({limit})"),
        )
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AgentError {}

/// What a finished turn produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Final assistant text (partial when aborted)
    pub text: String,
    /// Provider calls made for this user message
    pub iterations: usize,
    /// Tokens consumed across all iterations
    pub usage: TokenUsage,
    /// Whether the turn ended because of an abort request
    pub aborted: bool,
}
