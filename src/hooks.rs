//! Agent lifecycle hooks.
//!
//! Hooks observe the loop at key points and may veto an invocation that the
//! permission engine already approved:
//!
//! - [`AgentHooks::pre_tool_use`] - Last chance to block an invocation
//! - [`AgentHooks::post_tool_use`] - React to tool completion
//! - [`AgentHooks::on_event`] - Log or forward lifecycle events
//! - [`AgentHooks::on_error`] - Observe turn-fatal errors
//!
//! # Built-in Implementations
//!
//! - [`DefaultHooks`] - Allows everything, observes nothing
//! - [`LoggingHooks`] - `tracing` events for every hook point

use crate::events::AgentEvent;
use crate::types::{AgentError, ToolCategory, ToolResult};
use async_trait::async_trait;
use serde_json::Value;

/// Decision returned by [`AgentHooks::pre_tool_use`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    /// Let the invocation run
    Allow,
    /// Skip it; the reason is fed back to the model
    Block(String),
}

/// Lifecycle hooks for the agent loop. Every method has a no-op default.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called after permission is granted and before the executor runs.
    async fn pre_tool_use(
        &self,
        _tool_name: &str,
        _input: &Value,
        _category: ToolCategory,
    ) -> ToolDecision {
        ToolDecision::Allow
    }

    /// Called after an invocation settles, including failures.
    async fn post_tool_use(&self, _tool_name: &str, _result: &ToolResult) {}

    /// Called for every emitted event, before it reaches the channel.
    async fn on_event(&self, _event: &AgentEvent) {}

    /// Called when the turn ends with an error.
    async fn on_error(&self, _error: &AgentError) {}
}

/// No-op hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

#[async_trait]
impl AgentHooks for DefaultHooks {}

/// Hooks that trace every hook point (useful for debugging)
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

#[async_trait]
impl AgentHooks for LoggingHooks {
    async fn pre_tool_use(
        &self,
        tool_name: &str,
        input: &Value,
        category: ToolCategory,
    ) -> ToolDecision {
        tracing::debug!(tool = tool_name, ?input, ?category, "Pre-tool use");
        ToolDecision::Allow
    }

    async fn post_tool_use(&self, tool_name: &str, result: &ToolResult) {
        tracing::debug!(
            tool = tool_name,
            success = result.success,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "Post-tool use"
        );
    }

    async fn on_event(&self, event: &AgentEvent) {
        tracing::trace!(?event, "Agent event");
    }

    async fn on_error(&self, error: &AgentError) {
        tracing::error!(kind = ?error.kind, message = %error.message, "Agent error");
    }
}
