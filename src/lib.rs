//! Agent execution core for a terminal coding assistant.
//!
//! This crate provides the pieces between a hosted model and the local
//! machine:
//! - A turn loop that streams model output and runs the tools it asks for
//! - A streaming decoder that rebuilds tool invocations from partial JSON
//! - A validation pipeline (schema, sanitize, security) in front of every tool
//! - A permission engine with modes, rules, an allowlist and session grants
//! - Primitive tools for reading, writing, editing, searching and shelling out
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use coding_agent_core::{
//!     AgentLoop, LocalFileSystem, ToolContext, ToolRegistry,
//!     permissions::ChannelPrompter,
//!     primitive_tools::register_primitive_tools,
//!     providers::AnthropicProvider,
//! };
//!
//! let environment = Arc::new(LocalFileSystem::from_current_dir()?);
//! let mut tools = ToolRegistry::new();
//! register_primitive_tools(&mut tools, &environment);
//!
//! let (prompter, mut permission_requests) = ChannelPrompter::with_channel(16);
//! let (tx, mut events) = tokio::sync::mpsc::channel(256);
//! let agent = AgentLoop::builder()
//!     .provider(AnthropicProvider::from_env()?)
//!     .tools(tools)
//!     .prompter(prompter)
//!     .events(tx)
//!     .build();
//!
//! let summary = agent.process_user_message("Hello!", &ToolContext::new(())).await?;
//! ```

#![forbid(unsafe_code)]

mod agent_loop;
mod environment;
mod events;
mod executor;
mod filesystem;
mod hooks;
pub mod llm;
pub mod permissions;
pub mod primitive_tools;
pub mod providers;
mod tools;
mod types;
pub mod validation;

pub use agent_loop::{AbortHandle, AgentLoop, AgentLoopBuilder, ConversationTurn, builder};
pub use environment::{
    DirEntry, EntryKind, Environment, ExecResult, GrepMatch, GrepQuery, IGNORED_DIRS, is_ignored,
};
pub use events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
pub use executor::{DEFAULT_TOOL_TIMEOUT, ToolExecutor};
pub use filesystem::LocalFileSystem;
pub use hooks::{AgentHooks, DefaultHooks, LoggingHooks, ToolDecision};
pub use llm::LlmProvider;
pub use permissions::{PermissionConfig, PermissionEngine, PermissionMode};
pub use tools::{
    DynamicToolName, ErasedTool, PrimitiveToolName, Tool, ToolContext, ToolName, ToolRegistry,
    tool_name_from_str, tool_name_to_string,
};
pub use types::{
    AgentConfig, AgentError, AgentState, ErrorKind, RetryConfig, RunSummary, ThreadId,
    TokenUsage, ToolCategory, ToolInvocation, ToolResult,
};
