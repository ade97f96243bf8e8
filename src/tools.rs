//! Tool definition and registry.
//!
//! Tools allow the model to act on the workspace. This module provides:
//!
//! - [`Tool`] trait - Define tools the model can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`PrimitiveToolName`] - Names of the built-in primitive tools
//! - [`DynamicToolName`] - Tool names chosen at runtime
//! - [`ToolRegistry`] - Name-keyed collection of available tools
//! - [`ToolContext`] - Context passed to tool execution
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use coding_agent_core::{Tool, ToolContext, ToolResult, ToolCategory, DynamicToolName};
//!
//! struct Clock;
//!
//! impl Tool<()> for Clock {
//!     type Name = DynamicToolName;
//!
//!     fn name(&self) -> DynamicToolName { DynamicToolName::new("Clock") }
//!     fn display_name(&self) -> &'static str { "Clock" }
//!     fn description(&self) -> &'static str { "Returns the current time" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!     fn category(&self) -> ToolCategory { ToolCategory::Read }
//!
//!     async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
//!         Ok(ToolResult::success("12:00"))
//!     }
//! }
//! ```

use crate::llm;
use crate::types::{ToolCategory, ToolResult};
use crate::validation::ObjectSchema;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Marker trait for tool names.
///
/// The string the model sees is derived from the serde serialization.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// String form of a tool name, via serde.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    match serde_json::to_value(name) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(e) => {
            log::warn!("Tool name failed to serialize error={e}");
            String::new()
        }
    }
}

/// Parse a tool name from its string form.
///
/// # Errors
/// Returns error if the string doesn't match a valid tool name.
pub fn tool_name_from_str<N: ToolName>(s: &str) -> Result<N, serde_json::Error> {
    serde_json::from_value(Value::String(s.to_string()))
}

/// Names of the built-in primitive tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveToolName {
    Read,
    Write,
    Edit,
    Bash,
    Glob,
    Grep,
    Ls,
    WebFetch,
}

impl ToolName for PrimitiveToolName {}

/// Tool name chosen at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

/// Context passed to tool execution
pub struct ToolContext<Ctx> {
    /// Application-specific context
    pub app: Ctx,
    /// Per-call metadata (invocation id, ...)
    pub metadata: HashMap<String, Value>,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub fn new(app: Ctx) -> Self {
        Self {
            app,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A capability the model can invoke.
///
/// Implementations use native async functions; no `async_trait` needed.
pub trait Tool<Ctx>: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable display name for UI.
    fn display_name(&self) -> &'static str;

    /// Description handed to the model.
    fn description(&self) -> &'static str;

    /// JSON schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Permission classification.
    fn category(&self) -> ToolCategory {
        ToolCategory::Execute
    }

    /// Time this invocation needs, when it asks for more than the executor
    /// default (a long shell command, a slow download).
    fn timeout(&self, _input: &Value) -> Option<Duration> {
        None
    }

    /// Execute the tool with already validated and sanitized input.
    ///
    /// # Errors
    /// Returns an error if tool execution fails.
    fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        input: Value,
    ) -> impl Future<Output = Result<ToolResult>> + Send;
}

/// Type-erased tool trait for registry storage.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    fn name_str(&self) -> &str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    /// The declared schema, parsed once at registration.
    fn schema(&self) -> &ObjectSchema;
    fn category(&self) -> ToolCategory;
    fn timeout(&self, input: &Value) -> Option<Duration>;
    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult>;
}

struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    schema: ObjectSchema,
    _marker: PhantomData<Ctx>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        let schema = ObjectSchema::from_value(&tool.input_schema()).unwrap_or_else(|e| {
            log::warn!("Unsupported input schema, validating as open object tool={name_cache} error={e}");
            ObjectSchema::default()
        });
        Self {
            inner: tool,
            name_cache,
            schema,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn display_name(&self) -> &'static str {
        self.inner.display_name()
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    fn category(&self) -> ToolCategory {
        self.inner.category()
    }

    fn timeout(&self, input: &Value) -> Option<Duration> {
        self.inner.timeout(input)
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        self.inner.execute(ctx, input).await
    }
}

/// Registry of available tools, keyed by name.
///
/// Registering a name that already exists replaces the earlier tool.
pub struct ToolRegistry<Ctx> {
    tools: HashMap<String, Arc<dyn ErasedTool<Ctx>>>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its serialized name.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        if self.tools.insert(name.clone(), Arc::new(wrapper)).is_some() {
            log::debug!("Replaced registered tool tool={name}");
        }
        self
    }

    /// Remove a tool. Returns whether it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Category of `name`; unknown tools classify as [`ToolCategory::Execute`].
    #[must_use]
    pub fn category_of(&self, name: &str) -> ToolCategory {
        self.tools
            .get(name)
            .map_or(ToolCategory::Execute, |tool| tool.category())
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ErasedTool<Ctx>>> {
        self.tools.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Keep only the tools whose name satisfies `predicate`.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
    }

    /// Tool manifest for the next model call, sorted by name.
    ///
    /// Built fresh on every call so registration changes between turns are
    /// picked up.
    #[must_use]
    pub fn definitions(&self) -> Vec<llm::Tool> {
        let mut tools: Vec<_> = self
            .tools
            .values()
            .map(|tool| llm::Tool {
                name: tool.name_str().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}
