//! Tool executor: resolve, validate, sanitize, security check, then run the
//! tool under a timeout.
//!
//! Every failure comes back as a [`ToolResult`] with `success = false`; the
//! executor never returns `Err`. Results are produced fresh per invocation
//! and never retried here.

use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{ToolInvocation, ToolResult};
use crate::validation::{SecurityPolicy, prepare_input};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

pub struct ToolExecutor<Ctx> {
    registry: Arc<ToolRegistry<Ctx>>,
    security: SecurityPolicy,
    default_timeout: Duration,
}

impl<Ctx> Clone for ToolExecutor<Ctx> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            security: self.security.clone(),
            default_timeout: self.default_timeout,
        }
    }
}

impl<Ctx: Send + Sync + 'static> ToolExecutor<Ctx> {
    /// Executor over `registry` with the process security policy.
    #[must_use]
    pub fn new(registry: ToolRegistry<Ctx>) -> Self {
        Self {
            registry: Arc::new(registry),
            security: SecurityPolicy::from_env(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry<Ctx> {
        &self.registry
    }

    /// Mutable registry access. Clones the registry if a batch still holds it.
    pub fn registry_mut(&mut self) -> &mut ToolRegistry<Ctx> {
        Arc::make_mut(&mut self.registry)
    }

    #[must_use]
    pub const fn security(&self) -> &SecurityPolicy {
        &self.security
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run one invocation with the default timeout, or longer when the tool
    /// asks for more time for this input.
    pub async fn execute(&self, ctx: &ToolContext<Ctx>, name: &str, input: &Value) -> ToolResult {
        let timeout = self.timeout_for(name, input);
        self.execute_with_timeout(ctx, name, input, timeout).await
    }

    /// The deadline [`Self::execute`] applies to `name` with `input`.
    #[must_use]
    pub fn timeout_for(&self, name: &str, input: &Value) -> Duration {
        self.registry
            .get(name)
            .and_then(|tool| tool.timeout(input))
            .map_or(self.default_timeout, |wanted| wanted.max(self.default_timeout))
    }

    /// Run one invocation, giving up after `timeout`.
    ///
    /// A timed-out call reports `timed_out = true`; stopping the underlying
    /// work is left to the tool (dropping its future).
    pub async fn execute_with_timeout(
        &self,
        ctx: &ToolContext<Ctx>,
        name: &str,
        input: &Value,
        timeout: Duration,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(name) else {
            log::debug!("Tool not found tool={name}");
            return ToolResult::error(format!("Tool not found: {name}"));
        };

        let sanitized = match prepare_input(name, input, tool.schema(), &self.security) {
            Ok(sanitized) => sanitized,
            Err(rejection) => {
                log::debug!("Tool input rejected tool={name} reason={rejection}");
                return ToolResult::error(rejection.to_string());
            }
        };

        let start = Instant::now();
        match tokio::time::timeout(timeout, tool.execute(ctx, sanitized)).await {
            Ok(Ok(result)) => result.with_duration(millis_to_u64(start.elapsed().as_millis())),
            Ok(Err(e)) => ToolResult::error(format!("Execution failed: {e:#}"))
                .with_duration(millis_to_u64(start.elapsed().as_millis())),
            Err(_) => {
                let timeout_ms = millis_to_u64(timeout.as_millis());
                log::warn!("Tool execution timed out tool={name} timeout_ms={timeout_ms}");
                ToolResult::timeout(timeout_ms)
            }
        }
    }

    /// Run all invocations concurrently. One failure does not cancel the
    /// others; results come back in input order.
    pub async fn execute_parallel(
        &self,
        ctx: &ToolContext<Ctx>,
        invocations: &[ToolInvocation],
    ) -> Vec<ToolResult> {
        futures::future::join_all(
            invocations
                .iter()
                .map(|inv| self.execute(ctx, &inv.name, &inv.input)),
        )
        .await
    }

    /// Run invocations in order, stopping after the first failure. The
    /// failing result is the last entry.
    pub async fn execute_sequential(
        &self,
        ctx: &ToolContext<Ctx>,
        invocations: &[ToolInvocation],
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(invocations.len());
        for inv in invocations {
            let result = self.execute(ctx, &inv.name, &inv.input).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                log::debug!("Sequential batch stopped at failure tool={}", inv.name);
                break;
            }
        }
        results
    }
}
