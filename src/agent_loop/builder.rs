use super::types::AbortHandle;
use super::{AgentLoop, Session};
use crate::events::{AgentEventEnvelope, SequenceCounter};
use crate::executor::ToolExecutor;
use crate::hooks::{AgentHooks, DefaultHooks};
use crate::llm::LlmProvider;
use crate::permissions::{
    Allowlist, AutoDeny, PermissionConfig, PermissionEngine, PermissionPrompter,
};
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, AgentState, ThreadId};
use crate::validation::SecurityPolicy;
use tokio::sync::{Mutex, mpsc, watch};

/// Builder for constructing an `AgentLoop`.
///
/// `build` is only available once a provider has been set.
///
/// # Example
///
/// ```ignore
/// let agent = AgentLoop::builder()
///     .provider(my_provider)
///     .tools(my_tools)
///     .prompter(ChannelPrompter::new(permission_tx))
///     .config(AgentConfig::default())
///     .build();
/// ```
pub struct AgentLoopBuilder<Ctx, P, H> {
    provider: P,
    hooks: H,
    tools: ToolRegistry<Ctx>,
    prompter: Box<dyn PermissionPrompter>,
    permissions: PermissionConfig,
    allowlist: Option<Allowlist>,
    security: Option<SecurityPolicy>,
    config: AgentConfig,
    events: Option<mpsc::Sender<AgentEventEnvelope>>,
    thread_id: Option<ThreadId>,
}

impl<Ctx: Send + Sync + 'static> AgentLoopBuilder<Ctx, (), DefaultHooks> {
    /// Create a new builder with no provider, no tools and no-op hooks.
    /// Permission requests are denied until a prompter is set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: (),
            hooks: DefaultHooks,
            tools: ToolRegistry::new(),
            prompter: Box::new(AutoDeny),
            permissions: PermissionConfig::default(),
            allowlist: None,
            security: None,
            config: AgentConfig::default(),
            events: None,
            thread_id: None,
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for AgentLoopBuilder<Ctx, (), DefaultHooks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx, P, H> AgentLoopBuilder<Ctx, P, H> {
    /// Set the LLM provider.
    #[must_use]
    pub fn provider<P2: LlmProvider>(self, provider: P2) -> AgentLoopBuilder<Ctx, P2, H> {
        AgentLoopBuilder {
            provider,
            hooks: self.hooks,
            tools: self.tools,
            prompter: self.prompter,
            permissions: self.permissions,
            allowlist: self.allowlist,
            security: self.security,
            config: self.config,
            events: self.events,
            thread_id: self.thread_id,
        }
    }

    /// Set the agent hooks.
    #[must_use]
    pub fn hooks<H2: AgentHooks>(self, hooks: H2) -> AgentLoopBuilder<Ctx, P, H2> {
        AgentLoopBuilder {
            provider: self.provider,
            hooks,
            tools: self.tools,
            prompter: self.prompter,
            permissions: self.permissions,
            allowlist: self.allowlist,
            security: self.security,
            config: self.config,
            events: self.events,
            thread_id: self.thread_id,
        }
    }

    /// Set the tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry<Ctx>) -> Self {
        self.tools = tools;
        self
    }

    /// Set who answers permission requests.
    #[must_use]
    pub fn prompter(mut self, prompter: impl PermissionPrompter + 'static) -> Self {
        self.prompter = Box::new(prompter);
        self
    }

    /// Set the permission mode and rules.
    #[must_use]
    pub fn permissions(mut self, config: PermissionConfig) -> Self {
        self.permissions = config;
        self
    }

    /// Pre-approved commands, paths and domains.
    #[must_use]
    pub fn allowlist(mut self, allowlist: Allowlist) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    /// Replace the default security policy used by the executor.
    #[must_use]
    pub fn security(mut self, policy: SecurityPolicy) -> Self {
        self.security = Some(policy);
        self
    }

    /// Set the agent configuration.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Send every emitted event, wrapped in an envelope, to `tx`.
    #[must_use]
    pub fn events(mut self, tx: mpsc::Sender<AgentEventEnvelope>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Resume under a known thread id instead of a fresh one.
    #[must_use]
    pub fn thread_id(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

impl<Ctx, P, H> AgentLoopBuilder<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: AgentHooks,
{
    /// Build the agent loop.
    #[must_use]
    pub fn build(self) -> AgentLoop<Ctx, P, H> {
        let mut executor =
            ToolExecutor::new(self.tools).with_default_timeout(self.config.tool_timeout);
        if let Some(security) = self.security {
            executor = executor.with_security(security);
        }

        let mut permissions = PermissionEngine::new(&self.permissions);
        if let Some(allowlist) = self.allowlist {
            permissions = permissions.with_allowlist(allowlist);
        }

        let thread_id = self.thread_id.unwrap_or_default();
        log::debug!(
            "Agent loop built thread_id={thread_id} provider={} model={} tools={} mode={:?}",
            self.provider.provider(),
            self.provider.model(),
            executor.registry().len(),
            permissions.mode()
        );

        let (state, _) = watch::channel(AgentState::Idle);
        AgentLoop {
            provider: self.provider,
            executor,
            hooks: self.hooks,
            prompter: self.prompter,
            config: self.config,
            thread_id,
            session: Mutex::new(Session {
                transcript: Vec::new(),
                permissions,
            }),
            state,
            abort: AbortHandle::new(),
            events: self.events,
            seq: SequenceCounter::new(),
        }
    }
}
