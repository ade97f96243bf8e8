//! The agent loop state machine.
//!
//! One [`AgentLoop`] owns one conversation. For every user message it calls
//! the model, routes the decoded tool invocations through the permission
//! engine and the executor, appends the outcomes and calls the model again
//! until it answers without invocations.
//!
//! ```text
//! idle -> processing -> streaming -> tool_pending -> executing_tool -> processing -> ... -> idle
//!                           \______________\_______________\__ abort __> stopping -> idle
//! ```
//!
//! # Example
//!
//! ```ignore
//! use coding_agent_core::{AgentLoop, AgentConfig, ToolContext, ToolRegistry};
//! use coding_agent_core::providers::AnthropicProvider;
//!
//! let (tx, mut events) = tokio::sync::mpsc::channel(256);
//! let agent = AgentLoop::builder()
//!     .provider(AnthropicProvider::from_env()?)
//!     .tools(ToolRegistry::new())
//!     .events(tx)
//!     .build();
//!
//! let summary = agent.process_user_message("list files", &ToolContext::new(())).await?;
//! ```

mod builder;
mod helpers;
mod llm;
mod tool_execution;
mod turn;
mod types;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

pub use builder::AgentLoopBuilder;
pub use types::{AbortHandle, ConversationTurn};

use crate::events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
use crate::executor::ToolExecutor;
use crate::hooks::{AgentHooks, DefaultHooks};
use crate::llm::{LlmProvider, Message};
use crate::permissions::{PermissionEngine, PermissionMode, PermissionPrompter};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{AgentConfig, AgentError, AgentState, ErrorKind, RunSummary, ThreadId};
use helpers::{send_event, trim_transcript};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc, watch};

/// Conversation state owned by one loop.
#[derive(Debug)]
struct Session {
    transcript: Vec<ConversationTurn>,
    permissions: PermissionEngine,
}

impl Session {
    fn append(&mut self, message: Message, max_turns: usize) {
        self.transcript.push(ConversationTurn::new(message));
        trim_transcript(&mut self.transcript, max_turns);
    }
}

/// Drives one conversation with a model.
pub struct AgentLoop<Ctx, P, H = DefaultHooks> {
    provider: P,
    executor: ToolExecutor<Ctx>,
    hooks: H,
    prompter: Box<dyn PermissionPrompter>,
    config: AgentConfig,
    thread_id: ThreadId,
    session: Mutex<Session>,
    state: watch::Sender<AgentState>,
    abort: types::AbortHandle,
    events: Option<mpsc::Sender<AgentEventEnvelope>>,
    seq: SequenceCounter,
}

/// Create a new builder for constructing an `AgentLoop`.
#[must_use]
pub fn builder<Ctx: Send + Sync + 'static>() -> AgentLoopBuilder<Ctx, (), DefaultHooks> {
    AgentLoopBuilder::new()
}

impl<Ctx: Send + Sync + 'static> AgentLoop<Ctx, (), DefaultHooks> {
    #[must_use]
    pub fn builder() -> AgentLoopBuilder<Ctx, (), DefaultHooks> {
        AgentLoopBuilder::new()
    }
}

impl<Ctx, P, H> AgentLoop<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: AgentHooks,
{
    /// Process one user message to completion.
    ///
    /// Whitespace-only messages are ignored and yield an empty summary. An
    /// abort ends the run with `aborted = true` and whatever text the model
    /// had produced.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Busy`] if another message is still being processed
    /// - [`ErrorKind::MaxIterations`] if the model never stops requesting tools
    /// - a transport kind when the provider fails beyond the retry policy
    pub async fn process_user_message(
        &self,
        message: impl Into<String>,
        ctx: &ToolContext<Ctx>,
    ) -> Result<RunSummary, AgentError> {
        let message = message.into();
        if message.trim().is_empty() {
            log::warn!("Ignoring empty user message thread_id={}", self.thread_id);
            return Ok(RunSummary::default());
        }

        let Ok(mut session) = self.session.try_lock() else {
            log::warn!("Rejecting message while busy thread_id={}", self.thread_id);
            return Err(AgentError::new(
                ErrorKind::Busy,
                "Agent is already processing a message",
            ));
        };

        self.abort.reset();
        let started = Instant::now();
        self.transition(AgentState::Processing).await;

        let result = self.run_turn(&mut session, message, ctx).await;
        drop(session);

        match &result {
            Ok(summary) if summary.aborted => {
                log::info!(
                    "Run aborted thread_id={} iterations={}",
                    self.thread_id,
                    summary.iterations
                );
                self.transition(AgentState::Stopping).await;
            }
            Ok(summary) => {
                self.emit(AgentEvent::done(
                    self.thread_id.clone(),
                    summary.iterations,
                    summary.usage,
                    started.elapsed(),
                ))
                .await;
            }
            Err(error) => {
                self.hooks.on_error(error).await;
                self.emit(AgentEvent::error(error.message.clone(), error.kind))
                    .await;
            }
        }
        self.transition(AgentState::Idle).await;
        result
    }

    async fn emit(&self, event: AgentEvent) {
        send_event(self.events.as_ref(), &self.hooks, &self.seq, event).await;
    }

    async fn transition(&self, to: AgentState) {
        let from = self.state.send_replace(to);
        if from != to {
            log::debug!("Agent state changed from={from} to={to}");
            self.emit(AgentEvent::state_changed(from, to)).await;
        }
    }
}

impl<Ctx, P, H> AgentLoop<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
{
    #[must_use]
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Handle that cancels the run in progress from any task.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    #[must_use]
    pub const fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry<Ctx> {
        self.executor.registry()
    }

    /// Change the registered tools; the next provider call sees the change.
    pub fn tools_mut(&mut self) -> &mut ToolRegistry<Ctx> {
        self.executor.registry_mut()
    }

    /// Snapshot of the transcript. Waits for a running turn to finish.
    pub async fn transcript(&self) -> Vec<ConversationTurn> {
        self.session.lock().await.transcript.clone()
    }

    pub async fn permission_mode(&self) -> PermissionMode {
        self.session.lock().await.permissions.mode()
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) {
        self.session.lock().await.permissions.set_mode(mode);
    }

    /// Run `f` against the permission engine (add rules, inspect grants).
    pub async fn update_permissions<R>(&self, f: impl FnOnce(&mut PermissionEngine) -> R) -> R {
        f(&mut self.session.lock().await.permissions)
    }

    /// Forget the transcript and every session-scoped permission grant.
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        session.transcript.clear();
        session.permissions.clear_session();
        log::info!("Session reset thread_id={}", self.thread_id);
    }
}
