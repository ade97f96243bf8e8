use super::types::{RoundOutcomes, aborted};
use super::{AgentLoop, Session};
use crate::events::AgentEvent;
use crate::hooks::{AgentHooks, ToolDecision};
use crate::llm::{ContentBlock, LlmProvider};
use crate::permissions::{PermissionRequest, PermissionResponse};
use crate::tools::ToolContext;
use crate::types::{AgentState, ToolInvocation, ToolResult};
use tokio::sync::watch;

pub(super) const CANCELLED: &str = "Cancelled by user";
pub(super) const DENIED: &str = "Permission denied by user";

impl<Ctx, P, H> AgentLoop<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: AgentHooks,
{
    /// Settle every invocation of a round, one at a time and in order.
    ///
    /// Each invocation yields exactly one outcome block. After an abort the
    /// remaining invocations are answered with a cancellation instead of
    /// running.
    pub(super) async fn execute_round(
        &self,
        session: &mut Session,
        invocations: &[ToolInvocation],
        ctx: &ToolContext<Ctx>,
        abort: &mut watch::Receiver<bool>,
    ) -> RoundOutcomes {
        let mut outcomes = RoundOutcomes {
            blocks: Vec::with_capacity(invocations.len()),
            aborted: false,
        };

        for invocation in invocations {
            let result = if outcomes.aborted || self.abort.is_aborted() {
                outcomes.aborted = true;
                ToolResult::error(CANCELLED)
            } else if let Some(result) = self.settle(session, invocation, ctx, abort).await {
                result
            } else {
                log::info!(
                    "Tool invocation cancelled id={} name={}",
                    invocation.id,
                    invocation.name
                );
                outcomes.aborted = true;
                let result = ToolResult::error(CANCELLED);
                self.finish(invocation, &result).await;
                result
            };

            outcomes.blocks.push(ContentBlock::tool_result(
                &invocation.id,
                result.content(),
                !result.success,
            ));
        }
        outcomes
    }

    /// Run one invocation through permission, hooks and the executor.
    ///
    /// Returns `None` when an abort interrupted the prompt or the tool.
    async fn settle(
        &self,
        session: &mut Session,
        invocation: &ToolInvocation,
        ctx: &ToolContext<Ctx>,
        abort: &mut watch::Receiver<bool>,
    ) -> Option<ToolResult> {
        let ToolInvocation { id, name, input } = invocation;
        let registry = self.executor.registry();
        let category = registry.category_of(name);
        self.transition(AgentState::ToolPending).await;

        // Unknown tools fail in the executor without bothering the human.
        if registry.contains(name) && session.permissions.needs_approval(name, input, category) {
            self.emit(AgentEvent::permission_request(id, name, input.clone(), category))
                .await;
            let request = PermissionRequest {
                id: id.clone(),
                tool_name: name.clone(),
                input: input.clone(),
                category,
            };

            let response = tokio::select! {
                biased;
                () = aborted(abort) => return None,
                response = self.prompter.prompt(request) => response,
            };
            log::debug!("Permission answered id={id} name={name} response={response:?}");

            match response {
                PermissionResponse::AllowOnce => {}
                PermissionResponse::AllowForSession => {
                    session.permissions.allow_for_session(name, input);
                }
                PermissionResponse::Deny => {
                    let result = ToolResult::error(DENIED);
                    self.finish(invocation, &result).await;
                    return Some(result);
                }
            }
        }

        if let ToolDecision::Block(reason) = self.hooks.pre_tool_use(name, input, category).await {
            log::info!("Tool invocation blocked by hook id={id} name={name} reason={reason}");
            let result = ToolResult::error(format!("Blocked: {reason}"));
            self.finish(invocation, &result).await;
            return Some(result);
        }

        self.emit(AgentEvent::tool_call_start(id, name, input.clone(), category))
            .await;
        self.transition(AgentState::ExecutingTool).await;

        let result = tokio::select! {
            biased;
            () = aborted(abort) => return None,
            result = self.executor.execute(ctx, name, input) => result,
        };

        log::debug!(
            "Tool invocation finished id={id} name={name} success={} duration_ms={}",
            result.success,
            result.duration_ms
        );
        self.hooks.post_tool_use(name, &result).await;
        self.finish(invocation, &result).await;
        Some(result)
    }

    async fn finish(&self, invocation: &ToolInvocation, result: &ToolResult) {
        self.emit(AgentEvent::tool_call_end(
            &invocation.id,
            &invocation.name,
            result.clone(),
        ))
        .await;
    }
}
