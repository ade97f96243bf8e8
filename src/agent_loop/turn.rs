use super::helpers::normalize_outcomes;
use super::{AgentLoop, Session};
use crate::events::AgentEvent;
use crate::hooks::AgentHooks;
use crate::llm::{ChatRequest, LlmProvider, Message};
use crate::tools::ToolContext;
use crate::types::{AgentError, AgentState, RunSummary};

impl<Ctx, P, H> AgentLoop<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: AgentHooks,
{
    /// Alternate provider rounds and tool rounds until the model answers
    /// without invocations, the abort flag is raised, or the iteration cap
    /// is reached.
    pub(super) async fn run_turn(
        &self,
        session: &mut Session,
        message: String,
        ctx: &ToolContext<Ctx>,
    ) -> Result<RunSummary, AgentError> {
        let max_turns = self.config.max_transcript_turns;
        let mut abort = self.abort.subscribe();
        let mut summary = RunSummary::default();

        session.append(Message::user(message), max_turns);

        for iteration in 1..=self.config.max_iterations {
            if self.abort.is_aborted() {
                return Ok(self.aborted_summary(summary).await);
            }

            summary.iterations = iteration;
            log::debug!(
                "Starting provider round thread_id={} iteration={iteration} transcript_len={}",
                self.thread_id,
                session.transcript.len()
            );
            self.emit(AgentEvent::start(self.thread_id.clone(), iteration))
                .await;
            self.transition(AgentState::Streaming).await;

            let request = self.build_request(session);
            let round = self.stream_with_retry(&request, &mut abort).await?;
            summary.usage.add(&round.usage);

            if round.aborted {
                if !round.text.is_empty() {
                    session.append(Message::assistant(round.text.clone()), max_turns);
                }
                summary.text = round.text;
                return Ok(self.aborted_summary(summary).await);
            }

            if !round.text.is_empty() {
                self.emit(AgentEvent::text(round.text.clone())).await;
            }

            if round.invocations.is_empty() {
                if round.text.is_empty() {
                    log::warn!("Model returned an empty response iteration={iteration}");
                } else {
                    session.append(Message::assistant(round.text.clone()), max_turns);
                }
                self.emit(AgentEvent::TurnComplete {
                    iteration,
                    usage: round.usage,
                })
                .await;
                summary.text = round.text;
                return Ok(summary);
            }

            let mut outcomes = self
                .execute_round(session, &round.invocations, ctx, &mut abort)
                .await;
            normalize_outcomes(&mut outcomes.blocks);

            session.append(Message::assistant_blocks(round.blocks), max_turns);
            session.append(Message::tool_outcomes(outcomes.blocks), max_turns);
            self.emit(AgentEvent::TurnComplete {
                iteration,
                usage: round.usage,
            })
            .await;

            if outcomes.aborted {
                summary.text = round.text;
                return Ok(self.aborted_summary(summary).await);
            }
            self.transition(AgentState::Processing).await;
        }

        log::error!(
            "Maximum iterations reached thread_id={} max_iterations={}",
            self.thread_id,
            self.config.max_iterations
        );
        Err(AgentError::max_iterations(self.config.max_iterations))
    }

    /// The tool list is rebuilt every round so registry changes take effect.
    fn build_request(&self, session: &Session) -> ChatRequest {
        let definitions = self.executor.registry().definitions();
        ChatRequest {
            system: self.config.system_prompt.clone(),
            messages: session
                .transcript
                .iter()
                .map(|turn| turn.message.clone())
                .collect(),
            tools: (!definitions.is_empty()).then_some(definitions),
            max_tokens: self.config.max_tokens,
        }
    }

    async fn aborted_summary(&self, mut summary: RunSummary) -> RunSummary {
        summary.aborted = true;
        self.emit(AgentEvent::aborted(summary.text.clone())).await;
        summary
    }
}
