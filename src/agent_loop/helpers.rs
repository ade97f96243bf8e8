use super::types::ConversationTurn;
use crate::events::{AgentEvent, AgentEventEnvelope, SequenceCounter};
use crate::hooks::AgentHooks;
use crate::llm::{ContentBlock, Role};
use crate::types::RetryConfig;
use std::time::Duration;
use tokio::sync::mpsc;

pub(super) const NO_RESULTS: &str = "Tool execution produced no results";
pub(super) const NO_CONTENT: &str = "No content returned";

/// Exponential backoff with jitter: `base * 2^(attempt-1) + jitter`, capped
/// at the configured maximum.
pub(super) fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config
        .base_delay_ms
        .saturating_mul(1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX));

    let max_jitter = config.base_delay_ms.min(1000);
    let jitter = if max_jitter > 0 {
        u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) % max_jitter
    } else {
        0
    };

    let delay_ms = base_delay.saturating_add(jitter).min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Hand an event to the hooks, then to the consumer channel.
///
/// A full channel is waited on for up to 30 seconds; a closed or missing
/// channel drops the event. The loop never fails because of a consumer.
pub(super) async fn send_event<H>(
    tx: Option<&mpsc::Sender<AgentEventEnvelope>>,
    hooks: &H,
    seq: &SequenceCounter,
    event: AgentEvent,
) where
    H: AgentHooks + ?Sized,
{
    hooks.on_event(&event).await;

    let Some(tx) = tx else {
        return;
    };
    let envelope = AgentEventEnvelope::wrap(event, seq);

    match tx.try_send(envelope) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(envelope)) => {
            log::debug!("Event channel full, waiting for consumer");
            match tokio::time::timeout(Duration::from_secs(30), tx.send(envelope)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => log::warn!("Event channel closed while sending"),
                Err(_) => log::error!("Timeout waiting to send event, consumer may be stuck"),
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("Event channel closed, dropping event");
        }
    }
}

/// Drop the oldest turns beyond `max_turns`, then every leading turn that
/// is not a plain user message: assistant turns, and outcome turns whose
/// invocations are gone. A request always opens with the user speaking.
pub(super) fn trim_transcript(transcript: &mut Vec<ConversationTurn>, max_turns: usize) {
    if transcript.len() <= max_turns {
        return;
    }
    let excess = transcript.len() - max_turns;
    log::warn!(
        "Transcript exceeds limit, removing oldest turns removed={excess} limit={max_turns}"
    );
    transcript.drain(..excess);

    let dangling = transcript
        .iter()
        .take_while(|turn| turn.role() != Role::User || turn.message.is_tool_outcome_only())
        .count();
    if dangling > 0 {
        log::debug!("Dropping turns that no longer follow a user message count={dangling}");
        transcript.drain(..dangling);
    }
}

/// Make a round's outcomes usable as the next request's input.
///
/// A round where every outcome is empty gets a diagnostic error in each slot;
/// otherwise individual empty outcomes get a placeholder.
pub(super) fn normalize_outcomes(blocks: &mut [ContentBlock]) {
    let is_empty = |block: &ContentBlock| {
        matches!(block, ContentBlock::ToolResult { content, .. } if content.trim().is_empty())
    };

    if !blocks.is_empty() && blocks.iter().all(is_empty) {
        log::warn!("Tool round produced no results count={}", blocks.len());
        for block in blocks.iter_mut() {
            if let ContentBlock::ToolResult {
                content, is_error, ..
            } = block
            {
                NO_RESULTS.clone_into(content);
                *is_error = Some(true);
            }
        }
        return;
    }

    for block in blocks.iter_mut() {
        if let ContentBlock::ToolResult { content, .. } = block
            && content.trim().is_empty()
        {
            NO_CONTENT.clone_into(content);
        }
    }
}
