//! Lifecycle events emitted by the agent loop.
//!
//! The [`AgentEvent`] enum covers everything a UI or logger may observe while
//! a user message is processed. Events are wrapped in an
//! [`AgentEventEnvelope`] and pushed through an async channel; consumers only
//! observe, they never drive the loop.
//!
//! # Event Flow
//!
//! A typical event sequence looks like:
//! 1. `StateChanged` to `processing`, then `Start` for each iteration
//! 2. `TextDelta` while the model streams; `Retrying` if the attempt failed
//!    and is repeated, in which case the deltas since the last `Start` or
//!    `Retrying` belong to the abandoned attempt and should be discarded
//! 3. `PermissionRequest` / `ToolCallStart` / `ToolCallEnd` for each invocation
//! 4. `TurnComplete` after every provider round
//! 5. `Done` on normal termination, `Aborted` on cancellation, or `Error`

use crate::types::{AgentState, ErrorKind, ThreadId, TokenUsage, ToolCategory, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Events emitted by the agent loop during execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The loop moved between states
    StateChanged { from: AgentState, to: AgentState },

    /// A provider round is starting
    Start { thread_id: ThreadId, iteration: usize },

    /// A text fragment streamed from the model
    TextDelta { delta: String },

    /// A provider attempt failed and will be repeated after `delay`.
    /// Text deltas streamed by the failed attempt are void.
    Retrying {
        attempt: u32,
        max_retries: u32,
        delay: Duration,
        kind: ErrorKind,
        message: String,
    },

    /// Complete assistant text for one round
    Text { text: String },

    /// The human is being asked to approve an invocation
    PermissionRequest {
        id: String,
        name: String,
        input: serde_json::Value,
        category: ToolCategory,
    },

    /// An invocation is about to run
    ToolCallStart {
        id: String,
        name: String,
        input: serde_json::Value,
        category: ToolCategory,
    },

    /// An invocation settled (executed, denied or blocked)
    ToolCallEnd {
        id: String,
        name: String,
        result: ToolResult,
    },

    /// One provider round finished
    TurnComplete { iteration: usize, usage: TokenUsage },

    /// The turn finished normally
    Done {
        thread_id: ThreadId,
        iterations: usize,
        total_usage: TokenUsage,
        duration: Duration,
    },

    /// The turn was cancelled; `partial_text` is what the model produced so far
    Aborted { partial_text: String },

    /// The turn failed
    Error { message: String, kind: ErrorKind },
}

impl AgentEvent {
    #[must_use]
    pub const fn state_changed(from: AgentState, to: AgentState) -> Self {
        Self::StateChanged { from, to }
    }

    #[must_use]
    pub const fn start(thread_id: ThreadId, iteration: usize) -> Self {
        Self::Start {
            thread_id,
            iteration,
        }
    }

    #[must_use]
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    #[must_use]
    pub fn retrying(
        attempt: u32,
        max_retries: u32,
        delay: Duration,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Retrying {
            attempt,
            max_retries,
            delay,
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn permission_request(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
        category: ToolCategory,
    ) -> Self {
        Self::PermissionRequest {
            id: id.into(),
            name: name.into(),
            input,
            category,
        }
    }

    #[must_use]
    pub fn tool_call_start(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
        category: ToolCategory,
    ) -> Self {
        Self::ToolCallStart {
            id: id.into(),
            name: name.into(),
            input,
            category,
        }
    }

    #[must_use]
    pub fn tool_call_end(id: impl Into<String>, name: impl Into<String>, result: ToolResult) -> Self {
        Self::ToolCallEnd {
            id: id.into(),
            name: name.into(),
            result,
        }
    }

    #[must_use]
    pub const fn done(
        thread_id: ThreadId,
        iterations: usize,
        total_usage: TokenUsage,
        duration: Duration,
    ) -> Self {
        Self::Done {
            thread_id,
            iterations,
            total_usage,
            duration,
        }
    }

    #[must_use]
    pub fn aborted(partial_text: impl Into<String>) -> Self {
        Self::Aborted {
            partial_text: partial_text.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }
}

/// Monotonically increasing counter for event ordering.
///
/// One counter lives for the lifetime of an agent loop instance, so sequence
/// numbers keep increasing across user messages.
///
/// `Ordering::Relaxed` is sufficient because the mpsc channel provides the
/// happens-before ordering guarantee between sender and receiver.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Create a new counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every [`AgentEvent`] with ordering metadata.
///
/// The `event` field is flattened in JSON so that `event_id`, `sequence`,
/// `timestamp`, and the event's `type` discriminant all appear at the same level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEventEnvelope {
    /// Unique identifier (UUID v4) for this event emission.
    pub event_id: uuid::Uuid,
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// UTC timestamp of when the event was emitted.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The actual event payload.
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl AgentEventEnvelope {
    #[must_use]
    pub fn wrap(event: AgentEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}
