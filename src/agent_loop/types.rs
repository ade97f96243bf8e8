use crate::llm::{ContentBlock, Message, Role};
use crate::types::{ErrorKind, TokenUsage, ToolInvocation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;

/// One appended transcript entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(flatten)]
    pub message: Message,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ConversationTurn {
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            message,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.message.role
    }
}

/// Requests cancellation of the run in progress.
///
/// Cloneable and usable from any task. The flag is cleared when the next
/// user message starts processing.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub(super) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop at the next checked point: the next stream event, the pending
    /// permission prompt, the running tool, or the next iteration.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub(super) fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once the abort flag is raised. Never resolves otherwise.
pub(super) async fn aborted(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|aborted| *aborted).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// What one provider round produced.
#[derive(Debug, Default)]
pub(super) struct StreamedRound {
    pub text: String,
    /// The assistant message as emitted: text and tool blocks in order
    pub blocks: Vec<ContentBlock>,
    pub invocations: Vec<ToolInvocation>,
    pub usage: TokenUsage,
    /// The abort flag stopped the stream early
    pub aborted: bool,
}

/// Failure of a single streaming attempt.
#[derive(Debug)]
pub(super) struct StreamError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcomes of one tool round, in invocation order.
#[derive(Debug, Default)]
pub(super) struct RoundOutcomes {
    pub blocks: Vec<ContentBlock>,
    pub aborted: bool,
}
