//! Streaming types and the stream decoder.
//!
//! Providers yield low-level [`StreamDelta`] events (block start, block
//! delta, block stop, message stop). [`StreamDecoder`] turns them into the
//! three events the agent loop cares about: text fragments, complete tool
//! invocations and the end of the message.
//!
//! Tool input arrives as fragments of a JSON document. The decoder buffers
//! every fragment for an invocation and parses the buffer exactly once, when
//! the block stops. A buffer that does not parse gets one cleanup pass
//! (trailing commas removed); if that still fails the invocation is emitted
//! with an empty object so every invocation keeps a matching outcome.
//!
//! The decoder also records the message as an ordered list of content
//! blocks. Text and tool blocks keep the order the provider opened them in,
//! so an assistant turn is replayed exactly as it was emitted.

use crate::llm::{ContentBlock, StopReason, Usage};
use crate::types::{ErrorKind, ToolInvocation};
use futures::Stream;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::pin::Pin;

/// Low-level events yielded by a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// The provider accepted the request and started a message.
    MessageStart {
        /// Provider message id
        id: String,
    },

    /// A text delta for streaming text content.
    TextDelta {
        /// The text fragment to append
        delta: String,
        /// Index of the content block being streamed
        block_index: usize,
    },

    /// Start of a tool use block (name and id are known).
    ToolUseStart {
        /// Unique identifier for this tool call
        id: String,
        /// Name of the tool being called
        name: String,
        /// Index of the content block
        block_index: usize,
    },

    /// Incremental JSON for tool input (partial/incomplete JSON).
    ToolInputDelta {
        /// JSON fragment to append
        delta: String,
        /// Index of the content block
        block_index: usize,
    },

    /// A content block finished.
    BlockStop {
        /// Index of the content block
        block_index: usize,
    },

    /// Usage information.
    Usage(Usage),

    /// Stream completed with stop reason.
    Done {
        /// Why the stream ended
        stop_reason: Option<StopReason>,
    },

    /// Error during streaming.
    Error {
        /// Error message
        message: String,
        /// Classification used by the retry policy
        kind: ErrorKind,
    },
}

/// Type alias for a boxed stream of stream deltas.
pub type StreamBox<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<StreamDelta>> + Send + 'a>>;

/// Simplified events produced by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Text(String),
    ToolInvocation(ToolInvocation),
    Done { stop_reason: Option<StopReason> },
}

#[derive(Debug)]
struct PendingInvocation {
    id: String,
    name: String,
    buffer: String,
    /// Position of this invocation in `slots`
    slot: usize,
}

/// One content block of the message, in emission order.
#[derive(Debug)]
enum Slot {
    Text { block_index: usize, text: String },
    /// Filled in when the block stops
    Invocation(Option<ToolInvocation>),
}

/// Reconstructs text and tool invocations from [`StreamDelta`] events.
///
/// One decoder handles one provider message. Invocations still buffering when
/// the decoder is dropped are discarded.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: BTreeMap<usize, PendingInvocation>,
    slots: Vec<Slot>,
    text: String,
    usage: Usage,
    stop_reason: Option<StopReason>,
    finished: bool,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one provider event, returning the decoded events it completes.
    pub fn push(&mut self, delta: StreamDelta) -> Vec<DecodedEvent> {
        if self.finished {
            log::warn!("Ignoring stream event after message stop event={delta:?}");
            return Vec::new();
        }

        match delta {
            StreamDelta::MessageStart { id } => {
                log::debug!("Stream message started message_id={id}");
                Vec::new()
            }
            StreamDelta::TextDelta { delta, block_index } => {
                if delta.is_empty() {
                    return Vec::new();
                }
                self.text.push_str(&delta);
                match self.slots.last_mut() {
                    Some(Slot::Text { block_index: open, text }) if *open == block_index => {
                        text.push_str(&delta);
                    }
                    _ => self.slots.push(Slot::Text {
                        block_index,
                        text: delta.clone(),
                    }),
                }
                vec![DecodedEvent::Text(delta)]
            }
            StreamDelta::ToolUseStart {
                id,
                name,
                block_index,
            } => {
                if id.is_empty() || name.is_empty() {
                    log::warn!(
                        "Skipping malformed tool block block_index={block_index} id={id:?} name={name:?}"
                    );
                    return Vec::new();
                }
                self.slots.push(Slot::Invocation(None));
                let previous = self.pending.insert(
                    block_index,
                    PendingInvocation {
                        id,
                        name,
                        buffer: String::new(),
                        slot: self.slots.len() - 1,
                    },
                );
                if let Some(previous) = previous {
                    log::warn!(
                        "Tool block restarted before stop block_index={block_index} dropped_id={}",
                        previous.id
                    );
                }
                Vec::new()
            }
            StreamDelta::ToolInputDelta { delta, block_index } => {
                match self.pending.get_mut(&block_index) {
                    Some(pending) => pending.buffer.push_str(&delta),
                    None => log::warn!(
                        "Skipping input delta for unknown tool block block_index={block_index}"
                    ),
                }
                Vec::new()
            }
            StreamDelta::BlockStop { block_index } => self
                .pending
                .remove(&block_index)
                .map(|pending| self.finalize(pending))
                .into_iter()
                .collect(),
            StreamDelta::Usage(usage) => {
                self.usage.input_tokens = self.usage.input_tokens.max(usage.input_tokens);
                self.usage.output_tokens = self.usage.output_tokens.max(usage.output_tokens);
                Vec::new()
            }
            StreamDelta::Done { stop_reason } => {
                self.finished = true;
                self.stop_reason = stop_reason;
                let mut events: Vec<DecodedEvent> = std::mem::take(&mut self.pending)
                    .into_values()
                    .map(|pending| {
                        log::warn!(
                            "Tool block closed by message stop tool_id={}",
                            pending.id
                        );
                        self.finalize(pending)
                    })
                    .collect();
                events.push(DecodedEvent::Done { stop_reason });
                events
            }
            StreamDelta::Error { message, kind } => {
                log::debug!("Decoder ignoring error event kind={kind:?} message={message}");
                Vec::new()
            }
        }
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Completed invocations in the order their blocks were opened.
    #[must_use]
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Invocation(Some(invocation)) => Some(invocation.clone()),
                _ => None,
            })
            .collect()
    }

    /// The message so far as content blocks, in emission order. Text is
    /// split wherever another block intervened; invocations still buffering
    /// are left out.
    #[must_use]
    pub fn content_blocks(&self) -> Vec<ContentBlock> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Text { text, .. } => Some(ContentBlock::Text { text: text.clone() }),
                Slot::Invocation(Some(invocation)) => Some(ContentBlock::ToolUse {
                    id: invocation.id.clone(),
                    name: invocation.name.clone(),
                    input: invocation.input.clone(),
                }),
                Slot::Invocation(None) => None,
            })
            .collect()
    }

    fn finalize(&mut self, pending: PendingInvocation) -> DecodedEvent {
        let input = parse_tool_input(&pending.id, &pending.buffer);
        let invocation = ToolInvocation {
            id: pending.id,
            name: pending.name,
            input,
        };
        if let Some(slot) = self.slots.get_mut(pending.slot) {
            *slot = Slot::Invocation(Some(invocation.clone()));
        }
        DecodedEvent::ToolInvocation(invocation)
    }

    /// Number of tool blocks still buffering input.
    #[must_use]
    pub fn pending_invocations(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn usage(&self) -> Usage {
        self.usage
    }

    #[must_use]
    pub const fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Parse a complete tool-input buffer into a JSON object.
///
/// Empty buffers and non-object documents become `{}`. A buffer that fails to
/// parse is retried once with trailing commas removed.
#[must_use]
pub fn parse_tool_input(tool_id: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }

    let parsed = serde_json::from_str::<Value>(raw).or_else(|error| {
        log::warn!("Tool input parse failed, retrying without trailing commas tool_id={tool_id} error={error}");
        serde_json::from_str::<Value>(&strip_trailing_commas(raw))
    });

    match parsed {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            log::warn!("Tool input is not an object tool_id={tool_id} value={other}");
            Value::Object(Map::new())
        }
        Err(error) => {
            log::warn!("Tool input unrecoverable, using empty input tool_id={tool_id} error={error}");
            Value::Object(Map::new())
        }
    }
}

/// Remove commas that directly precede `}` or `]`, ignoring string contents.
#[must_use]
pub fn strip_trailing_commas(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}' | ']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}
