//! Anthropic Messages API wire types, request conversion and the SSE parser.

use crate::llm::{ChatRequest, Content, ContentBlock, Role, StopReason, StreamDelta, Usage};
use crate::types::ErrorKind;
use serde::{Deserialize, Serialize};

// ============================================================================
// API Request Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiMessagesRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub system: &'a str,
    pub messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [ApiTool]>,
    pub stream: bool,
}

#[derive(Serialize)]
pub struct ApiTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Serialize)]
pub struct ApiMessage {
    pub role: ApiRole,
    pub content: ApiMessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum ApiMessageContent {
    Text(String),
    Blocks(Vec<ApiContentBlockInput>),
}

#[derive(Serialize)]
pub struct ApiSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(tag = "type")]
pub enum ApiContentBlockInput {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(rename = "image")]
    Image { source: ApiSource },
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiRole {
    User,
    Assistant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

// ============================================================================
// SSE Streaming Types
// ============================================================================

#[derive(Deserialize)]
struct SseEnvelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

#[derive(Deserialize)]
struct SseMessageStart {
    message: SseMessageStartMessage,
}

#[derive(Deserialize)]
struct SseMessageStartMessage {
    #[serde(default)]
    id: String,
    usage: Option<SseUsage>,
}

#[derive(Deserialize)]
struct SseUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct SseContentBlockStart {
    index: usize,
    content_block: Option<SseContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum SseContentBlock {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct SseContentBlockDelta {
    index: usize,
    delta: Option<SseDelta>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum SseDelta {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(rename = "input_json_delta")]
    InputJson { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct SseContentBlockStop {
    index: usize,
}

#[derive(Deserialize)]
struct SseMessageDelta {
    delta: SseMessageDeltaData,
    usage: Option<SseUsage>,
}

#[derive(Deserialize)]
struct SseMessageDeltaData {
    stop_reason: Option<ApiStopReason>,
}

#[derive(Deserialize)]
struct SseError {
    error: SseErrorBody,
}

#[derive(Deserialize)]
struct SseErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

/// Per-stream state carried between SSE frames.
#[derive(Debug, Default)]
pub struct SseState {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<StopReason>,
    pub received_message_stop: bool,
}

/// Splits a response body into complete SSE frames.
///
/// Bytes stay raw until a whole frame (terminated by a blank line) is
/// buffered, so a multi-byte character split across network chunks is
/// decoded intact.
#[derive(Debug, Default)]
pub struct SseFrames {
    buffer: Vec<u8>,
}

impl SseFrames {
    /// Append one network chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            frames.extend(decode_frame(&frame));
        }
        frames
    }

    /// The unterminated tail left when the body ends, if it holds anything.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(&rest)
            .map(|frame| frame.trim().to_owned())
            .filter(|frame| !frame.is_empty())
    }
}

fn decode_frame(bytes: &[u8]) -> Option<String> {
    match std::str::from_utf8(bytes) {
        Ok(frame) => Some(frame.to_owned()),
        Err(error) => {
            log::warn!("Skipping SSE frame that is not valid UTF-8 len={} error={error}", bytes.len());
            None
        }
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

fn map_block(block: &ContentBlock) -> ApiContentBlockInput {
    match block {
        ContentBlock::Text { text } => ApiContentBlockInput::Text { text: text.clone() },
        ContentBlock::ToolUse { id, name, input } => ApiContentBlockInput::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ApiContentBlockInput::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        ContentBlock::Image { source } => ApiContentBlockInput::Image {
            source: ApiSource {
                source_type: source.kind.clone(),
                media_type: source.media_type.clone(),
                data: source.data.clone(),
            },
        },
    }
}

/// Build API messages from the chat request.
pub fn build_api_messages(request: &ChatRequest) -> Vec<ApiMessage> {
    request
        .messages
        .iter()
        .map(|m| ApiMessage {
            role: match m.role {
                Role::User => ApiRole::User,
                Role::Assistant => ApiRole::Assistant,
            },
            content: match &m.content {
                Content::Text(s) => ApiMessageContent::Text(s.clone()),
                Content::Blocks(blocks) => {
                    ApiMessageContent::Blocks(blocks.iter().map(map_block).collect())
                }
            },
        })
        .collect()
}

/// Build API tools from the chat request.
pub fn build_api_tools(request: &ChatRequest) -> Option<Vec<ApiTool>> {
    request.tools.as_ref().map(|ts| {
        ts.iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    })
}

/// Map an `ApiStopReason` to a `StopReason`.
pub const fn map_stop_reason(reason: &ApiStopReason) -> StopReason {
    match reason {
        ApiStopReason::ToolUse => StopReason::ToolUse,
        ApiStopReason::MaxTokens => StopReason::MaxTokens,
        ApiStopReason::StopSequence => StopReason::StopSequence,
        ApiStopReason::EndTurn | ApiStopReason::Other => StopReason::EndTurn,
    }
}

fn map_error_type(error_type: &str) -> ErrorKind {
    match error_type {
        "rate_limit_error" => ErrorKind::RateLimited,
        "overloaded_error" | "api_error" => ErrorKind::Server,
        "authentication_error" | "permission_error" => ErrorKind::Auth,
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ErrorKind::InvalidRequest
        }
        _ => ErrorKind::Provider,
    }
}

fn parse_data<'a, T: Deserialize<'a>>(event_type: &str, data: &'a str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Skipping malformed SSE event event_type={event_type} error={e}");
            None
        }
    }
}

/// Parse an SSE event block into zero or more `StreamDelta`s.
///
/// Malformed frames and unknown event types are logged and skipped.
pub fn parse_sse_event(event_block: &str, state: &mut SseState) -> Vec<StreamDelta> {
    let mut event_name = None;
    let mut data = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event_name = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data = Some(value.trim_start());
        }
    }

    let Some(data) = data else {
        return Vec::new();
    };

    // The JSON `type` field is authoritative; the `event:` line is a fallback.
    let event_type = match serde_json::from_str::<SseEnvelope>(data) {
        Ok(SseEnvelope {
            event_type: Some(t),
        }) => t,
        Ok(SseEnvelope { event_type: None }) => match event_name {
            Some(name) => name.to_string(),
            None => {
                log::warn!("Skipping SSE event without type data_len={}", data.len());
                return Vec::new();
            }
        },
        Err(e) => {
            log::warn!("Skipping SSE event with invalid JSON error={e}");
            return Vec::new();
        }
    };

    match event_type.as_str() {
        "message_start" => {
            let Some(event) = parse_data::<SseMessageStart>(&event_type, data) else {
                return Vec::new();
            };
            if let Some(usage) = event.message.usage {
                state.input_tokens = usage.input_tokens;
                state.output_tokens = usage.output_tokens;
            }
            vec![StreamDelta::MessageStart {
                id: event.message.id,
            }]
        }
        "content_block_start" => {
            let Some(event) = parse_data::<SseContentBlockStart>(&event_type, data) else {
                return Vec::new();
            };
            match event.content_block {
                Some(SseContentBlock::ToolUse { id, name }) => vec![StreamDelta::ToolUseStart {
                    id,
                    name,
                    block_index: event.index,
                }],
                Some(SseContentBlock::Text | SseContentBlock::Other) => Vec::new(),
                None => {
                    log::warn!("Skipping content_block_start without block index={}", event.index);
                    Vec::new()
                }
            }
        }
        "content_block_delta" => {
            let Some(event) = parse_data::<SseContentBlockDelta>(&event_type, data) else {
                return Vec::new();
            };
            match event.delta {
                Some(SseDelta::Text { text }) => vec![StreamDelta::TextDelta {
                    delta: text,
                    block_index: event.index,
                }],
                Some(SseDelta::InputJson { partial_json }) => vec![StreamDelta::ToolInputDelta {
                    delta: partial_json,
                    block_index: event.index,
                }],
                Some(SseDelta::Other) => Vec::new(),
                None => {
                    log::warn!("Skipping content_block_delta without delta index={}", event.index);
                    Vec::new()
                }
            }
        }
        "content_block_stop" => parse_data::<SseContentBlockStop>(&event_type, data)
            .map(|event| StreamDelta::BlockStop {
                block_index: event.index,
            })
            .into_iter()
            .collect(),
        "message_delta" => {
            let Some(event) = parse_data::<SseMessageDelta>(&event_type, data) else {
                return Vec::new();
            };
            state.stop_reason = event.delta.stop_reason.as_ref().map(map_stop_reason);
            if let Some(usage) = event.usage {
                state.output_tokens = usage.output_tokens;
            }
            vec![StreamDelta::Usage(Usage {
                input_tokens: state.input_tokens,
                output_tokens: state.output_tokens,
            })]
        }
        "message_stop" => {
            state.received_message_stop = true;
            vec![StreamDelta::Done {
                stop_reason: state.stop_reason,
            }]
        }
        "error" => {
            let Some(event) = parse_data::<SseError>(&event_type, data) else {
                return Vec::new();
            };
            vec![StreamDelta::Error {
                kind: map_error_type(&event.error.error_type),
                message: event.error.message,
            }]
        }
        "ping" => Vec::new(),
        other => {
            log::debug!("Ignoring unknown SSE event event_type={other}");
            Vec::new()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
