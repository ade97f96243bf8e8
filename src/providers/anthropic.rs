//! Anthropic API provider implementation.
//!
//! Implements [`LlmProvider`] for the Anthropic Messages API using reqwest,
//! streaming responses as server-sent events.

pub(crate) mod data;

use crate::llm::{ChatRequest, LlmProvider, StreamBox, StreamDelta};
use crate::types::ErrorKind;
use anyhow::{Context, Result};
use data::{
    ApiMessagesRequest, SseFrames, SseState, build_api_messages, build_api_tools, parse_sse_event,
};
use futures::StreamExt;
use reqwest::StatusCode;

const API_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS_LIMIT: u32 = 200_000;

pub const MODEL_HAIKU_45: &str = "claude-haiku-4-5-20251001";
pub const MODEL_SONNET_45: &str = "claude-sonnet-4-5-20250929";
pub const MODEL_OPUS_46: &str = "claude-opus-4-6";

/// Anthropic LLM provider using the Messages API.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the specified API key and model.
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        // No overall timeout: a stream may legitimately run for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            model,
            base_url: API_BASE_URL.to_string(),
        }
    }

    /// Create a provider from `ANTHROPIC_API_KEY`, using Claude Sonnet 4.5.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment variable is missing.
    pub fn from_env() -> Result<Self> {
        let api_key =
            std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY is not set")?;
        Ok(Self::sonnet(api_key))
    }

    /// Create a provider using Claude Haiku 4.5.
    #[must_use]
    pub fn haiku(api_key: String) -> Self {
        Self::new(api_key, MODEL_HAIKU_45.to_owned())
    }

    /// Create a provider using Claude Sonnet 4.5.
    #[must_use]
    pub fn sonnet(api_key: String) -> Self {
        Self::new(api_key, MODEL_SONNET_45.to_owned())
    }

    /// Create a provider using Claude Opus 4.6.
    #[must_use]
    pub fn opus(api_key: String) -> Self {
        Self::new(api_key, MODEL_OPUS_46.to_owned())
    }

    /// Point the provider at a different API host (proxies, test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Reject requests the API would refuse before spending a network call.
fn validate_request(request: &ChatRequest) -> Option<StreamDelta> {
    if request.max_tokens == 0 || request.max_tokens > MAX_TOKENS_LIMIT {
        return Some(StreamDelta::Error {
            message: format!(
                "Invalid request: max_tokens must be between 1 and {MAX_TOKENS_LIMIT}, got {}",
                request.max_tokens
            ),
            kind: ErrorKind::InvalidRequest,
        });
    }
    if request.messages.is_empty() {
        return Some(StreamDelta::Error {
            message: "Invalid request: messages must not be empty".to_string(),
            kind: ErrorKind::InvalidRequest,
        });
    }
    None
}

/// Map a non-success HTTP status to an error classification and message.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> (ErrorKind, String) {
    match status.as_u16() {
        429 => (
            ErrorKind::RateLimited,
            "API rate limit exceeded. Please wait before retrying.".to_string(),
        ),
        401 | 403 => (
            ErrorKind::Auth,
            "Invalid API key. Please check your configuration.".to_string(),
        ),
        400 | 404 | 413 | 422 => (ErrorKind::InvalidRequest, format!("Invalid request: {body}")),
        500 | 502 | 503 | 504 => (
            ErrorKind::Server,
            format!("Anthropic server error ({status}): {body}"),
        ),
        _ => (
            ErrorKind::Provider,
            format!("Anthropic API error ({status}): {body}"),
        ),
    }
}

/// Connection resets and timeouts are transient; everything else is not.
fn classify_transport_error(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        ErrorKind::Network
    } else {
        ErrorKind::Provider
    }
}

impl LlmProvider for AnthropicProvider {
    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        Box::pin(async_stream::stream! {
            if let Some(error) = validate_request(&request) {
                yield Ok(error);
                return;
            }

            let messages = build_api_messages(&request);
            let tools = build_api_tools(&request);
            let api_request = ApiMessagesRequest {
                model: &self.model,
                max_tokens: request.max_tokens,
                system: &request.system,
                messages: &messages,
                tools: tools.as_deref(),
                stream: true,
            };

            log::debug!(
                "Anthropic streaming request model={} max_tokens={} messages={} tools={}",
                self.model,
                request.max_tokens,
                messages.len(),
                tools.as_ref().map_or(0, Vec::len)
            );

            let response = match self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("Content-Type", "application/json")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&api_request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("Anthropic request failed error={e}");
                    yield Ok(StreamDelta::Error {
                        message: format!("request failed: {e}"),
                        kind: classify_transport_error(&e),
                    });
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let (kind, message) = classify_status(status, &body);
                log::warn!("Anthropic error response status={status} kind={kind:?} body={body}");
                yield Ok(StreamDelta::Error { message, kind });
                return;
            }

            let mut stream = response.bytes_stream();
            let mut frames = SseFrames::default();
            let mut state = SseState::default();
            let mut chunk_count: u64 = 0;

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("Stream error while reading chunk error={e} chunk_count={chunk_count}");
                        yield Ok(StreamDelta::Error {
                            message: format!("stream error: {e}"),
                            kind: ErrorKind::Network,
                        });
                        return;
                    }
                };

                chunk_count += 1;
                if chunk_count.is_multiple_of(50) {
                    log::debug!("SSE chunk progress chunk_count={chunk_count}");
                }
                for frame in frames.push(&chunk) {
                    for delta in parse_sse_event(&frame, &mut state) {
                        yield Ok(delta);
                    }
                }
            }

            if let Some(frame) = frames.finish() {
                for delta in parse_sse_event(&frame, &mut state) {
                    yield Ok(delta);
                }
            }

            if !state.received_message_stop {
                log::warn!("SSE stream ended without message_stop chunk_count={chunk_count}");
                yield Ok(StreamDelta::Error {
                    message: "Stream ended unexpectedly without completion".to_string(),
                    kind: ErrorKind::Network,
                });
            }
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "anthropic"
    }
}
