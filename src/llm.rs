//! Provider-neutral model types and the provider seam.

pub mod streaming;
pub mod types;

pub use streaming::{
    DecodedEvent, StreamBox, StreamDecoder, StreamDelta, parse_tool_input, strip_trailing_commas,
};
pub use types::*;

/// A hosted model reachable through a streaming completion call.
///
/// Implementations report transport failures in-band as
/// [`StreamDelta::Error`] so the caller can apply its retry policy; a stream
/// may also yield `Err` for failures it cannot classify.
pub trait LlmProvider: Send + Sync {
    /// Start a streamed completion. Dropping the stream cancels the call.
    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_>;

    fn model(&self) -> &str;

    fn provider(&self) -> &'static str;
}
