use super::AgentLoop;
use super::helpers::calculate_backoff_delay;
use super::types::{StreamError, StreamedRound, aborted};
use crate::events::AgentEvent;
use crate::hooks::AgentHooks;
use crate::llm::{ChatRequest, DecodedEvent, LlmProvider, StreamDecoder, StreamDelta};
use crate::types::{AgentError, ErrorKind, TokenUsage};
use futures::StreamExt;
use tokio::sync::watch;

impl<Ctx, P, H> AgentLoop<Ctx, P, H>
where
    Ctx: Send + Sync + 'static,
    P: LlmProvider,
    H: AgentHooks,
{
    /// Stream one provider round, retrying transient failures with backoff.
    ///
    /// Only rate limiting, server and network failures are retried, and the
    /// whole call is repeated. Everything else surfaces on the first attempt.
    /// Each retry is announced with a `Retrying` event so consumers can drop
    /// the text deltas of the failed attempt.
    pub(super) async fn stream_with_retry(
        &self,
        request: &ChatRequest,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<StreamedRound, AgentError> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            let error = match self.stream_once(request, abort).await {
                Ok(round) => return Ok(round),
                Err(error) => error,
            };

            if !error.kind.is_retryable() {
                log::error!(
                    "Provider call failed kind={:?} provider={} error={}",
                    error.kind,
                    self.provider.provider(),
                    error.message
                );
                return Err(AgentError::new(error.kind, error.message));
            }

            if attempt >= retry.max_retries {
                log::error!(
                    "Provider call failed after retries attempts={} kind={:?} error={}",
                    attempt + 1,
                    error.kind,
                    error.message
                );
                let message = if attempt == 0 {
                    error.message
                } else {
                    format!("{} (gave up after {attempt} retries)", error.message)
                };
                return Err(AgentError::new(error.kind, message));
            }

            attempt += 1;
            let delay = calculate_backoff_delay(attempt, retry);
            log::warn!(
                "Transient provider error, retrying attempt={attempt} max_retries={} delay_ms={} kind={:?} error={}",
                retry.max_retries,
                delay.as_millis(),
                error.kind,
                error.message
            );
            self.emit(AgentEvent::retrying(
                attempt,
                retry.max_retries,
                delay,
                error.kind,
                error.message,
            ))
            .await;

            tokio::select! {
                biased;
                () = aborted(abort) => {
                    log::info!("Abort requested during retry backoff");
                    return Ok(StreamedRound {
                        aborted: true,
                        ..StreamedRound::default()
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One streaming attempt. The abort flag is checked before every event.
    async fn stream_once(
        &self,
        request: &ChatRequest,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<StreamedRound, StreamError> {
        let mut stream = self.provider.chat_stream(request.clone());
        let mut decoder = StreamDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                () = aborted(abort) => {
                    log::info!(
                        "Stream interrupted by abort partial_len={} pending_invocations={}",
                        decoder.text().len(),
                        decoder.pending_invocations()
                    );
                    return Ok(StreamedRound {
                        text: decoder.text().to_owned(),
                        usage: usage_of(&decoder),
                        aborted: true,
                        ..StreamedRound::default()
                    });
                }
                next = stream.next() => next,
            };

            let delta = match next {
                Some(Ok(delta)) => delta,
                Some(Err(e)) => {
                    return Err(StreamError::new(
                        ErrorKind::Network,
                        format!("Stream error: {e:#}"),
                    ));
                }
                None => break,
            };

            if let StreamDelta::Error { message, kind } = delta {
                return Err(StreamError::new(kind, message));
            }

            for event in decoder.push(delta) {
                match event {
                    DecodedEvent::Text(delta) => self.emit(AgentEvent::text_delta(delta)).await,
                    DecodedEvent::ToolInvocation(invocation) => {
                        log::debug!(
                            "Decoded tool invocation id={} name={}",
                            invocation.id,
                            invocation.name
                        );
                    }
                    DecodedEvent::Done { stop_reason } => {
                        log::debug!("Provider message finished stop_reason={stop_reason:?}");
                    }
                }
            }

            if decoder.is_finished() {
                break;
            }
        }

        if !decoder.is_finished() {
            return Err(StreamError::new(
                ErrorKind::Network,
                "Stream ended before the message was complete",
            ));
        }

        Ok(StreamedRound {
            text: decoder.text().to_owned(),
            blocks: decoder.content_blocks(),
            invocations: decoder.invocations(),
            usage: usage_of(&decoder),
            aborted: false,
        })
    }
}

const fn usage_of(decoder: &StreamDecoder) -> TokenUsage {
    let usage = decoder.usage();
    TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    }
}
