use super::truncate_bytes;
use crate::tools::{PrimitiveToolName, Tool, ToolContext};
use crate::types::{ToolCategory, ToolResult};
use crate::validation::upgrade_to_https;
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Bytes read from the response body before giving up on the rest.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
/// Bytes of rendered content handed back to the model.
const MAX_OUTPUT_BYTES: usize = 100_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MIN_TIMEOUT_SECS: u64 = 5;
const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_REDIRECTS: usize = 5;
const TRUNCATED_MARKER: &str = "\n\n[Content truncated]";

/// How fetched HTML is handed back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFormat {
    /// Tags removed and whitespace collapsed
    Text,
    /// Rendered with headings, lists and links kept readable
    #[default]
    Markdown,
    /// The body as served
    Html,
}

impl FetchFormat {
    const fn accept(self) -> &'static str {
        match self {
            Self::Text => "text/plain, text/html",
            Self::Markdown => "text/html, text/plain, application/json",
            Self::Html => "text/html",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebFetchInput {
    url: String,
    #[serde(default)]
    format: FetchFormat,
}

/// Tool for fetching a web page over HTTPS.
///
/// The executor's security policy has already rejected internal and private
/// hosts by the time this runs. `http` URLs are upgraded to `https`, and
/// redirects are only followed on the same host; a redirect elsewhere is
/// reported back so the new URL goes through the policy again.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebFetchTool {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("coding-agent-core/", env!("CARGO_PKG_VERSION")))
            .redirect(same_host_redirects())
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Use a custom HTTP client (proxies, custom roots).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

fn same_host_redirects() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        let same_host = attempt
            .previous()
            .first()
            .is_some_and(|first| first.host_str() == attempt.url().host_str());
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if same_host && attempt.url().scheme() == "https" {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

/// Requested timeout in seconds, clamped to the allowed range.
fn timeout_secs(input: &Value) -> u64 {
    input
        .get("timeout")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
}

impl<Ctx> Tool<Ctx> for WebFetchTool
where
    Ctx: Send + Sync,
{
    type Name = PrimitiveToolName;

    fn name(&self) -> PrimitiveToolName {
        PrimitiveToolName::WebFetch
    }

    fn display_name(&self) -> &'static str {
        "Fetch URL"
    }

    fn description(&self) -> &'static str {
        "Fetch content from a URL and return it as markdown, text or raw HTML. HTTP URLs are upgraded to HTTPS. Large pages are truncated."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Fully-formed URL to fetch"
                },
                "format": {
                    "type": "string",
                    "enum": ["text", "markdown", "html"],
                    "description": "Format to return the content in. Default: markdown"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_TIMEOUT_SECS,
                    "description": "Timeout in seconds. Default: 30"
                }
            },
            "required": ["url"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    fn timeout(&self, input: &Value) -> Option<Duration> {
        Some(Duration::from_secs(timeout_secs(input) + MIN_TIMEOUT_SECS))
    }

    async fn execute(&self, _ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let secs = timeout_secs(&input);
        let input: WebFetchInput =
            serde_json::from_value(input).context("Invalid input for WebFetch tool")?;

        let Ok(url) = upgrade_to_https(&input.url) else {
            return Ok(ToolResult::error(format!("Invalid URL: {}", input.url)));
        };
        if url.scheme() != "https" {
            return Ok(ToolResult::error(format!(
                "Unsupported protocol: {}. Only HTTPS is supported.",
                url.scheme()
            )));
        }
        if url.as_str() != input.url {
            log::info!("Upgraded URL to https url={url}");
        }

        let response = match self
            .client
            .get(url.clone())
            .header(ACCEPT, input.format.accept())
            .timeout(Duration::from_secs(secs))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(ToolResult::error(format!("Request timed out after {secs} seconds")));
            }
            Err(e) => {
                log::warn!("Fetch failed url={url} error={e}");
                return Ok(ToolResult::error(format!("Fetch failed: {e}")));
            }
        };

        let status = response.status();
        if status.is_redirection() {
            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|location| url.join(location).map_or_else(|_| location.to_string(), String::from))
                .unwrap_or_default();
            return Ok(ToolResult::success_with_metadata(
                format!("Redirected to different host: {target}. Make a new request with this URL."),
                json!({ "redirect_url": target, "original_url": url.as_str() }),
            ));
        }
        if !status.is_success() {
            return Ok(ToolResult::error(format!("HTTP {status}"))
                .with_metadata(json!({ "status": status.as_u16() })));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let (body, body_truncated) = match read_capped(response, MAX_BODY_BYTES).await {
            Ok(read) => read,
            Err(e) if e.is_timeout() => {
                return Ok(ToolResult::error(format!("Request timed out after {secs} seconds")));
            }
            Err(e) => return Ok(ToolResult::error(format!("Fetch failed: {e}"))),
        };

        let rendered = render(&String::from_utf8_lossy(&body), &content_type, input.format);
        let (output, truncated) = cap_output(&rendered, body_truncated);
        Ok(ToolResult::success_with_metadata(
            output,
            json!({
                "url": final_url,
                "content_type": content_type,
                "truncated": truncated,
            }),
        ))
    }
}

/// Read at most `cap` body bytes. Returns whether the body was cut.
async fn read_capped(response: reqwest::Response, cap: usize) -> reqwest::Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = cap - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn render(body: &str, content_type: &str, format: FetchFormat) -> String {
    let is_html = content_type.contains("text/html") || content_type.contains("application/xhtml");
    if !is_html || format == FetchFormat::Html {
        return body.to_string();
    }

    let rendered = match html2text::from_read(body.as_bytes(), 100) {
        Ok(rendered) => rendered,
        Err(e) => {
            log::warn!("HTML conversion failed, returning raw body error={e}");
            return body.to_string();
        }
    };
    match format {
        FetchFormat::Text => rendered.split_whitespace().collect::<Vec<_>>().join(" "),
        FetchFormat::Markdown | FetchFormat::Html => rendered.trim().to_string(),
    }
}

fn cap_output(content: &str, body_truncated: bool) -> (String, bool) {
    let kept = truncate_bytes(content, MAX_OUTPUT_BYTES);
    let truncated = body_truncated || kept.len() < content.len();
    let mut output = kept.to_string();
    if truncated {
        output.push_str(TRUNCATED_MARKER);
    }
    (output, truncated)
}
