use crate::events::{AgentEvent, AgentEventEnvelope};
use crate::hooks::{AgentHooks, ToolDecision};
use crate::llm::{ChatRequest, LlmProvider, StopReason, StreamBox, StreamDelta, Usage};
use crate::permissions::{PermissionPrompter, PermissionRequest, PermissionResponse};
use crate::tools::{Tool, ToolContext};
use crate::types::{ErrorKind, ToolCategory, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ===================
// Mock LLM Provider
// ===================

/// One scripted provider call.
#[derive(Clone, Debug)]
pub enum Step {
    /// Yield these deltas, then end the stream
    Deltas(Vec<StreamDelta>),
    /// Yield these deltas, then never yield again
    Hang(Vec<StreamDelta>),
}

pub struct MockProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// Play `steps` in order, then answer "Done" forever.
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_fallback(steps, Step::Deltas(text_round("Done")))
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

impl LlmProvider for MockProvider {
    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock poisoned").push(request);
        let step = self
            .steps
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Deltas(deltas) => Box::pin(futures::stream::iter(
                deltas.into_iter().map(Ok::<_, anyhow::Error>),
            )),
            Step::Hang(deltas) => Box::pin(
                futures::stream::iter(deltas.into_iter().map(Ok::<_, anyhow::Error>))
                    .chain(futures::stream::pending()),
            ),
        }
    }

    fn model(&self) -> &'static str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

const fn usage() -> StreamDelta {
    StreamDelta::Usage(Usage {
        input_tokens: 10,
        output_tokens: 20,
    })
}

/// A complete text-only message.
pub fn text_round(text: &str) -> Vec<StreamDelta> {
    vec![
        StreamDelta::MessageStart {
            id: "msg_1".to_string(),
        },
        StreamDelta::TextDelta {
            delta: text.to_string(),
            block_index: 0,
        },
        StreamDelta::BlockStop { block_index: 0 },
        usage(),
        StreamDelta::Done {
            stop_reason: Some(StopReason::EndTurn),
        },
    ]
}

/// A complete message requesting the given `(id, name, input)` invocations.
pub fn tool_round(calls: &[(&str, &str, Value)]) -> Vec<StreamDelta> {
    let mut deltas = vec![StreamDelta::MessageStart {
        id: "msg_1".to_string(),
    }];
    for (index, (id, name, input)) in calls.iter().enumerate() {
        deltas.push(StreamDelta::ToolUseStart {
            id: (*id).to_string(),
            name: (*name).to_string(),
            block_index: index,
        });
        deltas.push(StreamDelta::ToolInputDelta {
            delta: input.to_string(),
            block_index: index,
        });
        deltas.push(StreamDelta::BlockStop { block_index: index });
    }
    deltas.push(usage());
    deltas.push(StreamDelta::Done {
        stop_reason: Some(StopReason::ToolUse),
    });
    deltas
}

pub fn error_round(kind: ErrorKind, message: &str) -> Vec<StreamDelta> {
    vec![StreamDelta::Error {
        message: message.to_string(),
        kind,
    }]
}

/// Everything emitted so far, without waiting.
pub fn collect_events(rx: &mut mpsc::Receiver<AgentEventEnvelope>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

// ===================
// Mock Tools
// ===================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TestToolName {
    Echo,
    Bash,
    Slow,
    Silent,
    Failing,
}

impl crate::tools::ToolName for TestToolName {}

fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" }
        },
        "required": ["message"]
    })
}

pub struct EchoTool;

impl Tool<()> for EchoTool {
    type Name = TestToolName;

    fn name(&self) -> TestToolName {
        TestToolName::Echo
    }

    fn display_name(&self) -> &'static str {
        "Echo"
    }

    fn description(&self) -> &'static str {
        "Echo the input message"
    }

    fn input_schema(&self) -> Value {
        message_schema()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        let message = input
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        Ok(ToolResult::success(format!("Echo: {message}")))
    }
}

/// Stands in for the shell tool and counts how often it actually ran.
#[derive(Clone, Default)]
pub struct CountingBash {
    pub calls: Arc<AtomicUsize>,
}

impl Tool<()> for CountingBash {
    type Name = TestToolName;

    fn name(&self) -> TestToolName {
        TestToolName::Bash
    }

    fn display_name(&self) -> &'static str {
        "Bash"
    }

    fn description(&self) -> &'static str {
        "Pretend to run a shell command"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let command = input.get("command").and_then(Value::as_str).unwrap_or("");
        Ok(ToolResult::success(format!("ran {command}")))
    }
}

/// Takes a minute unless cancelled.
pub struct SlowTool;

impl Tool<()> for SlowTool {
    type Name = TestToolName;

    fn name(&self) -> TestToolName {
        TestToolName::Slow
    }

    fn display_name(&self) -> &'static str {
        "Slow"
    }

    fn description(&self) -> &'static str {
        "Sleeps for a long time"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ToolResult::success("finally"))
    }
}

/// Succeeds with no output at all.
pub struct SilentTool;

impl Tool<()> for SilentTool {
    type Name = TestToolName;

    fn name(&self) -> TestToolName {
        TestToolName::Silent
    }

    fn display_name(&self) -> &'static str {
        "Silent"
    }

    fn description(&self) -> &'static str {
        "Produces nothing"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        Ok(ToolResult::success(""))
    }
}

// ===================
// Prompters and hooks
// ===================

/// Answers with the scripted responses in order, then denies. Records every
/// request it saw.
#[derive(Clone, Default)]
pub struct ScriptedPrompter {
    responses: Arc<Mutex<VecDeque<PermissionResponse>>>,
    seen: Arc<Mutex<Vec<PermissionRequest>>>,
}

impl ScriptedPrompter {
    pub fn new(responses: Vec<PermissionResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Vec<PermissionRequest> {
        self.seen.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl PermissionPrompter for ScriptedPrompter {
    async fn prompt(&self, request: PermissionRequest) -> PermissionResponse {
        self.seen.lock().expect("lock poisoned").push(request);
        self.responses
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or(PermissionResponse::Deny)
    }
}

/// A human who never answers.
pub struct SilentPrompter;

#[async_trait]
impl PermissionPrompter for SilentPrompter {
    async fn prompt(&self, _request: PermissionRequest) -> PermissionResponse {
        std::future::pending().await
    }
}

/// Blocks every invocation of one tool.
pub struct BlockingHooks {
    pub tool: &'static str,
    pub reason: &'static str,
}

#[async_trait]
impl AgentHooks for BlockingHooks {
    async fn pre_tool_use(
        &self,
        tool_name: &str,
        _input: &Value,
        _category: ToolCategory,
    ) -> ToolDecision {
        if tool_name == self.tool {
            ToolDecision::Block(self.reason.to_string())
        } else {
            ToolDecision::Allow
        }
    }
}

/// Always fails with an error from its body.
pub struct FailingTool;

impl Tool<()> for FailingTool {
    type Name = TestToolName;

    fn name(&self) -> TestToolName {
        TestToolName::Failing
    }

    fn display_name(&self) -> &'static str {
        "Failing"
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        anyhow::bail!("disk on fire")
    }
}
