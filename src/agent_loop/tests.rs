use super::helpers::NO_RESULTS;
use super::test_utils::*;
use super::tool_execution::{CANCELLED, DENIED};
use super::*;
use crate::events::AgentEvent;
use crate::llm::{Content, ContentBlock, Role, StreamDelta};
use crate::permissions::{AutoApprove, PermissionConfig, PermissionResponse};
use crate::types::RetryConfig;
use serde_json::json;
use std::time::Duration;

fn bypass() -> PermissionConfig {
    PermissionConfig::default().with_mode(PermissionMode::BypassPermissions)
}

/// Every tool outcome in the transcript as `(id, content, is_error)`.
fn outcomes(transcript: &[ConversationTurn]) -> Vec<(String, String, bool)> {
    transcript
        .iter()
        .filter_map(|turn| match &turn.message.content {
            Content::Blocks(blocks) => Some(blocks),
            Content::Text(_) => None,
        })
        .flatten()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id.clone(), content.clone(), *is_error == Some(true))),
            _ => None,
        })
        .collect()
}

fn abort_after(handle: AbortHandle, millis: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        handle.abort();
    });
}

// ===================
// Builder Tests
// ===================

#[test]
fn test_builder_defaults() {
    let agent = builder::<()>().provider(MockProvider::new(vec![])).build();

    assert_eq!(agent.config.max_iterations, 50);
    assert_eq!(agent.config.max_tokens, 4096);
    assert_eq!(agent.config.max_transcript_turns, 500);
    assert_eq!(agent.state(), AgentState::Idle);
    assert!(agent.tools().is_empty());
}

#[test]
fn test_builder_with_tools_and_config() {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let config = AgentConfig {
        system_prompt: "Custom prompt".to_string(),
        max_iterations: 5,
        ..Default::default()
    };

    let agent = AgentLoop::builder()
        .provider(MockProvider::new(vec![]))
        .tools(tools)
        .config(config)
        .thread_id(ThreadId::from_string("thread-1"))
        .build();

    assert_eq!(agent.tools().len(), 1);
    assert_eq!(agent.config().max_iterations, 5);
    assert_eq!(agent.thread_id().to_string(), "thread-1");
}

// ===================
// Turn Tests
// ===================

#[tokio::test]
async fn test_text_only_turn() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![Step::Deltas(text_round("Hello, user!"))]);
    let (tx, mut rx) = mpsc::channel(1024);
    let agent = builder::<()>().provider(provider).events(tx).build();

    let summary = agent
        .process_user_message("Hi", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "Hello, user!");
    assert_eq!(summary.iterations, 1);
    assert!(!summary.aborted);
    assert_eq!(summary.usage.output_tokens, 20);
    assert_eq!(agent.state(), AgentState::Idle);

    let transcript = agent.transcript().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role(), Role::User);
    assert_eq!(transcript[1].message.content.first_text(), Some("Hello, user!"));

    let events = collect_events(&mut rx);
    let transitions: Vec<(AgentState, AgentState)> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (AgentState::Idle, AgentState::Processing),
            (AgentState::Processing, AgentState::Streaming),
            (AgentState::Streaming, AgentState::Idle),
        ]
    );
    assert!(events.iter().any(|e| matches!(e, AgentEvent::TextDelta { delta } if delta == "Hello, user!")));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Text { text } if text == "Hello, user!")));
    assert!(matches!(
        events.iter().rev().nth(1),
        Some(AgentEvent::Done { iterations: 1, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_streamed_text_is_concatenated() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![Step::Deltas(vec![
        StreamDelta::MessageStart {
            id: "msg_1".to_string(),
        },
        StreamDelta::TextDelta {
            delta: "Hello".to_string(),
            block_index: 0,
        },
        StreamDelta::TextDelta {
            delta: " world".to_string(),
            block_index: 0,
        },
        StreamDelta::BlockStop { block_index: 0 },
        StreamDelta::Done { stop_reason: None },
    ])]);

    let agent = builder::<()>().provider(provider).build();
    let summary = agent
        .process_user_message("greet me", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "Hello world");
    let transcript = agent.transcript().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].message.content.first_text(), Some("Hello world"));
    assert_eq!(agent.state(), AgentState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_plan_mode_runs_read_tool_without_asking() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("index.ts"), "export {}\n")?;
    std::fs::write(dir.path().join("notes.md"), "")?;

    let environment = std::sync::Arc::new(crate::filesystem::LocalFileSystem::new(dir.path()));
    let mut tools = ToolRegistry::new();
    crate::primitive_tools::register_primitive_tools(&mut tools, &environment);

    let prompter = ScriptedPrompter::default();
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[("g1", "Glob", json!({"pattern": "*.ts"}))])),
        Step::Deltas(text_round("One TypeScript file.")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(PermissionConfig::default().with_mode(PermissionMode::Plan))
        .prompter(prompter.clone())
        .build();
    let summary = agent
        .process_user_message("list files", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "One TypeScript file.");
    assert_eq!(summary.iterations, 2);
    assert!(prompter.seen().is_empty());

    let results = outcomes(&agent.transcript().await);
    assert_eq!(results.len(), 1);
    assert!(results[0].1.starts_with("Found 1 files:"));
    assert!(results[0].1.contains("index.ts"));
    assert!(!results[0].2);
    Ok(())
}

#[tokio::test]
async fn test_tool_failure_is_fed_back() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(FailingTool);
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[("f1", "Failing", json!({}))])),
        Step::Deltas(text_round("That tool is broken.")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .build();
    let summary = agent
        .process_user_message("try it", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "That tool is broken.");
    let results = outcomes(&agent.transcript().await);
    assert_eq!(
        results,
        vec![("f1".to_string(), "Execution failed: disk on fire".to_string(), true)]
    );
    Ok(())
}

#[tokio::test]
async fn test_dangerous_command_never_reaches_tool() -> anyhow::Result<()> {
    let bash = CountingBash::default();
    let mut tools = ToolRegistry::new();
    tools.register(bash.clone());
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[("t1", "Bash", json!({"command": "rm -rf /"}))])),
        Step::Deltas(text_round("I won't do that")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .prompter(AutoApprove)
        .build();
    let summary = agent
        .process_user_message("clean up", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "I won't do that");
    assert_eq!(summary.iterations, 2);
    assert_eq!(bash.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let results = outcomes(&agent.transcript().await);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "t1");
    assert!(results[0].1.starts_with("Security check failed"));
    assert!(results[0].2);
    Ok(())
}

#[tokio::test]
async fn test_fetch_of_metadata_host_is_denied_before_request() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(crate::primitive_tools::WebFetchTool::new());
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[(
            "t1",
            "WebFetch",
            json!({"url": "http://169.254.169.254/latest/meta-data"}),
        )])),
        Step::Deltas(text_round("blocked")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .build();
    let started = std::time::Instant::now();
    let summary = agent
        .process_user_message("read instance credentials", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "blocked");
    // A real attempt would wait on the connect timeout.
    assert!(started.elapsed() < Duration::from_secs(5));

    let results = outcomes(&agent.transcript().await);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "t1");
    assert!(results[0].1.starts_with("Security check failed"));
    assert!(results[0].1.contains("internal or private hosts"));
    assert!(results[0].2);
    Ok(())
}

#[tokio::test]
async fn test_outcomes_follow_invocation_order() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[
            ("a", "Echo", json!({"message": "first"})),
            ("b", "Echo", json!({"message": "second"})),
        ])),
        Step::Deltas(text_round("both done")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .build();
    let summary = agent
        .process_user_message("echo twice", &ToolContext::new(()))
        .await?;
    assert_eq!(summary.text, "both done");
    assert_eq!(summary.usage.input_tokens, 20);

    let requests = agent.provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tools.is_some());

    let messages = &requests[1].messages;
    assert_eq!(messages.len(), 3);
    let invoked: Vec<&str> = messages[1].content.tool_uses().map(|(id, _, _)| id).collect();
    assert_eq!(invoked, vec!["a", "b"]);
    assert!(messages[2].is_tool_outcome_only());

    let results = outcomes(&agent.transcript().await);
    assert_eq!(
        results,
        vec![
            ("a".to_string(), "Echo: first".to_string(), false),
            ("b".to_string(), "Echo: second".to_string(), false),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_text_around_invocation_keeps_its_place() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let provider = MockProvider::new(vec![
        Step::Deltas(vec![
            StreamDelta::MessageStart {
                id: "msg_1".to_string(),
            },
            StreamDelta::TextDelta {
                delta: "before".to_string(),
                block_index: 0,
            },
            StreamDelta::BlockStop { block_index: 0 },
            StreamDelta::ToolUseStart {
                id: "t1".to_string(),
                name: "Echo".to_string(),
                block_index: 1,
            },
            StreamDelta::ToolInputDelta {
                delta: r#"{"message":"hi"}"#.to_string(),
                block_index: 1,
            },
            StreamDelta::BlockStop { block_index: 1 },
            StreamDelta::TextDelta {
                delta: " after".to_string(),
                block_index: 2,
            },
            StreamDelta::BlockStop { block_index: 2 },
            StreamDelta::Done {
                stop_reason: Some(crate::llm::StopReason::ToolUse),
            },
        ]),
        Step::Deltas(text_round("ok")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .build();
    agent
        .process_user_message("go", &ToolContext::new(()))
        .await?;

    let transcript = agent.transcript().await;
    assert_eq!(
        transcript[1].message.content,
        Content::Blocks(vec![
            ContentBlock::Text {
                text: "before".to_string()
            },
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "Echo".to_string(),
                input: json!({"message": "hi"}),
            },
            ContentBlock::Text {
                text: " after".to_string()
            },
        ])
    );
    assert_eq!(
        outcomes(&transcript),
        vec![("t1".to_string(), "Echo: hi".to_string(), false)]
    );
    Ok(())
}

#[tokio::test]
async fn test_abort_mid_stream_keeps_partial_text() -> anyhow::Result<()> {
    let bash = CountingBash::default();
    let mut tools = ToolRegistry::new();
    tools.register(bash.clone());
    let provider = MockProvider::new(vec![Step::Hang(vec![
        StreamDelta::MessageStart {
            id: "msg_1".to_string(),
        },
        StreamDelta::TextDelta {
            delta: "Let me".to_string(),
            block_index: 0,
        },
        StreamDelta::ToolUseStart {
            id: "t1".to_string(),
            name: "Bash".to_string(),
            block_index: 1,
        },
        StreamDelta::ToolInputDelta {
            delta: "{\"command\":".to_string(),
            block_index: 1,
        },
    ])]);

    let (tx, mut rx) = mpsc::channel(1024);
    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .events(tx)
        .build();
    abort_after(agent.abort_handle(), 20);

    let summary = agent
        .process_user_message("delete stuff", &ToolContext::new(()))
        .await?;

    assert!(summary.aborted);
    assert_eq!(summary.text, "Let me");
    assert_eq!(bash.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(agent.state(), AgentState::Idle);

    let transcript = agent.transcript().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].message.content.first_text(), Some("Let me"));

    let events = collect_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Aborted { partial_text } if partial_text == "Let me")));
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::StateChanged { to: AgentState::Stopping, .. }
    )));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolCallStart { .. })));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Done { .. })));
    Ok(())
}

#[tokio::test]
async fn test_iteration_cap_is_enforced() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let provider = MockProvider::with_fallback(
        vec![],
        Step::Deltas(tool_round(&[("t", "Echo", json!({"message": "again"}))])),
    );

    let (tx, mut rx) = mpsc::channel(4096);
    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .events(tx)
        .build();
    let result = agent
        .process_user_message("loop forever", &ToolContext::new(()))
        .await;

    let Err(error) = result else {
        anyhow::bail!("expected the iteration cap to end the turn");
    };
    assert_eq!(error.kind, ErrorKind::MaxIterations);
    assert_eq!(error.message, "Agent loop exceeded maximum iterations (50)");
    assert_eq!(agent.provider.calls(), 50);
    assert_eq!(agent.state(), AgentState::Idle);

    let events = collect_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::Error { kind: ErrorKind::MaxIterations, .. }
    )));
    Ok(())
}

// ===================
// Permission Tests
// ===================

#[tokio::test]
async fn test_session_grant_skips_second_prompt() -> anyhow::Result<()> {
    let bash = CountingBash::default();
    let mut tools = ToolRegistry::new();
    tools.register(bash.clone());
    let prompter = ScriptedPrompter::new(vec![PermissionResponse::AllowForSession]);
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[("t1", "Bash", json!({"command": "ls"}))])),
        Step::Deltas(text_round("one")),
        Step::Deltas(tool_round(&[("t2", "Bash", json!({"command": "ls"}))])),
        Step::Deltas(text_round("two")),
    ]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .prompter(prompter.clone())
        .build();
    let ctx = ToolContext::new(());
    agent.process_user_message("list", &ctx).await?;
    let summary = agent.process_user_message("list again", &ctx).await?;

    assert_eq!(summary.text, "two");
    assert_eq!(prompter.seen().len(), 1);
    assert_eq!(prompter.seen()[0].tool_name, "Bash");
    assert_eq!(bash.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_denied_invocation_reports_to_model() -> anyhow::Result<()> {
    let bash = CountingBash::default();
    let mut tools = ToolRegistry::new();
    tools.register(bash.clone());
    let provider = MockProvider::new(vec![
        Step::Deltas(tool_round(&[("t1", "Bash", json!({"command": "ls"}))])),
        Step::Deltas(text_round("ok, I won't")),
    ]);

    let (tx, mut rx) = mpsc::channel(1024);
    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .events(tx)
        .build();
    agent
        .process_user_message("list", &ToolContext::new(()))
        .await?;

    assert_eq!(bash.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    let results = outcomes(&agent.transcript().await);
    assert_eq!(results, vec![("t1".to_string(), DENIED.to_string(), true)]);

    let events = collect_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, AgentEvent::PermissionRequest { name, .. } if name == "Bash")));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolCallEnd { result, .. } if !result.success)));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolCallStart { .. })));
    Ok(())
}

#[tokio::test]
async fn test_hook_block_reaches_model() -> anyhow::Result<()> {
    let bash = CountingBash::default();
    let mut tools = ToolRegistry::new();
    tools.register(bash.clone());
    let provider = MockProvider::new(vec![Step::Deltas(tool_round(&[(
        "t1",
        "Bash",
        json!({"command": "ls"}),
    )]))]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .hooks(BlockingHooks {
            tool: "Bash",
            reason: "no shell today",
        })
        .build();
    agent
        .process_user_message("list", &ToolContext::new(()))
        .await?;

    assert_eq!(bash.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    let results = outcomes(&agent.transcript().await);
    assert_eq!(results[0].1, "Blocked: no shell today");
    assert!(results[0].2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_tool_fails_without_prompt() -> anyhow::Result<()> {
    let prompter = ScriptedPrompter::default();
    let provider = MockProvider::new(vec![Step::Deltas(tool_round(&[(
        "t1",
        "Nope",
        json!({}),
    )]))]);

    let agent = builder::<()>()
        .provider(provider)
        .prompter(prompter.clone())
        .build();
    agent
        .process_user_message("do it", &ToolContext::new(()))
        .await?;

    assert!(prompter.seen().is_empty());
    let results = outcomes(&agent.transcript().await);
    assert_eq!(results, vec![("t1".to_string(), "Tool not found: Nope".to_string(), true)]);
    Ok(())
}

#[tokio::test]
async fn test_empty_round_gets_diagnostic() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(SilentTool);
    let provider = MockProvider::new(vec![Step::Deltas(tool_round(&[
        ("a", "Silent", json!({})),
        ("b", "Silent", json!({})),
    ]))]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .build();
    agent
        .process_user_message("hush", &ToolContext::new(()))
        .await?;

    let results = outcomes(&agent.transcript().await);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, content, is_error)| content == NO_RESULTS && *is_error));
    Ok(())
}

// ===================
// Abort Tests
// ===================

#[tokio::test]
async fn test_abort_while_waiting_for_permission() -> anyhow::Result<()> {
    let bash = CountingBash::default();
    let mut tools = ToolRegistry::new();
    tools.register(bash.clone());
    let provider = MockProvider::new(vec![Step::Deltas(tool_round(&[
        ("t1", "Bash", json!({"command": "ls"})),
        ("t2", "Bash", json!({"command": "pwd"})),
    ]))]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .prompter(SilentPrompter)
        .build();
    abort_after(agent.abort_handle(), 20);

    let summary = agent
        .process_user_message("list", &ToolContext::new(()))
        .await?;

    assert!(summary.aborted);
    assert_eq!(bash.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    let results = outcomes(&agent.transcript().await);
    assert_eq!(
        results,
        vec![
            ("t1".to_string(), CANCELLED.to_string(), true),
            ("t2".to_string(), CANCELLED.to_string(), true),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_abort_cancels_running_tool() -> anyhow::Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(SlowTool);
    let provider = MockProvider::new(vec![Step::Deltas(tool_round(&[(
        "t1",
        "Slow",
        json!({}),
    )]))]);

    let agent = builder::<()>()
        .provider(provider)
        .tools(tools)
        .permissions(bypass())
        .build();
    abort_after(agent.abort_handle(), 20);

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        agent.process_user_message("wait", &ToolContext::new(())),
    )
    .await??;

    assert!(summary.aborted);
    assert_eq!(agent.provider.calls(), 1);
    let results = outcomes(&agent.transcript().await);
    assert_eq!(results, vec![("t1".to_string(), CANCELLED.to_string(), true)]);
    Ok(())
}

#[tokio::test]
async fn test_second_message_while_busy_is_rejected() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![Step::Hang(vec![StreamDelta::MessageStart {
        id: "msg_1".to_string(),
    }])]);
    let agent = builder::<()>().provider(provider).build();
    let ctx = ToolContext::new(());

    let (first, second) = tokio::join!(agent.process_user_message("one", &ctx), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = agent.process_user_message("two", &ctx).await;
        agent.abort();
        second
    });

    let Err(error) = second else {
        anyhow::bail!("expected the second message to be rejected");
    };
    assert_eq!(error.kind, ErrorKind::Busy);
    assert!(first?.aborted);
    assert_eq!(agent.transcript().await.len(), 1);
    Ok(())
}

// ===================
// Retry Tests
// ===================

#[tokio::test]
async fn test_transient_error_is_retried() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![
        Step::Deltas(error_round(ErrorKind::Server, "overloaded")),
        Step::Deltas(text_round("recovered")),
    ]);
    let config = AgentConfig {
        retry: RetryConfig::fast(),
        ..Default::default()
    };

    let agent = builder::<()>().provider(provider).config(config).build();
    let summary = agent
        .process_user_message("hello", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "recovered");
    assert_eq!(summary.iterations, 1);
    assert_eq!(agent.provider.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_truncated_stream_is_retried() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![
        Step::Deltas(vec![StreamDelta::TextDelta {
            delta: "cut".to_string(),
            block_index: 0,
        }]),
        Step::Deltas(text_round("whole")),
    ]);
    let config = AgentConfig {
        retry: RetryConfig::fast(),
        ..Default::default()
    };

    let (tx, mut rx) = mpsc::channel(1024);
    let agent = builder::<()>()
        .provider(provider)
        .config(config)
        .events(tx)
        .build();
    let summary = agent
        .process_user_message("hello", &ToolContext::new(()))
        .await?;

    assert_eq!(summary.text, "whole");
    assert_eq!(agent.provider.calls(), 2);

    // The cut attempt's delta is followed by a retry marker, then the new text.
    let streamed: Vec<String> = collect_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::TextDelta { delta } => Some(delta),
            AgentEvent::Retrying {
                attempt: 1, kind, ..
            } if kind == ErrorKind::Network => Some("<retry>".to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, vec!["cut", "<retry>", "whole"]);
    Ok(())
}

#[tokio::test]
async fn test_auth_error_is_not_retried() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![Step::Deltas(error_round(
        ErrorKind::Auth,
        "invalid x-api-key",
    ))]);
    let config = AgentConfig {
        retry: RetryConfig::fast(),
        ..Default::default()
    };

    let agent = builder::<()>().provider(provider).config(config).build();
    let result = agent
        .process_user_message("hello", &ToolContext::new(()))
        .await;

    let Err(error) = result else {
        anyhow::bail!("expected an auth failure");
    };
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.message, "invalid x-api-key");
    assert_eq!(agent.provider.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retries_are_bounded() -> anyhow::Result<()> {
    let provider = MockProvider::with_fallback(
        vec![],
        Step::Deltas(error_round(ErrorKind::RateLimited, "slow down")),
    );
    let config = AgentConfig {
        retry: RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        ..Default::default()
    };

    let agent = builder::<()>().provider(provider).config(config).build();
    let result = agent
        .process_user_message("hello", &ToolContext::new(()))
        .await;

    let Err(error) = result else {
        anyhow::bail!("expected retries to run out");
    };
    assert_eq!(error.kind, ErrorKind::RateLimited);
    assert_eq!(error.message, "slow down (gave up after 2 retries)");
    assert_eq!(agent.provider.calls(), 3);
    Ok(())
}

// ===================
// Transcript Tests
// ===================

#[tokio::test]
async fn test_empty_message_is_ignored() -> anyhow::Result<()> {
    let agent = builder::<()>().provider(MockProvider::new(vec![])).build();
    let summary = agent
        .process_user_message("   ", &ToolContext::new(()))
        .await?;

    assert_eq!(summary, RunSummary::default());
    assert_eq!(agent.provider.calls(), 0);
    assert!(agent.transcript().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transcript_is_capped() -> anyhow::Result<()> {
    let provider = MockProvider::new(vec![
        Step::Deltas(text_round("r1")),
        Step::Deltas(text_round("r2")),
        Step::Deltas(text_round("r3")),
    ]);
    let config = AgentConfig {
        max_transcript_turns: 3,
        ..Default::default()
    };

    let agent = builder::<()>().provider(provider).config(config).build();
    let ctx = ToolContext::new(());
    for message in ["m1", "m2", "m3"] {
        agent.process_user_message(message, &ctx).await?;
    }

    // Trimming never leaves an assistant turn at the front.
    let transcript = agent.transcript().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role(), Role::User);
    assert_eq!(transcript[0].message.content.first_text(), Some("m3"));
    assert_eq!(transcript[1].message.content.first_text(), Some("r3"));

    for request in agent.provider.requests() {
        assert!(request.messages.len() <= 3);
        assert_eq!(request.messages[0].role, Role::User);
    }
    Ok(())
}

#[tokio::test]
async fn test_reset_clears_transcript_and_grants() -> anyhow::Result<()> {
    let agent = builder::<()>().provider(MockProvider::new(vec![])).build();
    agent
        .process_user_message("hello", &ToolContext::new(()))
        .await?;
    agent
        .update_permissions(|p| p.allow_for_session("Bash", &json!({"command": "ls"})))
        .await;

    agent.reset().await;

    assert!(agent.transcript().await.is_empty());
    let granted = agent
        .update_permissions(|p| p.is_session_allowed("Bash", &json!({"command": "ls"})))
        .await;
    assert!(!granted);
    Ok(())
}

#[tokio::test]
async fn test_permission_mode_can_change_between_turns() -> anyhow::Result<()> {
    let agent = builder::<()>().provider(MockProvider::new(vec![])).build();
    assert_eq!(agent.permission_mode().await, PermissionMode::Default);

    agent.set_permission_mode(PermissionMode::Plan).await;
    assert_eq!(agent.permission_mode().await, PermissionMode::Plan);
    Ok(())
}
