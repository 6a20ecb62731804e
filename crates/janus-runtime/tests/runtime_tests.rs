//! End-to-end scenarios: the loop, bus, scheduler, summarizer, and tool
//! pipeline wired together with mock providers.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use janus_config::JanusConfig;
use janus_core::{InboundMessage, LlmMessage, OutboundKind, OutboundMessage, UserBinding};
use janus_llm::{MockProvider, ProviderEntry, ProviderRegistry};
use janus_runtime::{
    AgentLoop, ChannelHandler, ContextBuilder, DirectOptions, Learner, MessageBus, NewJob,
    ScheduleKind, Scheduler, SessionStore, Summarizer,
};
use janus_skills::SkillCatalog;
use janus_store::Database;
use janus_tools::{Gate, StaticConfirmer, ToolRegistry};

struct Harness {
    _dir: tempfile::TempDir,
    bus: Arc<MessageBus>,
    agent: Arc<AgentLoop>,
    sessions: Arc<SessionStore>,
    scheduler: Arc<Scheduler>,
    db: Database,
}

fn entry(name: &str, provider: Arc<MockProvider>, priority: u32) -> ProviderEntry {
    ProviderEntry {
        name: name.into(),
        provider,
        default_model: "test-model".into(),
        purposes: vec![],
        priority,
    }
}

fn build_harness(
    registry: ProviderRegistry,
    patch: impl FnOnce(&mut JanusConfig),
    confirm: Option<bool>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = JanusConfig::default();
    config.workspace.dir = dir.path().to_path_buf();
    config.agent.tool_retries = 0;
    config.streaming.enabled = false;
    patch(&mut config);

    let bus = Arc::new(MessageBus::new(16));
    let db = Database::open_in_memory().unwrap();
    let sessions = Arc::new(SessionStore::new(config.workspace.sessions_path()));
    let providers = Arc::new(registry);

    let mut tools = ToolRegistry::with_builtins();
    if config.gates.enabled {
        tools.set_gate(
            Gate::new(&config.gates.exec_patterns),
            Arc::new(StaticConfirmer(confirm.unwrap_or(false))),
        );
    }

    let learner = Arc::new(Learner::with_database(db.clone()));
    let scheduler = Arc::new(Scheduler::new(db.clone(), Arc::clone(&bus)));

    let context = ContextBuilder::new(config.clone(), Arc::new(SkillCatalog::empty()))
        .with_home_base(dir.path().join("home"));

    let summarizer = Summarizer::new(
        Arc::clone(&providers),
        Arc::clone(&sessions),
        config.workspace.memory_path(),
        "test-model",
    );

    let agent = AgentLoop::new(
        config,
        Arc::clone(&bus),
        providers,
        Arc::new(tools),
        Arc::clone(&sessions),
        Arc::new(context),
    )
    .with_learner(learner)
    .with_scheduler(Arc::clone(&scheduler))
    .with_summarizer(Arc::new(summarizer))
    .with_memory(Arc::new(janus_memory::MemoryIndex::new(db.clone())));

    Harness {
        _dir: dir,
        bus,
        agent: Arc::new(agent),
        sessions,
        scheduler,
        db,
    }
}

fn cli_opts(chat_id: &str) -> DirectOptions {
    DirectOptions {
        channel: Some("cli".into()),
        chat_id: Some(chat_id.into()),
        ..Default::default()
    }
}

// ── Scenario 1: tool execution with failover ───────────────────

#[tokio::test]
async fn failover_produces_reply_and_clean_session() {
    let fail = Arc::new(MockProvider::new("fail").with_error("provider exploded"));
    let good = Arc::new(MockProvider::new("good").with_response("recovered"));
    let mut registry = ProviderRegistry::new();
    registry.add(entry("fail", Arc::clone(&fail), 0));
    registry.add(entry("good", Arc::clone(&good), 1));

    let h = build_harness(registry, |_| {}, None);
    let reply = h.agent.process_direct("hi", cli_opts("x")).await.unwrap();
    assert_eq!(reply, "recovered");

    let session = h.sessions.get_or_create("cli:x");
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role(), "user");
    assert_eq!(session.messages[0].content(), "hi");
    assert_eq!(session.messages[1].role(), "assistant");
    assert_eq!(session.messages[1].content(), "recovered");

    let (outcome, iterations): (String, i64) = h
        .db
        .conn()
        .query_row(
            "SELECT outcome, iterations FROM learner_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(outcome, "success");
    assert_eq!(iterations, 1);
}

// ── Scenario 2: gate denial on destructive exec ────────────────

#[tokio::test]
async fn gate_denial_reaches_the_model_not_the_shell() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_tool_call("exec", serde_json::json!({"command": "rm -rf build/"}))
            .with_response("understood, leaving build/ alone"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", Arc::clone(&provider), 0));

    let h = build_harness(
        registry,
        |config| {
            config.gates.exec_patterns = vec![r"rm\s".into()];
        },
        Some(false),
    );

    let reply = h
        .agent
        .process_direct("clean the build dir", cli_opts("g"))
        .await
        .unwrap();
    assert_eq!(reply, "understood, leaving build/ alone");

    let session = h.sessions.get_or_create("cli:g");
    let tool_result = session
        .messages
        .iter()
        .find(|m| m.is_tool())
        .expect("tool result persisted");
    assert!(tool_result.content().starts_with("Action denied by user:"));
}

// ── Scenario 3: per-user tool deny ─────────────────────────────

#[tokio::test]
async fn per_user_deny_blocks_exec() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_tool_call("exec", serde_json::json!({"command": "ls"}))
            .with_response("I cannot run commands for you"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", provider, 0));

    let h = build_harness(
        registry,
        |config| {
            config.users = serde_json::from_value(serde_json::json!([
                {"id": "zuzia", "displayName": "Zuzia", "tools": {"deny": ["exec"]}}
            ]))
            .unwrap();
        },
        None,
    );

    let mut message = InboundMessage::new("cli", "z", "list files");
    message.user = Some(UserBinding {
        user_id: "zuzia".into(),
        display_name: "Zuzia".into(),
        channel_user_id: None,
        channel_username: None,
    });

    // process_direct does not carry a user binding, so drive the loop
    // through the bus instead.
    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::<OutboundMessage>::new()));
    struct Recorder(Arc<Mutex<Vec<OutboundMessage>>>);
    #[async_trait::async_trait]
    impl ChannelHandler for Recorder {
        async fn deliver(&self, message: OutboundMessage) -> janus_core::Result<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }
    h.bus
        .register_handler("cli", Arc::new(Recorder(Arc::clone(&seen))));

    let agent = Arc::clone(&h.agent);
    let loop_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(cancel).await })
    };
    let dispatcher = {
        let bus = Arc::clone(&h.bus);
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.run_dispatcher(cancel).await })
    };

    h.bus.publish_inbound(message, &cancel).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    cancel.cancel();
    let _ = loop_task.await;
    let _ = dispatcher.await;

    let session = h.sessions.get_or_create("cli:z");
    let tool_result = session.messages.iter().find(|m| m.is_tool()).unwrap();
    assert_eq!(
        tool_result.content(),
        "Error: Tool \"exec\" is not available for this user."
    );

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].content, "I cannot run commands for you");
}

// ── Scenario 4: emergency compression ──────────────────────────

#[tokio::test]
async fn overflow_triggers_compression_then_recovery() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_error("maximum context length exceeded")
            .with_response("Recovered after compression"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", Arc::clone(&provider), 0));

    let h = build_harness(
        registry,
        |config| {
            config.agent.summarization_threshold = 1000;
        },
        None,
    );

    let padding: Vec<LlmMessage> = (0..20)
        .map(|i| LlmMessage::user(format!("padding message {i}")))
        .collect();
    h.sessions.append("cli:big", &padding).unwrap();

    let reply = h
        .agent
        .process_direct("continue", cli_opts("big"))
        .await
        .unwrap();
    assert_eq!(reply, "Recovered after compression");

    let requests = provider.requests.lock().unwrap().clone();
    assert!(requests.len() >= 2);

    // First attempt: system + 20 history + 1 user.
    let first = &requests[0];
    assert_eq!(first.messages.len(), 22);
    // After compression the non-system count is halved, system preserved.
    let second = &requests[1];
    assert!(second.messages[0].is_system());
    let non_system = second.messages.iter().filter(|m| !m.is_system()).count();
    assert!(non_system <= 11, "got {non_system} non-system messages");
}

#[tokio::test]
async fn next_message_rebuilds_from_session_not_compressed_prompt() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_error("context length exceeded")
            .with_response("Recovered")
            .with_response("second answer"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", Arc::clone(&provider), 0));

    let h = build_harness(
        registry,
        |config| {
            config.agent.summarization_threshold = 1000;
        },
        None,
    );
    let padding: Vec<LlmMessage> = (0..20)
        .map(|i| LlmMessage::user(format!("padding message {i}")))
        .collect();
    h.sessions.append("cli:d", &padding).unwrap();

    h.agent.process_direct("one", cli_opts("d")).await.unwrap();
    h.agent.process_direct("two", cli_opts("d")).await.unwrap();

    let requests = provider.requests.lock().unwrap().clone();
    let last = requests.last().unwrap();
    // The compressed in-flight prompt had 12 messages; the rebuild sees
    // the full persisted log again (20 padding + one + Recovered + two,
    // plus the system message).
    assert_eq!(last.messages.len(), 24);
}

// ── Orphan tool prefix repair ──────────────────────────────────

#[tokio::test]
async fn orphan_tool_prefix_is_not_sent_to_the_model() {
    let provider = Arc::new(MockProvider::new("mock").with_response("fine"));
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", Arc::clone(&provider), 0));

    let h = build_harness(registry, |_| {}, None);
    h.sessions
        .append(
            "cli:o",
            &[
                LlmMessage::tool("stale", "call_dead"),
                LlmMessage::tool("stale too", "call_dead2"),
                LlmMessage::user("earlier question"),
                LlmMessage::assistant("earlier answer"),
            ],
        )
        .unwrap();

    h.agent.process_direct("now", cli_opts("o")).await.unwrap();

    let requests = provider.requests.lock().unwrap().clone();
    let messages = &requests[0].messages;
    assert!(messages[0].is_system());
    assert_eq!(messages[1].content(), "earlier question");
    assert!(!messages.iter().any(|m| m.content() == "stale"));
}

// ── Scenario 5: scheduler fires through the bus ────────────────

#[tokio::test]
async fn scheduler_fires_system_message_and_records_run() {
    let registry = ProviderRegistry::new();
    let h = build_harness(registry, |_| {}, None);

    let job = h
        .scheduler
        .add(NewJob::every("daily-report", 60_000, "daily-report"))
        .unwrap();

    let cancel = CancellationToken::new();
    // Advance past the next-run time instead of waiting a minute.
    let later = Utc::now() + chrono::Duration::seconds(61);
    h.scheduler.tick(later, &cancel).await;

    let fired = h.bus.consume_inbound(&cancel).await.unwrap();
    assert_eq!(fired.channel, "system");
    assert_eq!(fired.chat_id, format!("cron:{}", job.id));
    assert_eq!(fired.content, "[Cron job: daily-report]\n\ndaily-report");

    let runs = h.scheduler.run_history(&job.id, 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "ok");

    let refreshed = h.scheduler.get(&job.id).unwrap().unwrap();
    assert_eq!(refreshed.consecutive_errors, 0);
    assert_eq!(refreshed.last_status.as_deref(), Some("ok"));
    assert!(refreshed.next_run_at.unwrap() > later);
}

#[tokio::test]
async fn scheduler_backoff_delays_failing_job() {
    let registry = ProviderRegistry::new();
    let h = build_harness(registry, |_| {}, None);
    let job = h
        .scheduler
        .add(NewJob::every("flaky", 1_000, "flaky-task"))
        .unwrap();

    // Simulate a failure 10 seconds ago: due, but inside the 30s window.
    let now = Utc::now();
    h.db.conn()
        .execute(
            "UPDATE cron_jobs SET consecutive_errors = 1,
             last_run_at = ?2, next_run_at = ?3, last_status = 'error'
             WHERE id = ?1",
            rusqlite::params![
                job.id,
                (now - chrono::Duration::seconds(10)).to_rfc3339(),
                (now - chrono::Duration::seconds(5)).to_rfc3339(),
            ],
        )
        .unwrap();

    let cancel = CancellationToken::new();
    h.scheduler.tick(now, &cancel).await;
    assert_eq!(h.bus.inbound_depth(), 0, "fired inside backoff window");

    // Past the window it fires again.
    h.scheduler.tick(now + chrono::Duration::seconds(25), &cancel).await;
    assert_eq!(h.bus.inbound_depth(), 1);
}

#[tokio::test]
async fn upsert_by_name_keeps_job_identity() {
    let registry = ProviderRegistry::new();
    let h = build_harness(registry, |_| {}, None);

    let first = h
        .scheduler
        .add(NewJob::every("heartbeat", 60_000, "check things"))
        .unwrap();
    let second = h
        .scheduler
        .upsert_by_name(NewJob::cron("heartbeat", "0 9 * * *", "check more things"))
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.kind, ScheduleKind::Cron);
    assert_eq!(second.task, "check more things");
    assert_eq!(h.scheduler.list(true).unwrap().len(), 1);
}

// ── Scenario 6: memory flush before summarization ──────────────

#[tokio::test]
async fn summarizer_flushes_knowledge_then_trims_session() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_response("- Decision: use SQLite for storage")
            .with_response("Summary: storage decided, work ongoing"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", provider, 0));

    let dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
    let memory_dir = dir.path().join("memory");
    let db = Database::open_in_memory().unwrap();
    let index = Arc::new(janus_memory::MemoryIndex::new(db));

    let key = "cli:deep";
    let messages: Vec<LlmMessage> = (0..10)
        .map(|i| LlmMessage::user(format!("message {i} about storage")))
        .collect();
    sessions.append(key, &messages).unwrap();

    let summarizer = Summarizer::new(Arc::new(registry), Arc::clone(&sessions), &memory_dir, "m")
        .with_memory(Arc::clone(&index));
    summarizer.summarize_session(key, None).await.unwrap();

    // The daily note holds the flushed facts.
    let today = format!("{}.md", Utc::now().format("%Y-%m-%d"));
    let note = std::fs::read_to_string(memory_dir.join(&today)).unwrap();
    assert!(note.contains("## Session notes"));
    assert!(note.contains("- Decision: use SQLite for storage"));

    // And the note is searchable.
    let hits = index.keyword_search("sqlite storage", 5, None).unwrap();
    assert!(!hits.is_empty());

    // The session is trimmed to its tail with the summary stored.
    let session = sessions.get_or_create(key);
    assert_eq!(session.messages.len(), 4);
    assert_eq!(
        session.meta.summary.as_deref(),
        Some("Summary: storage decided, work ongoing")
    );
}

#[tokio::test]
async fn flush_reply_none_skips_daily_note() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_response("NONE")
            .with_response("short summary"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", provider, 0));

    let dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
    let memory_dir = dir.path().join("memory");
    let db = Database::open_in_memory().unwrap();
    let index = Arc::new(janus_memory::MemoryIndex::new(db));

    let key = "cli:quiet";
    sessions
        .append(
            key,
            &[
                LlmMessage::user("hello"),
                LlmMessage::assistant("hi"),
                LlmMessage::user("thanks"),
                LlmMessage::assistant("anytime"),
            ],
        )
        .unwrap();

    let summarizer = Summarizer::new(Arc::new(registry), Arc::clone(&sessions), &memory_dir, "m")
        .with_memory(index);
    summarizer.summarize_session(key, None).await.unwrap();

    let today = format!("{}.md", Utc::now().format("%Y-%m-%d"));
    assert!(!memory_dir.join(today).exists());
    assert_eq!(
        sessions.get_or_create(key).meta.summary.as_deref(),
        Some("short summary")
    );
}

// ── Loop-triggered summarization ───────────────────────────────

#[tokio::test]
async fn threshold_crossing_triggers_async_summarization() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_response("done")
            .with_response("NONE")
            .with_response("compact summary"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", Arc::clone(&provider), 0));

    let h = build_harness(
        registry,
        |config| {
            config.agent.summarization_threshold = 3;
        },
        None,
    );

    let padding: Vec<LlmMessage> = (0..4)
        .map(|i| LlmMessage::user(format!("old {i}")))
        .collect();
    h.sessions.append("cli:s", &padding).unwrap();

    h.agent.process_direct("new", cli_opts("s")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let session = h.sessions.get_or_create("cli:s");
    assert_eq!(session.meta.summary.as_deref(), Some("compact summary"));
    assert_eq!(session.messages.len(), 4);
}

// ── Streaming delivery ─────────────────────────────────────────

#[tokio::test]
async fn streaming_reply_emits_chunks_and_stream_end_only() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_response("streamed reply text")
            .with_native_streaming(),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", provider, 0));

    let h = build_harness(
        registry,
        |config| {
            config.streaming.enabled = true;
        },
        None,
    );

    let seen = Arc::new(Mutex::new(Vec::<OutboundMessage>::new()));
    struct Recorder(Arc<Mutex<Vec<OutboundMessage>>>);
    #[async_trait::async_trait]
    impl ChannelHandler for Recorder {
        async fn deliver(&self, message: OutboundMessage) -> janus_core::Result<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }
    h.bus
        .register_handler("cli", Arc::new(Recorder(Arc::clone(&seen))));

    let cancel = CancellationToken::new();
    let agent = Arc::clone(&h.agent);
    let loop_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(cancel).await })
    };

    h.bus
        .publish_inbound(InboundMessage::new("cli", "st", "talk to me"), &cancel)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    cancel.cancel();
    let _ = loop_task.await;

    let seen = seen.lock();
    assert!(seen.len() >= 2);
    let text: String = seen
        .iter()
        .filter(|m| m.kind == OutboundKind::Chunk)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(text.trim(), "streamed reply text");
    assert_eq!(seen.last().unwrap().kind, OutboundKind::StreamEnd);
    assert!(!seen.iter().any(|m| m.kind == OutboundKind::Message));
}

// ── System-origin handling ─────────────────────────────────────

#[tokio::test]
async fn noop_system_replies_are_suppressed() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_response("HEARTBEAT_OK")
            .with_response("Disk almost full — you should clean up."),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", provider, 0));

    let h = build_harness(registry, |_| {}, None);

    let seen = Arc::new(Mutex::new(Vec::<OutboundMessage>::new()));
    struct Recorder(Arc<Mutex<Vec<OutboundMessage>>>);
    #[async_trait::async_trait]
    impl ChannelHandler for Recorder {
        async fn deliver(&self, message: OutboundMessage) -> janus_core::Result<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }
    h.bus
        .register_handler("cli", Arc::new(Recorder(Arc::clone(&seen))));

    let cancel = CancellationToken::new();
    let agent = Arc::clone(&h.agent);
    let loop_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(cancel).await })
    };
    let dispatcher = {
        let bus = Arc::clone(&h.bus);
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.run_dispatcher(cancel).await })
    };

    // First heartbeat: model says all quiet — nothing should reach the user.
    h.bus
        .publish_inbound(
            InboundMessage::new("system", "cron:1", "[Cron job: heartbeat]\n\ncheck"),
            &cancel,
        )
        .await
        .unwrap();
    // Second: something real — rewritten to the default user channel.
    h.bus
        .publish_inbound(
            InboundMessage::new("system", "cron:1", "[Cron job: heartbeat]\n\ncheck"),
            &cancel,
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    cancel.cancel();
    let _ = loop_task.await;
    let _ = dispatcher.await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].chat_id, "terminal");
    assert!(seen[0].content.contains("Disk almost full"));
}

// ── Memory tools ───────────────────────────────────────────────

#[tokio::test]
async fn memory_store_then_search_round_trips() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_tool_call(
                "memory_store",
                serde_json::json!({"content": "The router password is hunter2", "heading": "Home network"}),
            )
            .with_tool_call("memory_search", serde_json::json!({"query": "router password"}))
            .with_response("it is hunter2"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", provider, 0));

    let h = build_harness(registry, |_| {}, None);
    let reply = h
        .agent
        .process_direct("what's the router password?", cli_opts("mem"))
        .await
        .unwrap();
    assert_eq!(reply, "it is hunter2");

    let session = h.sessions.get_or_create("cli:mem");
    let tool_results: Vec<&str> = session
        .messages
        .iter()
        .filter(|m| m.is_tool())
        .map(|m| m.content())
        .collect();
    assert_eq!(tool_results.len(), 2);
    assert!(tool_results[0].starts_with("Stored under \"Home network\""));
    assert!(tool_results[1].contains("hunter2"));

    // The fact landed in the evergreen memory file.
    let memory_md = h._dir.path().join("memory").join("MEMORY.md");
    let content = std::fs::read_to_string(memory_md).unwrap();
    assert!(content.contains("## Home network"));
}

// ── Tool results flow back into the conversation ───────────────

#[tokio::test]
async fn tool_round_trip_with_real_exec() {
    let provider = Arc::new(
        MockProvider::new("mock")
            .with_tool_call("exec", serde_json::json!({"command": "echo from-the-shell"}))
            .with_response("the shell said from-the-shell"),
    );
    let mut registry = ProviderRegistry::new();
    registry.add(entry("mock", Arc::clone(&provider), 0));

    let h = build_harness(
        registry,
        |config| {
            config.gates.enabled = false;
        },
        None,
    );

    let reply = h
        .agent
        .process_direct("run echo", cli_opts("t"))
        .await
        .unwrap();
    assert_eq!(reply, "the shell said from-the-shell");

    // Ordered session log: user, assistant+tool_calls, tool, assistant.
    let session = h.sessions.get_or_create("cli:t");
    let roles: Vec<&str> = session.messages.iter().map(|m| m.role()).collect();
    assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
    assert!(session.messages[2].content().contains("from-the-shell"));

    // The second model request carries the tool result.
    let requests = provider.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(
        requests[1]
            .messages
            .iter()
            .any(|m| m.is_tool() && m.content().contains("from-the-shell"))
    );
}
