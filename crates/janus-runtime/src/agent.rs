//! The agent loop: consume an inbound message, assemble the prompt, drive
//! the LLM through tool-use iterations under budget and retry policy, and
//! emit the reply. One consumer, strict per-chat ordering.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::context::ContextBuilder;
use crate::learner::{ExecutionRecord, Learner, Outcome};
use crate::scheduler::{NewJob, ScheduleKind, Scheduler};
use crate::session::{SessionStore, session_key, strip_orphan_tool_prefix};
use crate::summarizer::Summarizer;
use janus_config::{JanusConfig, LlmErrorPolicy, UserConfig};
use janus_core::{
    ContextMode, InboundMessage, LlmMessage, OutboundKind, OutboundMessage, Result, Scope,
    ToolContext, ToolSpec,
};
use janus_llm::{ChatRequest, ProviderRegistry};
use janus_memory::{MemoryIndex, OWNER_SHARED, SCOPE_GLOBAL};
use janus_tools::ToolRegistry;

/// Tool results longer than this are cut to a head+tail excerpt.
const TOOL_RESULT_MAX_CHARS: usize = 4000;
/// Emergency compressions allowed per request.
const MAX_COMPRESSIONS: u32 = 2;

/// System-origin replies matching this at the start are suppressed.
const NOOP_PATTERN: &str = r"(?i)^\s*(HEARTBEAT_OK|no.?op|nothing to do|all good)";
/// Provider error text that indicates a context-window overflow.
const OVERFLOW_PATTERN: &str = r"(?i)token|context|length|too long";

/// Options for [`AgentLoop::process_direct`].
#[derive(Debug, Clone, Default)]
pub struct DirectOptions {
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub max_iterations: Option<u32>,
    pub context_mode: Option<ContextMode>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub reply: String,
    pub outcome: Outcome,
    pub iterations: u32,
    pub tool_calls: u32,
    pub streamed: bool,
}

struct StreamTarget {
    channel: String,
    chat_id: String,
}

pub struct AgentLoop {
    config: JanusConfig,
    bus: Arc<MessageBus>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    context: Arc<ContextBuilder>,
    learner: Option<Arc<Learner>>,
    scheduler: Option<Arc<Scheduler>>,
    summarizer: Option<Arc<Summarizer>>,
    memory: Option<Arc<MemoryIndex>>,
    noop_re: Regex,
    overflow_re: Regex,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: JanusConfig,
        bus: Arc<MessageBus>,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        context: Arc<ContextBuilder>,
    ) -> Self {
        Self {
            config,
            bus,
            providers,
            tools,
            sessions,
            context,
            learner: None,
            scheduler: None,
            summarizer: None,
            memory: None,
            noop_re: Regex::new(NOOP_PATTERN).expect("static pattern"),
            overflow_re: Regex::new(OVERFLOW_PATTERN).expect("static pattern"),
        }
    }

    pub fn with_learner(mut self, learner: Arc<Learner>) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryIndex>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Consume inbound messages until cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("agent loop started");
        loop {
            let message = match self.bus.consume_inbound(&cancel).await {
                Ok(message) => message,
                Err(e) if e.is_cancelled() => {
                    info!("agent loop stopping");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "inbound consume failed");
                    return;
                }
            };
            self.handle(message, &cancel).await;
        }
    }

    /// Process one message synchronously and return the final assistant
    /// text. Used by child agents, one-shot mode, and tests.
    pub async fn process_direct(&self, text: &str, opts: DirectOptions) -> Result<String> {
        let mut message = InboundMessage::new(
            opts.channel.as_deref().unwrap_or("direct"),
            opts.chat_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            text,
        );
        message.context_mode = opts.context_mode;

        let outcome = self
            .process(&message, opts.max_iterations, false)
            .await?;
        Ok(outcome.reply)
    }

    /// Full per-message pipeline plus outbound delivery and the
    /// system-message rewrite/suppression rules.
    async fn handle(&self, message: InboundMessage, cancel: &CancellationToken) {
        let is_system = message.is_system_origin();
        let streaming_wanted = self.config.streaming.enabled && !is_system;

        let result = self.process(&message, None, streaming_wanted).await;

        let (reply, streamed) = match result {
            Ok(outcome) => {
                if is_system && self.noop_re.is_match(&outcome.reply) {
                    debug!(chat = %message.chat_id, "suppressing no-op system reply");
                    return;
                }
                (outcome.reply, outcome.streamed)
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) => (format!("Error: {e}"), false),
        };

        if streamed {
            return;
        }

        // System-origin replies are rewritten to the default user channel.
        let (channel, chat_id) = if is_system {
            self.config.default_user_channel()
        } else {
            (message.channel.clone(), message.chat_id.clone())
        };

        if let Err(e) = self
            .bus
            .publish_outbound(OutboundMessage::message(channel, chat_id, reply), cancel)
            .await
            && !e.is_cancelled()
        {
            error!(error = %e, "failed to publish outbound reply");
        }
    }

    async fn process(
        &self,
        message: &InboundMessage,
        max_iterations_override: Option<u32>,
        streaming: bool,
    ) -> Result<ProcessOutcome> {
        let started = std::time::Instant::now();

        // Resolve the user's profile from the binding, if any.
        let user: Option<&UserConfig> = message
            .user
            .as_ref()
            .and_then(|binding| self.config.user_by_id(&binding.user_id));

        // Inject the per-call tool context.
        self.tools.set_context(ToolContext {
            workspace_dir: self.config.workspace.dir.clone(),
            exec_deny_patterns: self.config.tools.exec_deny_patterns.clone(),
            exec_timeout_ms: self.config.tools.exec_timeout,
            max_file_size: self.config.tools.max_file_size,
            chat_id: Some(message.chat_id.clone()),
            user_id: message.user.as_ref().map(|u| u.user_id.clone()),
            tool_allow: user.and_then(|u| u.tools.allow.clone()),
            tool_deny: user.and_then(|u| u.tools.deny.clone()),
            content_policy: user.and_then(|u| u.content_policy.clone()),
        });

        let key = session_key(&message.channel, &message.chat_id);
        let mut specs = self.tools.specs();
        specs.extend(runtime_tool_specs());

        let system_prompt = self
            .context
            .build(message, user, self.sessions.summary(&key).as_deref(), &specs)
            .await;

        // History: orphan repair, then budget trim.
        let session = self.sessions.get_or_create(&key);
        let mut history: Vec<LlmMessage> =
            strip_orphan_tool_prefix(&session.messages).to_vec();
        trim_to_budget(&mut history, self.config.agent.token_budget);

        // The inbound user message is persisted before any LLM call.
        let user_message = LlmMessage::user(&message.content);
        self.sessions.append(&key, std::slice::from_ref(&user_message))?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(LlmMessage::system(system_prompt));
        messages.extend(history);
        messages.push(user_message);

        let stream_target = streaming.then(|| StreamTarget {
            channel: message.channel.clone(),
            chat_id: message.chat_id.clone(),
        });

        let max_iterations =
            max_iterations_override.unwrap_or(self.config.agent.max_iterations);
        let (outcome, tokens_used) = self
            .iterate(
                &key,
                messages,
                specs,
                max_iterations,
                stream_target,
                message.scope.clone(),
            )
            .await;

        // Persist the final assistant reply.
        self.sessions
            .append(&key, &[LlmMessage::assistant(&outcome.reply)])?;

        // Execution metric, fire-and-forget.
        if let Some(learner) = &self.learner {
            learner.record(&ExecutionRecord {
                task_excerpt: excerpt(&message.content, 200),
                duration_ms: started.elapsed().as_millis() as u64,
                iterations: outcome.iterations,
                tool_calls: outcome.tool_calls,
                tokens_used,
                outcome: outcome.outcome,
                timestamp: Utc::now(),
            });
        }

        self.maybe_summarize(&key, message);

        Ok(outcome)
    }

    /// The iteration engine: call the provider, run requested tools, feed
    /// results back, repeat. Overflow errors trigger emergency
    /// compression; other provider errors follow the configured policy.
    async fn iterate(
        &self,
        key: &str,
        mut messages: Vec<LlmMessage>,
        specs: Vec<ToolSpec>,
        max_iterations: u32,
        stream_target: Option<StreamTarget>,
        scope: Option<Scope>,
    ) -> (ProcessOutcome, u64) {
        let mut compressions = 0u32;
        let mut tool_calls_total = 0u32;
        let mut tokens_used = 0u64;
        let mut last_content = String::new();
        let mut iteration = 0u32;

        while iteration < max_iterations {
            iteration += 1;

            let request = ChatRequest {
                model: self.config.llm.model.clone(),
                messages: messages.clone(),
                tools: specs.clone(),
                max_tokens: self.config.llm.max_tokens,
                temperature: self.config.llm.temperature,
            };

            let response = match self.call_provider(&request, stream_target.as_ref()).await {
                Ok(response) => response,
                Err(e) => {
                    let text = e.to_string();
                    if self.overflow_re.is_match(&text) && compressions < MAX_COMPRESSIONS {
                        warn!(error = %text, "context overflow — compressing in place");
                        emergency_compress(&mut messages);
                        compressions += 1;
                        iteration -= 1; // compression does not consume an iteration
                        continue;
                    }
                    match self.config.agent.on_llm_error {
                        LlmErrorPolicy::Retry => {
                            warn!(error = %text, iteration, "provider error, retrying");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                        LlmErrorPolicy::Stop => {
                            let reply = if last_content.is_empty() {
                                format!("Error: {text}")
                            } else {
                                last_content
                            };
                            return (
                                ProcessOutcome {
                                    reply,
                                    outcome: Outcome::Error,
                                    iterations: iteration,
                                    tool_calls: tool_calls_total,
                                    streamed: false,
                                },
                                tokens_used,
                            );
                        }
                    }
                }
            };

            tokens_used += response.usage.total() as u64;
            last_content = response.content.clone();

            if response.tool_calls.is_empty() {
                let streamed = if let Some(target) = &stream_target {
                    let _ = self
                        .bus
                        .stream_to(&target.channel, &target.chat_id, OutboundKind::StreamEnd, "")
                        .await;
                    true
                } else {
                    false
                };
                return (
                    ProcessOutcome {
                        reply: response.content,
                        outcome: Outcome::Success,
                        iterations: iteration,
                        tool_calls: tool_calls_total,
                        streamed,
                    },
                    tokens_used,
                );
            }

            // Tool round: persist the assistant turn, then every result.
            let assistant = LlmMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            );
            messages.push(assistant.clone());
            if let Err(e) = self.sessions.append(key, &[assistant]) {
                warn!(error = %e, "failed to persist assistant turn");
            }

            for call in &response.tool_calls {
                tool_calls_total += 1;
                let args = normalize_args(&call.arguments);
                let result = self
                    .execute_with_retries(&call.name, args, scope.as_ref())
                    .await;
                let result = truncate_tool_result(&result);

                let tool_message = LlmMessage::tool(result, &call.id);
                messages.push(tool_message.clone());
                if let Err(e) = self.sessions.append(key, &[tool_message]) {
                    warn!(error = %e, "failed to persist tool result");
                }
            }
        }

        warn!(key, max_iterations, "iteration budget exhausted");
        (
            ProcessOutcome {
                reply: format!(
                    "I hit the iteration limit ({max_iterations}) before finishing. Partial progress may have been made."
                ),
                outcome: Outcome::MaxIterations,
                iterations: max_iterations,
                tool_calls: tool_calls_total,
                streamed: false,
            },
            tokens_used,
        )
    }

    /// Streaming or plain call, forwarding chunks through the bus bypass.
    async fn call_provider(
        &self,
        request: &ChatRequest,
        stream_target: Option<&StreamTarget>,
    ) -> Result<janus_llm::ChatResponse> {
        let Some(target) = stream_target else {
            return self.providers.chat(request, None).await;
        };

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let bus = Arc::clone(&self.bus);
        let channel = target.channel.clone();
        let chat_id = target.chat_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                let _ = bus
                    .stream_to(&channel, &chat_id, OutboundKind::Chunk, &chunk)
                    .await;
            }
        });

        let result = self.providers.chat_stream(request, None, tx).await;
        let _ = forwarder.await;
        result
    }

    /// Leading-`Error:` results are retried with linear backoff before the
    /// final text is fed back to the model.
    async fn execute_with_retries(
        &self,
        name: &str,
        args: Value,
        scope: Option<&Scope>,
    ) -> String {
        let retries = self.config.agent.tool_retries;
        let mut result = String::new();
        for attempt in 0..=retries {
            result = self.dispatch_tool(name, args.clone(), scope).await;
            if !result.starts_with("Error:") || attempt == retries {
                break;
            }
            let delay = Duration::from_millis(500 * (attempt as u64 + 1));
            debug!(tool = name, attempt = attempt + 1, "tool errored, retrying");
            tokio::time::sleep(delay).await;
        }
        result
    }

    /// Runtime-owned tools (child agents, cron, memory) dispatch here after
    /// the registry's access check; everything else goes through the
    /// registry.
    fn dispatch_tool<'a>(
        &'a self,
        name: &'a str,
        args: Value,
        scope: Option<&'a Scope>,
    ) -> std::pin::Pin<Box<dyn Future<Output = String> + Send + 'a>> {
        Box::pin(async move {
            match name {
                "agent_spawn" | "cron_schedule" | "cron_list" | "cron_cancel" | "memory_search"
                | "memory_store" => {
                    if let Some(denied) = self.tools.access_denied(name) {
                        return denied;
                    }
                    match name {
                        "agent_spawn" => self.exec_agent_spawn(args).await,
                        "cron_schedule" => self.exec_cron_schedule(args),
                        "cron_list" => self.exec_cron_list(),
                        "memory_search" => self.exec_memory_search(args, scope).await,
                        "memory_store" => self.exec_memory_store(args),
                        _ => self.exec_cron_cancel(args),
                    }
                }
                _ => self.tools.execute(name, args).await,
            }
        })
    }

    async fn exec_memory_search(&self, args: Value, scope: Option<&Scope>) -> String {
        let Some(index) = &self.memory else {
            return "Error: memory search is not available".into();
        };
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return "Error: missing 'query' argument".into();
        };
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .min(20) as usize;

        let hits = if self.config.memory.vector_search && index.has_embedder() {
            index.hybrid_search(query, limit, scope).await
        } else {
            index.keyword_search(query, limit, scope)
        };
        match hits {
            Ok(hits) if hits.is_empty() => format!("No memories found for: {query}"),
            Ok(hits) => hits
                .iter()
                .map(|hit| format!("[{} / {}] {}", hit.source, hit.heading, hit.content))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Appends a durable fact to the workspace MEMORY.md (evergreen) and
    /// re-indexes it.
    fn exec_memory_store(&self, args: Value) -> String {
        let Some(index) = &self.memory else {
            return "Error: memory store is not available".into();
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return "Error: missing 'content' argument".into();
        };
        let heading = args
            .get("heading")
            .and_then(|v| v.as_str())
            .unwrap_or("Notes");

        let memory_dir = self.config.workspace.memory_path();
        if let Err(e) = std::fs::create_dir_all(&memory_dir) {
            return format!("Error: {e}");
        }
        let path = memory_dir.join("MEMORY.md");
        let mut file_content = std::fs::read_to_string(&path).unwrap_or_default();
        if !file_content.is_empty() && !file_content.ends_with('\n') {
            file_content.push('\n');
        }
        file_content.push_str(&format!("\n## {heading}\n{content}\n"));
        if let Err(e) = std::fs::write(&path, &file_content) {
            return format!("Error: {e}");
        }

        match index.index_file("MEMORY.md", &file_content, OWNER_SHARED, SCOPE_GLOBAL, None) {
            Ok(_) => format!("Stored under \"{heading}\" in MEMORY.md"),
            Err(e) => format!("Error: stored but failed to re-index: {e}"),
        }
    }

    async fn exec_agent_spawn(&self, args: Value) -> String {
        let Some(task) = args.get("task").and_then(|v| v.as_str()) else {
            return "Error: missing 'task' argument".into();
        };
        info!(task = %excerpt(task, 80), "spawning child agent");

        let opts = DirectOptions {
            channel: Some("agent".into()),
            chat_id: None,
            max_iterations: Some(self.config.agent.max_subagent_iterations),
            context_mode: Some(ContextMode::Minimal),
        };
        // Boxed to break the async recursion cycle through dispatch_tool.
        let fut: std::pin::Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> =
            Box::pin(self.process_direct(task, opts));
        match fut.await {
            Ok(reply) => reply,
            Err(e) => format!("Error: child agent failed: {e}"),
        }
    }

    fn exec_cron_schedule(&self, args: Value) -> String {
        let Some(scheduler) = &self.scheduler else {
            return "Error: scheduler is not available".into();
        };
        let Some(name) = args.get("name").and_then(|v| v.as_str()) else {
            return "Error: missing 'name' argument".into();
        };
        let Some(task) = args.get("task").and_then(|v| v.as_str()) else {
            return "Error: missing 'task' argument".into();
        };
        let kind = match args.get("kind").and_then(|v| v.as_str()) {
            Some(kind) => match ScheduleKind::parse(kind) {
                Ok(kind) => kind,
                Err(e) => return format!("Error: {e}"),
            },
            None => return "Error: missing 'kind' argument (at | every | cron)".into(),
        };
        let Some(value) = args.get("value").and_then(|v| v.as_str()) else {
            return "Error: missing 'value' argument".into();
        };
        let timezone = args
            .get("timezone")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match scheduler.upsert_by_name(NewJob {
            name: name.into(),
            kind,
            value: value.into(),
            timezone,
            task: task.into(),
            enabled: true,
        }) {
            Ok(job) => format!(
                "Scheduled job \"{}\" (id: {}, next run: {})",
                job.name,
                job.id,
                job.next_run_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into()),
            ),
            Err(e) => format!("Error: {e}"),
        }
    }

    fn exec_cron_list(&self) -> String {
        let Some(scheduler) = &self.scheduler else {
            return "Error: scheduler is not available".into();
        };
        match scheduler.list(true) {
            Ok(jobs) if jobs.is_empty() => "No scheduled jobs.".into(),
            Ok(jobs) => jobs
                .iter()
                .map(|job| {
                    format!(
                        "- {} [{}] {} {} — next: {}{}",
                        job.id,
                        if job.enabled { "on" } else { "off" },
                        job.kind.as_str(),
                        job.value,
                        job.next_run_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".into()),
                        if job.consecutive_errors > 0 {
                            format!(" ({} consecutive errors)", job.consecutive_errors)
                        } else {
                            String::new()
                        },
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: {e}"),
        }
    }

    fn exec_cron_cancel(&self, args: Value) -> String {
        let Some(scheduler) = &self.scheduler else {
            return "Error: scheduler is not available".into();
        };
        let Some(id) = args.get("id").and_then(|v| v.as_str()) else {
            return "Error: missing 'id' argument".into();
        };
        match scheduler.remove(id) {
            Ok(true) => format!("Removed job {id}"),
            Ok(false) => format!("Error: no such job: {id}"),
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Summarization trigger: message count over the threshold, or the
    /// estimated token total over 3/4 of the budget. Runs off the request
    /// path.
    fn maybe_summarize(&self, key: &str, message: &InboundMessage) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };
        let count = self.sessions.message_count(key);
        let tokens = self.sessions.estimated_tokens(key);
        let threshold = self.config.agent.summarization_threshold;
        let budget = self.config.agent.token_budget;

        if count <= threshold && tokens <= budget * 3 / 4 {
            return;
        }

        info!(key, count, tokens, "triggering session summarization");
        let summarizer = Arc::clone(summarizer);
        let key = key.to_string();
        let scope = message.scope.clone();
        tokio::spawn(async move {
            if let Err(e) = summarizer.summarize_session(&key, scope.as_ref()).await {
                warn!(key, error = %e, "summarization failed");
            }
        });
    }
}

/// Specs for the tools the loop dispatches itself.
pub fn runtime_tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "agent_spawn".into(),
            description: "Delegate a self-contained task to a child agent and return its final answer.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Complete task description for the child agent"}
                },
                "required": ["task"]
            }),
        },
        ToolSpec {
            name: "cron_schedule".into(),
            description: "Create or update a scheduled job by name. Kinds: 'at' (RFC 3339 timestamp), 'every' (interval in milliseconds), 'cron' (5-field expression, optional IANA timezone).".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Unique job name (upserts)"},
                    "kind": {"type": "string", "enum": ["at", "every", "cron"]},
                    "value": {"type": "string", "description": "Timestamp, milliseconds, or cron expression"},
                    "timezone": {"type": "string", "description": "Optional IANA timezone for cron schedules"},
                    "task": {"type": "string", "description": "What to do when the job fires"}
                },
                "required": ["name", "kind", "value", "task"]
            }),
        },
        ToolSpec {
            name: "cron_list".into(),
            description: "List scheduled jobs with their next run times.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "cron_cancel".into(),
            description: "Remove a scheduled job by id.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Job id to remove"}
                },
                "required": ["id"]
            }),
        },
        ToolSpec {
            name: "memory_search".into(),
            description: "Search long-term memory for relevant notes and decisions. Short keywords work better than full sentences.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search keywords"},
                    "limit": {"type": "integer", "description": "Maximum results (default 5)"}
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "memory_store".into(),
            description: "Store a durable fact or decision in long-term memory. It will be recalled in future conversations.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "The fact to remember"},
                    "heading": {"type": "string", "description": "Section heading to file it under (default: Notes)"}
                },
                "required": ["content"]
            }),
        },
    ]
}

/// Providers sometimes hand arguments back as a JSON string; a parse
/// failure defaults to an empty object rather than failing the call.
fn normalize_args(arguments: &Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
        Value::Null => json!({}),
        other => other.clone(),
    }
}

/// Keep the system message, drop the older half of everything else.
fn emergency_compress(messages: &mut Vec<LlmMessage>) {
    if messages.len() <= 1 {
        return;
    }
    let rest = messages.split_off(1);
    let drop = rest.len() / 2;
    messages.extend(rest.into_iter().skip(drop));
    // The cut can land mid tool-exchange; drop the orphaned results.
    while messages.get(1).is_some_and(|m| m.is_tool()) {
        messages.remove(1);
    }
}

/// Head+tail excerpt with an explicit truncation marker.
fn truncate_tool_result(result: &str) -> String {
    let total = result.chars().count();
    if total <= TOOL_RESULT_MAX_CHARS {
        return result.to_string();
    }
    let keep = TOOL_RESULT_MAX_CHARS / 2;
    let head: String = result.chars().take(keep).collect();
    let tail: String = result
        .chars()
        .skip(total - keep)
        .collect();
    format!(
        "{head}\n[... truncated {} characters ...]\n{tail}",
        total - 2 * keep
    )
}

/// Drop the oldest messages until the estimated token total fits the
/// budget, then repair any orphaned tool prefix the cut produced.
fn trim_to_budget(history: &mut Vec<LlmMessage>, budget: usize) {
    let mut total: usize = history.iter().map(|m| m.estimate_tokens()).sum();
    let before = history.len();
    while total > budget && !history.is_empty() {
        let removed = history.remove(0);
        total -= removed.estimate_tokens();
    }
    while history.first().is_some_and(|m| m.is_tool()) {
        history.remove(0);
    }
    if history.len() < before {
        debug!(dropped = before - history.len(), "trimmed history to token budget");
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::ToolCall;

    #[test]
    fn compress_halves_non_system_messages() {
        let mut messages = vec![LlmMessage::system("sys")];
        for i in 0..20 {
            messages.push(LlmMessage::user(format!("m{i}")));
        }
        emergency_compress(&mut messages);
        assert_eq!(messages.len(), 11);
        assert!(messages[0].is_system());
        assert_eq!(messages[1].content(), "m10");
    }

    #[test]
    fn compress_drops_orphaned_tool_results() {
        let mut messages = vec![
            LlmMessage::system("sys"),
            LlmMessage::user("a"),
            LlmMessage::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "c1".into(),
                    name: "exec".into(),
                    arguments: json!({}),
                }],
            ),
            LlmMessage::tool("result", "c1"),
            LlmMessage::user("b"),
        ];
        // Halving drops [user a, assistant+tools], leaving a tool orphan
        // at the front — which must be repaired.
        emergency_compress(&mut messages);
        assert!(messages[0].is_system());
        assert!(!messages[1].is_tool());
        assert_eq!(messages.last().unwrap().content(), "b");
    }

    #[test]
    fn truncation_keeps_head_and_tail() {
        let long = "x".repeat(5000);
        let cut = truncate_tool_result(&long);
        assert!(cut.contains("[... truncated 1000 characters ...]"));
        assert!(cut.len() < long.len());

        let short = "y".repeat(4000);
        assert_eq!(truncate_tool_result(&short), short);
    }

    #[test]
    fn args_normalization() {
        assert_eq!(
            normalize_args(&Value::String("{\"a\":1}".into())),
            json!({"a": 1})
        );
        assert_eq!(normalize_args(&Value::String("{bad".into())), json!({}));
        assert_eq!(normalize_args(&Value::Null), json!({}));
        assert_eq!(normalize_args(&json!({"k": "v"})), json!({"k": "v"}));
    }

    #[test]
    fn budget_trim_drops_oldest_first() {
        let mut history: Vec<LlmMessage> = (0..10)
            .map(|i| LlmMessage::user(format!("message number {i} {}", "pad ".repeat(50))))
            .collect();
        let one = history[0].estimate_tokens();
        trim_to_budget(&mut history, one * 3);
        assert!(history.len() <= 3);
        assert!(history.last().unwrap().content().contains("number 9"));
    }

    #[test]
    fn noop_pattern_variants() {
        let re = Regex::new(NOOP_PATTERN).unwrap();
        assert!(re.is_match("HEARTBEAT_OK"));
        assert!(re.is_match("  no-op"));
        assert!(re.is_match("noop, nothing new"));
        assert!(re.is_match("Nothing to do right now"));
        assert!(re.is_match("all good!"));
        assert!(!re.is_match("I checked everything, all good"));
    }
}
