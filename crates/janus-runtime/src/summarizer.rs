//! Session compaction, run off the request path: first an LLM "flush"
//! extracts durable facts from the half of the session about to be
//! summarized away (appended to today's daily note and re-indexed), then
//! a "summarize" call replaces that prefix with stored summary text.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::daily_note_name;
use crate::session::SessionStore;
use janus_core::{LlmMessage, Result, Scope, ScopeKind};
use janus_llm::{ChatRequest, ProviderRegistry};
use janus_memory::{MemoryIndex, OWNER_SHARED, SCOPE_FAMILY, SCOPE_GLOBAL};

const FLUSH_INSTRUCTION: &str = "\
Extract important facts, decisions, and learnings from this conversation \
that should be remembered long-term. Be concise — bullet points. If there \
is nothing worth remembering, respond with NONE";

const SUMMARIZE_INSTRUCTION: &str =
    "Summarize this conversation concisely: decisions, key context, current state.";

pub struct Summarizer {
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionStore>,
    memory: Option<Arc<MemoryIndex>>,
    memory_dir: PathBuf,
    model: String,
}

impl Summarizer {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        memory_dir: impl Into<PathBuf>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            sessions,
            memory: None,
            memory_dir: memory_dir.into(),
            model: model.into(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryIndex>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Flush-then-summarize for one session. The scope of the triggering
    /// message decides the tenancy of flushed knowledge.
    pub async fn summarize_session(&self, key: &str, scope: Option<&Scope>) -> Result<()> {
        let messages = self.sessions.get_or_create(key).messages;
        if messages.len() < 2 {
            return Ok(());
        }

        let half = messages.len() / 2;
        let first_half = &messages[..half];

        if self.memory.is_some() {
            self.flush_knowledge(first_half, scope).await;
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                LlmMessage::system(SUMMARIZE_INSTRUCTION),
                LlmMessage::user(flatten(&messages)),
            ],
            tools: vec![],
            max_tokens: 1024,
            temperature: 0.2,
        };

        let response = self.providers.chat(&request, Some("summarize")).await?;
        let summary = response.content.trim();
        if summary.is_empty() {
            warn!(key, "summarize call returned empty text, keeping session as-is");
            return Ok(());
        }

        self.sessions.summarize(key, summary)?;
        info!(key, "session summarized");
        Ok(())
    }

    /// The extraction pass. Failures here never block summarization.
    async fn flush_knowledge(&self, messages: &[LlmMessage], scope: Option<&Scope>) {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                LlmMessage::system(FLUSH_INSTRUCTION),
                LlmMessage::user(flatten(messages)),
            ],
            tools: vec![],
            max_tokens: 1024,
            temperature: 0.2,
        };

        let reply = match self.providers.chat(&request, Some("flush")).await {
            Ok(response) => response.content.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "memory flush call failed");
                return;
            }
        };

        if reply == "NONE" || reply.is_empty() {
            debug!("memory flush found nothing worth keeping");
            return;
        }

        if let Err(e) = self.append_to_daily_note(&reply, scope) {
            warn!(error = %e, "failed to persist flushed knowledge");
        }
    }

    fn append_to_daily_note(&self, notes: &str, scope: Option<&Scope>) -> Result<()> {
        std::fs::create_dir_all(&self.memory_dir)?;
        let note_name = daily_note_name(Utc::now().date_naive());
        let path = self.memory_dir.join(&note_name);

        let mut content = std::fs::read_to_string(&path).unwrap_or_default();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!("\n## Session notes\n{notes}\n"));
        std::fs::write(&path, &content)?;
        info!(note = %note_name, "flushed session knowledge to daily note");

        // Family-scoped conversations index their notes as family rows;
        // everything else is shared/global.
        if let Some(index) = &self.memory {
            let (owner, scope_name, scope_id) = match scope {
                Some(scope) if scope.kind == ScopeKind::Family => {
                    (OWNER_SHARED, SCOPE_FAMILY, Some(scope.id.as_str()))
                }
                _ => (OWNER_SHARED, SCOPE_GLOBAL, None),
            };
            index.index_file(&note_name, &content, owner, scope_name, scope_id)?;
        }
        Ok(())
    }
}

/// A `role: content` transcript, the flattened form given to the flush and
/// summarize calls.
fn flatten(messages: &[LlmMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role(), m.content()))
        .collect::<Vec<_>>()
        .join("\n")
}
