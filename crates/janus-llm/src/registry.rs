//! Provider registry: ordered entries with purpose routing, transient-error
//! retry, and failover. Stateless across calls — every call walks the
//! candidate list fresh and never re-enters a candidate it moved past.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatProvider, ChatRequest, ChatResponse};
use janus_core::{JanusError, Result};

/// Retry ceiling per candidate for transient-class errors.
const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 1000;

/// One registered provider.
pub struct ProviderEntry {
    pub name: String,
    pub provider: Arc<dyn ChatProvider>,
    pub default_model: String,
    /// Purpose tags this entry serves ("summarize", "flush", ...).
    /// Empty = wildcard, matches any purpose.
    pub purposes: Vec<String>,
    /// Lower is tried first.
    pub priority: u32,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

/// Transient errors are worth retrying on the same candidate: rate limits,
/// server-side 5xx, and network interruptions. Payload-class errors
/// (context overflow) are not.
fn is_transient(err: &JanusError) -> bool {
    match err {
        JanusError::RateLimited { .. } => true,
        JanusError::Llm(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("529")
                || msg.contains("overloaded")
                || msg.contains("timed out")
                || msg.contains("connection reset")
                || msg.contains("connection closed")
        }
        _ => false,
    }
}

fn retry_delay(err: &JanusError, attempt: u32) -> Duration {
    if let JanusError::RateLimited { retry_after_secs } = err {
        return Duration::from_secs(*retry_after_secs);
    }
    let base = BASE_DELAY_MS * 2u64.pow(attempt);
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base + jitter)
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: ProviderEntry) {
        debug!(provider = %entry.name, priority = entry.priority, "registered LLM provider");
        self.entries.push(entry);
        self.entries.sort_by_key(|e| e.priority);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Candidates for a purpose: entries whose purpose list is empty or
    /// contains it. An empty match falls back to all entries — a call
    /// never fails for lack of a purpose match while any entry exists.
    fn candidates(&self, purpose: Option<&str>) -> Vec<&ProviderEntry> {
        if let Some(purpose) = purpose {
            let matched: Vec<&ProviderEntry> = self
                .entries
                .iter()
                .filter(|e| e.purposes.is_empty() || e.purposes.iter().any(|p| p == purpose))
                .collect();
            if !matched.is_empty() {
                return matched;
            }
        }
        self.entries.iter().collect()
    }

    /// Complete a request, trying candidates in priority order. Transient
    /// errors retry the same candidate with exponential backoff + jitter
    /// (honoring any retry-after hint); anything else fails over
    /// immediately. The last error surfaces on exhaustion.
    pub async fn chat(&self, request: &ChatRequest, purpose: Option<&str>) -> Result<ChatResponse> {
        let candidates = self.candidates(purpose);
        if candidates.is_empty() {
            return Err(JanusError::Llm("no providers registered".into()));
        }

        let mut last_err = None;
        for entry in candidates {
            let req = bind_model(request, entry);
            match chat_with_retry(entry, &req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(provider = %entry.name, error = %e, "provider failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one candidate was tried"))
    }

    /// Streaming variant. Candidates without native streaming are adapted:
    /// `chat` runs, the full content is emitted as a single chunk, and the
    /// non-streaming response is returned.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
        purpose: Option<&str>,
        chunks: mpsc::Sender<String>,
    ) -> Result<ChatResponse> {
        let candidates = self.candidates(purpose);
        if candidates.is_empty() {
            return Err(JanusError::Llm("no providers registered".into()));
        }

        let mut last_err = None;
        for entry in candidates {
            let req = bind_model(request, entry);
            let result = if entry.provider.supports_streaming() {
                stream_with_retry(entry, &req, &chunks).await
            } else {
                match chat_with_retry(entry, &req).await {
                    Ok(resp) => {
                        if !resp.content.is_empty() {
                            let _ = chunks.send(resp.content.clone()).await;
                        }
                        Ok(resp)
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(provider = %entry.name, error = %e, "provider stream failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one candidate was tried"))
    }
}

fn bind_model(request: &ChatRequest, entry: &ProviderEntry) -> ChatRequest {
    let mut req = request.clone();
    if req.model.is_empty() {
        req.model = entry.default_model.clone();
    }
    req
}

async fn chat_with_retry(entry: &ProviderEntry, request: &ChatRequest) -> Result<ChatResponse> {
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match entry.provider.chat(request).await {
            Ok(resp) => return Ok(resp),
            Err(e) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                let delay = retry_delay(&e, attempt);
                warn!(
                    provider = %entry.name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("retry loop ran at least once"))
}

async fn stream_with_retry(
    entry: &ProviderEntry,
    request: &ChatRequest,
    chunks: &mpsc::Sender<String>,
) -> Result<ChatResponse> {
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match entry.provider.chat_stream(request, chunks.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                let delay = retry_delay(&e, attempt);
                warn!(
                    provider = %entry.name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying stream after transient error"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("retry loop ran at least once"))
}
