//! The gate: a confirmation interlock between a matching tool call and its
//! execution. Pattern matching is cheap and synchronous; confirmation is
//! pluggable (interactive terminal, chat bot) and defaults to deny on
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;
use tracing::warn;

/// Matches tool calls that require confirmation. Current policy: only
/// `exec` shell invocations, against case-insensitive patterns.
pub struct Gate {
    patterns: Vec<regex::Regex>,
}

impl Gate {
    pub fn new(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| {
                match RegexBuilder::new(p).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "ignoring invalid gate pattern");
                        None
                    }
                }
            })
            .collect();
        Self { patterns: compiled }
    }

    /// Returns the matched command text when (tool, args) trips the gate.
    pub fn matches(&self, tool: &str, args: &Value) -> Option<String> {
        if tool != "exec" {
            return None;
        }
        let command = args.get("command").and_then(|v| v.as_str())?;
        self.patterns
            .iter()
            .any(|re| re.is_match(command))
            .then(|| command.to_string())
    }
}

/// Resolves a confirmation request to allow (true) or deny (false).
/// Channel adapters provide the real implementations; the contract is
/// that unanswered requests resolve to deny.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Fixed-answer confirmer for tests and headless runs.
pub struct StaticConfirmer(pub bool);

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Wraps a confirmer with a deadline; timing out denies.
pub struct TimeoutConfirmer<C> {
    inner: C,
    timeout: Duration,
}

impl<C: Confirmer> TimeoutConfirmer<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<C: Confirmer> Confirmer for TimeoutConfirmer<C> {
    async fn confirm(&self, prompt: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.inner.confirm(prompt)).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!("confirmation timed out — denying");
                false
            }
        }
    }
}
