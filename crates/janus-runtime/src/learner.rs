//! The learner: an append-only log of execution metrics plus
//! keyword-overlap similarity used to surface "tasks like this usually
//! take N iterations" recommendations in the system prompt.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use janus_core::{JanusError, Result};
use janus_store::Database;

/// Records consulted when ranking similar tasks.
const SCAN_LIMIT: usize = 500;
/// Similar records aggregated into a recommendation.
const TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    MaxIterations,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::MaxIterations => "max_iterations",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => Outcome::Success,
            "max_iterations" => Outcome::MaxIterations,
            _ => Outcome::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_excerpt: String,
    pub duration_ms: u64,
    pub iterations: u32,
    pub tool_calls: u32,
    pub tokens_used: u64,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate over the most similar past executions.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub avg_duration_ms: u64,
    /// 1 decimal.
    pub avg_iterations: f64,
    /// 1 decimal.
    pub avg_tool_calls: f64,
    /// 2 decimals.
    pub success_rate: f64,
    pub sample_size: usize,
    pub warnings: Vec<String>,
}

enum Backend {
    Db(Database),
    /// Line-delimited append file, used when the relational store is
    /// unavailable.
    File(PathBuf),
}

pub struct Learner {
    backend: Backend,
}

impl Learner {
    pub fn with_database(db: Database) -> Self {
        Self {
            backend: Backend::Db(db),
        }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
        }
    }

    /// Append a record. Failures are logged, not propagated — metrics are
    /// fire-and-forget.
    pub fn record(&self, record: &ExecutionRecord) {
        if let Err(e) = self.try_record(record) {
            warn!(error = %e, "failed to record execution metric");
        }
    }

    fn try_record(&self, record: &ExecutionRecord) -> Result<()> {
        match &self.backend {
            Backend::Db(db) => {
                db.conn()
                    .execute(
                        "INSERT INTO learner_records
                         (task_excerpt, duration_ms, iterations, tool_calls, tokens_used, outcome, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        rusqlite::params![
                            record.task_excerpt,
                            record.duration_ms as i64,
                            record.iterations as i64,
                            record.tool_calls as i64,
                            record.tokens_used as i64,
                            record.outcome.as_str(),
                            record.timestamp.to_rfc3339(),
                        ],
                    )
                    .map_err(|e| JanusError::Storage(e.to_string()))?;
                Ok(())
            }
            Backend::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                file.write_all(line.as_bytes())?;
                Ok(())
            }
        }
    }

    fn load_recent(&self) -> Result<Vec<ExecutionRecord>> {
        match &self.backend {
            Backend::Db(db) => {
                let conn = db.conn();
                let mut stmt = conn
                    .prepare(
                        "SELECT task_excerpt, duration_ms, iterations, tool_calls, tokens_used, outcome, created_at
                         FROM learner_records ORDER BY id DESC LIMIT ?1",
                    )
                    .map_err(|e| JanusError::Storage(e.to_string()))?;
                let records = stmt
                    .query_map([SCAN_LIMIT as i64], |row| {
                        Ok(ExecutionRecord {
                            task_excerpt: row.get(0)?,
                            duration_ms: row.get::<_, i64>(1)? as u64,
                            iterations: row.get::<_, i64>(2)? as u32,
                            tool_calls: row.get::<_, i64>(3)? as u32,
                            tokens_used: row.get::<_, i64>(4)? as u64,
                            outcome: Outcome::parse(&row.get::<_, String>(5)?),
                            timestamp: row
                                .get::<_, String>(6)?
                                .parse()
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    })
                    .map_err(|e| JanusError::Storage(e.to_string()))?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(records)
            }
            Backend::File(path) => {
                let Ok(raw) = std::fs::read_to_string(path) else {
                    return Ok(vec![]);
                };
                let mut records: Vec<ExecutionRecord> = raw
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| serde_json::from_str(l).ok())
                    .collect();
                records.reverse(); // newest first, like the DB query
                records.truncate(SCAN_LIMIT);
                Ok(records)
            }
        }
    }

    /// The most similar past executions: token overlap descending,
    /// recency breaking ties.
    pub fn similar(&self, task: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let tokens = tokenize(task);
        if tokens.is_empty() {
            return Ok(vec![]);
        }
        let records = self.load_recent()?;

        let mut scored: Vec<(usize, ExecutionRecord)> = records
            .into_iter()
            .map(|r| {
                let overlap = tokenize(&r.task_excerpt)
                    .iter()
                    .filter(|t| tokens.contains(*t))
                    .count();
                (overlap, r)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.timestamp.cmp(&a.1.timestamp)));
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    /// Aggregate recommendation over the top similar records, or None when
    /// nothing matches.
    pub fn recommend(&self, task: &str) -> Result<Option<Recommendation>> {
        let similar = self.similar(task, TOP_N)?;
        if similar.is_empty() {
            return Ok(None);
        }

        let n = similar.len() as f64;
        let avg_duration_ms =
            (similar.iter().map(|r| r.duration_ms).sum::<u64>() as f64 / n) as u64;
        let avg_iterations =
            round1(similar.iter().map(|r| r.iterations as f64).sum::<f64>() / n);
        let avg_tool_calls =
            round1(similar.iter().map(|r| r.tool_calls as f64).sum::<f64>() / n);
        let successes = similar
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .count() as f64;
        let success_rate = (successes / n * 100.0).round() / 100.0;

        let mut warnings = Vec::new();
        if avg_iterations > 3.0 {
            warnings.push("similar tasks averaged several iterations — consider breaking into smaller steps".to_string());
        }
        if success_rate < 0.7 {
            warnings.push("low success rate on similar tasks — be careful".to_string());
        }

        Ok(Some(Recommendation {
            avg_duration_ms,
            avg_iterations,
            avg_tool_calls,
            success_rate,
            sample_size: similar.len(),
            warnings,
        }))
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Lowercased alphanumeric tokens longer than two characters.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}
