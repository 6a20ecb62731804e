//! Durable scheduler: cron jobs persisted in the relational store, a 60 s
//! ticker, deterministic next-run computation, and an escalating backoff
//! ladder after consecutive failures.
//!
//! Firing synthesizes a system-origin inbound message so scheduled tasks
//! run through the same pipeline as user messages.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use janus_core::{InboundMessage, JanusError, Result};
use janus_store::Database;

/// Minimum wait after N consecutive errors, indexed by min(N-1, 4).
const BACKOFF: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
];

const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fire once at an absolute timestamp (RFC 3339).
    At,
    /// Fire every N milliseconds.
    Every,
    /// Fire on a 5-field cron expression, optionally in an IANA timezone.
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::At => "at",
            ScheduleKind::Every => "every",
            ScheduleKind::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "at" => Ok(ScheduleKind::At),
            "every" => Ok(ScheduleKind::Every),
            "cron" => Ok(ScheduleKind::Cron),
            other => Err(JanusError::Scheduler(format!(
                "unknown schedule kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub kind: ScheduleKind,
    pub value: String,
    pub timezone: Option<String>,
    pub task: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub kind: ScheduleKind,
    pub value: String,
    pub timezone: Option<String>,
    pub task: String,
    pub enabled: bool,
}

impl NewJob {
    pub fn every(name: &str, interval_ms: u64, task: &str) -> Self {
        Self {
            name: name.into(),
            kind: ScheduleKind::Every,
            value: interval_ms.to_string(),
            timezone: None,
            task: task.into(),
            enabled: true,
        }
    }

    pub fn cron(name: &str, expression: &str, task: &str) -> Self {
        Self {
            name: name.into(),
            kind: ScheduleKind::Cron,
            value: expression.into(),
            timezone: None,
            task: task.into(),
            enabled: true,
        }
    }
}

/// Partial update; `None` fields keep their current value. next_run_at is
/// always recomputed after a patch.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub kind: Option<ScheduleKind>,
    pub value: Option<String>,
    pub timezone: Option<Option<String>>,
    pub task: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CronRun {
    pub id: i64,
    pub job_id: String,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct Scheduler {
    db: Database,
    bus: Arc<MessageBus>,
}

impl Scheduler {
    pub fn new(db: Database, bus: Arc<MessageBus>) -> Self {
        Self { db, bus }
    }

    /// Whether scheduled jobs survive restarts (false when running on the
    /// in-memory fallback store).
    pub fn is_durable(&self) -> bool {
        self.db.is_durable()
    }

    // ── CRUD ───────────────────────────────────────────────────

    pub fn add(&self, new: NewJob) -> Result<CronJob> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let next_run = compute_next_run(
            new.kind,
            &new.value,
            new.timezone.as_deref(),
            None,
            now,
        );

        self.db
            .conn()
            .execute(
                "INSERT INTO cron_jobs
                 (id, name, schedule_kind, schedule_value, timezone, task, enabled, next_run_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id,
                    new.name,
                    new.kind.as_str(),
                    new.value,
                    new.timezone,
                    new.task,
                    new.enabled as i64,
                    next_run.map(|t| t.to_rfc3339()),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| JanusError::Scheduler(format!("add job: {e}")))?;

        info!(job = %new.name, kind = new.kind.as_str(), "scheduled job");
        self.get(&id)?
            .ok_or_else(|| JanusError::Scheduler("job vanished after insert".into()))
    }

    pub fn update(&self, id: &str, patch: JobPatch) -> Result<CronJob> {
        let Some(mut job) = self.get(id)? else {
            return Err(JanusError::Scheduler(format!("no such job: {id}")));
        };

        if let Some(name) = patch.name {
            job.name = name;
        }
        if let Some(kind) = patch.kind {
            job.kind = kind;
        }
        if let Some(value) = patch.value {
            job.value = value;
        }
        if let Some(timezone) = patch.timezone {
            job.timezone = timezone;
        }
        if let Some(task) = patch.task {
            job.task = task;
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }

        let next_run = compute_next_run(
            job.kind,
            &job.value,
            job.timezone.as_deref(),
            job.last_run_at,
            Utc::now(),
        );

        self.db
            .conn()
            .execute(
                "UPDATE cron_jobs SET name = ?2, schedule_kind = ?3, schedule_value = ?4,
                 timezone = ?5, task = ?6, enabled = ?7, next_run_at = ?8 WHERE id = ?1",
                rusqlite::params![
                    id,
                    job.name,
                    job.kind.as_str(),
                    job.value,
                    job.timezone,
                    job.task,
                    job.enabled as i64,
                    next_run.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| JanusError::Scheduler(format!("update job: {e}")))?;

        self.get(id)?
            .ok_or_else(|| JanusError::Scheduler("job vanished after update".into()))
    }

    /// Insert, or patch the existing job carrying the same name. The
    /// heartbeat sync depends on this keeping ids stable.
    pub fn upsert_by_name(&self, new: NewJob) -> Result<CronJob> {
        let existing: Option<String> = self
            .db
            .conn()
            .query_row(
                "SELECT id FROM cron_jobs WHERE name = ?1",
                [&new.name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| JanusError::Scheduler(e.to_string()))?;

        match existing {
            Some(id) => self.update(
                &id,
                JobPatch {
                    kind: Some(new.kind),
                    value: Some(new.value),
                    timezone: Some(new.timezone),
                    task: Some(new.task),
                    enabled: Some(new.enabled),
                    ..Default::default()
                },
            ),
            None => self.add(new),
        }
    }

    /// Delete a job; its runs cascade.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let deleted = self
            .db
            .conn()
            .execute("DELETE FROM cron_jobs WHERE id = ?1", [id])
            .map_err(|e| JanusError::Scheduler(e.to_string()))?;
        Ok(deleted > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<CronJob>> {
        self.db
            .conn()
            .query_row(
                &format!("{JOB_SELECT} WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()
            .map_err(|e| JanusError::Scheduler(e.to_string()))
    }

    pub fn list(&self, include_disabled: bool) -> Result<Vec<CronJob>> {
        let conn = self.db.conn();
        let sql = if include_disabled {
            format!("{JOB_SELECT} ORDER BY created_at")
        } else {
            format!("{JOB_SELECT} WHERE enabled = 1 ORDER BY created_at")
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JanusError::Scheduler(e.to_string()))?;
        let jobs = stmt
            .query_map([], row_to_job)
            .map_err(|e| JanusError::Scheduler(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    pub fn run_history(&self, job_id: &str, limit: usize) -> Result<Vec<CronRun>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, status, error, started_at, duration_ms
                 FROM cron_runs WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| JanusError::Scheduler(e.to_string()))?;
        let runs = stmt
            .query_map(rusqlite::params![job_id, limit as i64], |row| {
                Ok(CronRun {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    status: row.get(2)?,
                    error: row.get(3)?,
                    started_at: row
                        .get::<_, String>(4)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    duration_ms: row.get::<_, i64>(5)? as u64,
                })
            })
            .map_err(|e| JanusError::Scheduler(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(runs)
    }

    // ── Ticker ─────────────────────────────────────────────────

    /// Run the scheduler until cancellation. Stop is idempotent — the
    /// token can be cancelled before or during the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(durable = self.is_durable(), "scheduler started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now(), &cancel).await;
                }
            }
        }
    }

    /// One scan over enabled jobs: fire everything due, honoring backoff.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) {
        let jobs = match self.list(false) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "scheduler tick failed to list jobs");
                return;
            }
        };

        for job in jobs {
            let Some(next_run) = job.next_run_at else {
                continue;
            };
            if next_run > now {
                continue;
            }
            if !backoff_elapsed(&job, now) {
                debug!(job = %job.name, errors = job.consecutive_errors, "backoff window still open");
                continue;
            }
            self.fire(&job, now, cancel).await;
        }
    }

    async fn fire(&self, job: &CronJob, now: DateTime<Utc>, cancel: &CancellationToken) {
        info!(job = %job.name, id = %job.id, "firing scheduled job");
        let started = std::time::Instant::now();

        let mut message = InboundMessage::new(
            "system",
            format!("cron:{}", job.id),
            format!("[Cron job: {}]\n\n{}", job.name, job.task),
        );
        message.author = "scheduler".into();

        let result = self.bus.publish_inbound(message, cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                if let Err(e) = self.record_result(job, now, duration_ms, None) {
                    warn!(job = %job.name, error = %e, "failed to record run");
                }
            }
            Err(e) if e.is_cancelled() => {
                debug!(job = %job.name, "firing interrupted by shutdown");
            }
            Err(e) => {
                warn!(job = %job.name, error = %e, "scheduled job failed to fire");
                if let Err(e2) = self.record_result(job, now, duration_ms, Some(&e.to_string())) {
                    warn!(job = %job.name, error = %e2, "failed to record failed run");
                }
            }
        }
    }

    /// Atomically update the job row and append its run record.
    fn record_result(
        &self,
        job: &CronJob,
        now: DateTime<Utc>,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        let next_run = compute_next_run(
            job.kind,
            &job.value,
            job.timezone.as_deref(),
            Some(now),
            now,
        );

        let mut conn = self.db.conn();
        let tx = conn
            .transaction()
            .map_err(|e| JanusError::Scheduler(e.to_string()))?;

        match error {
            None => {
                tx.execute(
                    "UPDATE cron_jobs SET last_run_at = ?2, next_run_at = ?3,
                     last_status = 'ok', last_error = NULL, consecutive_errors = 0
                     WHERE id = ?1",
                    rusqlite::params![job.id, now.to_rfc3339(), next_run.map(|t| t.to_rfc3339())],
                )
                .map_err(|e| JanusError::Scheduler(e.to_string()))?;
                tx.execute(
                    "INSERT INTO cron_runs (job_id, status, started_at, duration_ms)
                     VALUES (?1, 'ok', ?2, ?3)",
                    rusqlite::params![job.id, now.to_rfc3339(), duration_ms as i64],
                )
                .map_err(|e| JanusError::Scheduler(e.to_string()))?;
            }
            Some(error) => {
                tx.execute(
                    "UPDATE cron_jobs SET last_run_at = ?2, next_run_at = ?3,
                     last_status = 'error', last_error = ?4,
                     consecutive_errors = consecutive_errors + 1
                     WHERE id = ?1",
                    rusqlite::params![
                        job.id,
                        now.to_rfc3339(),
                        next_run.map(|t| t.to_rfc3339()),
                        error
                    ],
                )
                .map_err(|e| JanusError::Scheduler(e.to_string()))?;
                tx.execute(
                    "INSERT INTO cron_runs (job_id, status, error, started_at, duration_ms)
                     VALUES (?1, 'error', ?2, ?3, ?4)",
                    rusqlite::params![job.id, error, now.to_rfc3339(), duration_ms as i64],
                )
                .map_err(|e| JanusError::Scheduler(e.to_string()))?;
            }
        }

        tx.commit().map_err(|e| JanusError::Scheduler(e.to_string()))
    }
}

/// After consecutive errors, firing additionally requires the backoff
/// window (measured from the last attempt) to have passed.
fn backoff_elapsed(job: &CronJob, now: DateTime<Utc>) -> bool {
    if job.consecutive_errors == 0 {
        return true;
    }
    let Some(last_run) = job.last_run_at else {
        return true;
    };
    let index = ((job.consecutive_errors - 1) as usize).min(BACKOFF.len() - 1);
    let window = chrono::Duration::from_std(BACKOFF[index]).unwrap_or(chrono::Duration::zero());
    now - last_run >= window
}

/// The deterministic next-run function.
///
/// - `at`: the timestamp itself while still in the future, else None.
/// - `every`: max(now, last run) + interval.
/// - `cron`: next occurrence of the 5-field expression, evaluated in the
///   job's timezone when one is set. Invalid inputs log a warning and
///   return None.
pub fn compute_next_run(
    kind: ScheduleKind,
    value: &str,
    timezone: Option<&str>,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match kind {
        ScheduleKind::At => match DateTime::parse_from_rfc3339(value) {
            Ok(at) => {
                let at = at.with_timezone(&Utc);
                (at > now).then_some(at)
            }
            Err(e) => {
                warn!(value, error = %e, "invalid 'at' timestamp");
                None
            }
        },
        ScheduleKind::Every => match value.parse::<i64>() {
            Ok(ms) if ms > 0 => {
                let base = last_run_at.map_or(now, |last| last.max(now));
                Some(base + chrono::Duration::milliseconds(ms))
            }
            _ => {
                warn!(value, "invalid 'every' interval");
                None
            }
        },
        ScheduleKind::Cron => {
            // The cron crate wants a seconds field; 5-field expressions
            // get a literal zero prepended.
            let normalized = if value.split_whitespace().count() == 5 {
                format!("0 {value}")
            } else {
                value.to_string()
            };
            let schedule = match cron::Schedule::from_str(&normalized) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(value, error = %e, "invalid cron expression");
                    return None;
                }
            };

            match timezone {
                Some(tz_name) => match tz_name.parse::<chrono_tz::Tz>() {
                    Ok(tz) => schedule
                        .after(&now.with_timezone(&tz))
                        .next()
                        .map(|t| t.with_timezone(&Utc)),
                    Err(_) => {
                        warn!(timezone = tz_name, "unknown timezone, evaluating cron in UTC");
                        schedule.after(&now).next()
                    }
                },
                None => schedule.after(&now).next(),
            }
        }
    }
}

const JOB_SELECT: &str = "SELECT id, name, schedule_kind, schedule_value, timezone, task, enabled,
     last_run_at, next_run_at, last_status, last_error, consecutive_errors, created_at
     FROM cron_jobs";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronJob> {
    let parse_ts = |s: Option<String>| s.and_then(|s| s.parse::<DateTime<Utc>>().ok());
    Ok(CronJob {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: ScheduleKind::parse(&row.get::<_, String>(2)?)
            .unwrap_or(ScheduleKind::Every),
        value: row.get(3)?,
        timezone: row.get(4)?,
        task: row.get(5)?,
        enabled: row.get::<_, i64>(6)? != 0,
        last_run_at: parse_ts(row.get(7)?),
        next_run_at: parse_ts(row.get(8)?),
        last_status: row.get(9)?,
        last_error: row.get(10)?,
        consecutive_errors: row.get::<_, i64>(11)? as u32,
        created_at: row
            .get::<_, String>(12)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}
