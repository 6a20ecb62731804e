//! HEARTBEAT.md: a workspace file declaring recurring tasks that are
//! synced into the scheduler by name. Level-2 headings name the task;
//! bullet lines carry the schedule and the task text.
//!
//! ```text
//! ## Morning briefing
//! - schedule: every 12h
//! - task: Summarize unread messages and today's calendar.
//!
//! ## Weekly review
//! - schedule: 0 18 * * 5
//! - task: Review the week and draft next week's plan.
//! ```

use std::path::Path;

use tracing::{debug, info, warn};

use crate::scheduler::{NewJob, ScheduleKind, Scheduler};
use janus_core::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatTask {
    pub name: String,
    pub kind: ScheduleKind,
    pub value: String,
    pub task: String,
}

/// Parse HEARTBEAT.md content. Entries with an unrecognized schedule or a
/// missing task line are skipped with a warning.
pub fn parse_heartbeat(content: &str) -> Vec<HeartbeatTask> {
    let mut tasks = Vec::new();
    let mut name: Option<String> = None;
    let mut schedule: Option<(ScheduleKind, String)> = None;
    let mut task: Option<String> = None;

    let mut flush = |name: &Option<String>,
                     schedule: &mut Option<(ScheduleKind, String)>,
                     task: &mut Option<String>,
                     out: &mut Vec<HeartbeatTask>| {
        let Some(name) = name else {
            return;
        };
        match (schedule.take(), task.take()) {
            (Some((kind, value)), Some(text)) => out.push(HeartbeatTask {
                name: name.clone(),
                kind,
                value,
                task: text,
            }),
            (None, _) => warn!(task = %name, "heartbeat entry has no usable schedule, skipping"),
            (_, None) => warn!(task = %name, "heartbeat entry has no task line, skipping"),
        }
    };

    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            flush(&name, &mut schedule, &mut task, &mut tasks);
            name = Some(heading.trim().to_string());
        } else if let Some(rest) = line.trim().strip_prefix("- schedule:") {
            match parse_schedule(rest.trim()) {
                Some(parsed) => schedule = Some(parsed),
                None => warn!(schedule = rest.trim(), "unrecognized heartbeat schedule"),
            }
        } else if let Some(rest) = line.trim().strip_prefix("- task:") {
            task = Some(rest.trim().to_string());
        }
    }
    flush(&name, &mut schedule, &mut task, &mut tasks);

    tasks
}

/// `every <N><m|h|d>` or a 5-field cron expression.
fn parse_schedule(raw: &str) -> Option<(ScheduleKind, String)> {
    if let Some(spec) = raw.strip_prefix("every ") {
        let spec = spec.trim();
        let unit = spec.chars().last()?;
        let number: u64 = spec[..spec.len() - 1].trim().parse().ok()?;
        let ms = match unit {
            'm' => number.checked_mul(60_000)?,
            'h' => number.checked_mul(3_600_000)?,
            'd' => number.checked_mul(86_400_000)?,
            _ => return None,
        };
        if ms == 0 {
            return None;
        }
        return Some((ScheduleKind::Every, ms.to_string()));
    }

    if raw.split_whitespace().count() == 5 {
        return Some((ScheduleKind::Cron, raw.to_string()));
    }
    None
}

/// Read HEARTBEAT.md (when present) and upsert each task into the
/// scheduler by name. Returns how many tasks were synced.
pub fn sync_heartbeat(scheduler: &Scheduler, path: &Path) -> Result<usize> {
    if !path.exists() {
        debug!(path = %path.display(), "no HEARTBEAT.md, skipping sync");
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)?;
    let tasks = parse_heartbeat(&content);
    let count = tasks.len();

    for task in tasks {
        scheduler.upsert_by_name(NewJob {
            name: task.name.clone(),
            kind: task.kind,
            value: task.value,
            timezone: None,
            task: task.task,
            enabled: true,
        })?;
    }

    if count > 0 {
        info!(count, "synced heartbeat tasks into the scheduler");
    }
    Ok(count)
}
