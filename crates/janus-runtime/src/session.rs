//! Per-conversation session store: an append-only JSONL log per session
//! key with an in-memory cache and atomic temp-write-then-rename
//! persistence.
//!
//! File format: first line is a metadata record, every further line one
//! message. Corrupt metadata restarts the session; corrupt message lines
//! are skipped with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use janus_core::{JanusError, LlmMessage, Result};

/// Messages kept verbatim when a session is summarized away.
const KEEP_ON_SUMMARIZE: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(rename = "_type")]
    record_type: String,
    pub key: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl SessionMeta {
    fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            record_type: "metadata".into(),
            key: key.to_string(),
            created: now,
            updated: now,
            message_count: 0,
            summary: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub meta: SessionMeta,
    pub messages: Vec<LlmMessage>,
}

/// Build the canonical session key for a conversation.
pub fn session_key(channel: &str, chat_id: &str) -> String {
    format!("{channel}:{chat_id}")
}

/// Strip a leading run of orphan tool-role messages. A crash between
/// persisting an assistant turn and its tool results can leave the log
/// starting mid-exchange; the orphaned prefix is unusable.
pub fn strip_orphan_tool_prefix(messages: &[LlmMessage]) -> &[LlmMessage] {
    let skip = messages.iter().take_while(|m| m.is_tool()).count();
    if skip > 0 {
        debug!(orphans = skip, "stripping orphan tool prefix from history");
    }
    &messages[skip..]
}

pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Path-unsafe characters in the key are substituted; the canonical
        // "channel:chat" key becomes "channel_chat.jsonl" on disk.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    /// Cache → disk → fresh, in that order.
    pub fn get_or_create(&self, key: &str) -> Session {
        let mut cache = self.cache.lock();
        if let Some(session) = cache.get(key) {
            return session.clone();
        }
        let session = self
            .load(key)
            .unwrap_or_else(|| Session {
                meta: SessionMeta::new(key),
                messages: vec![],
            });
        cache.insert(key.to_string(), session.clone());
        session
    }

    fn load(&self, key: &str) -> Option<Session> {
        let path = self.path_for(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        let mut lines = raw.lines();

        let meta: SessionMeta = match lines.next().and_then(|l| serde_json::from_str(l).ok()) {
            Some(meta) => meta,
            None => {
                warn!(key, "corrupt session metadata, starting fresh");
                return None;
            }
        };

        let mut messages = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LlmMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(key, error = %e, "skipping invalid session line"),
            }
        }

        debug!(key, messages = messages.len(), "loaded session from disk");
        Some(Session { meta, messages })
    }

    /// Extend the in-memory log and persist.
    pub fn append(&self, key: &str, messages: &[LlmMessage]) -> Result<()> {
        let session = {
            let mut cache = self.cache.lock();
            let session = cache.entry(key.to_string()).or_insert_with(|| Session {
                meta: SessionMeta::new(key),
                messages: vec![],
            });
            session.messages.extend_from_slice(messages);
            session.meta.message_count = session.messages.len();
            session.meta.updated = Utc::now();
            session.clone()
        };
        self.persist(&session)
    }

    /// Last `max` messages from the cached log (loading from disk first if
    /// needed).
    pub fn history(&self, key: &str, max: usize) -> Vec<LlmMessage> {
        let session = self.get_or_create(key);
        let start = session.messages.len().saturating_sub(max);
        session.messages[start..].to_vec()
    }

    pub fn message_count(&self, key: &str) -> usize {
        self.get_or_create(key).messages.len()
    }

    pub fn estimated_tokens(&self, key: &str) -> usize {
        self.get_or_create(key)
            .messages
            .iter()
            .map(|m| m.estimate_tokens())
            .sum()
    }

    pub fn summary(&self, key: &str) -> Option<String> {
        self.get_or_create(key).meta.summary
    }

    /// Replace the summarized prefix: store the summary text in metadata
    /// and keep only the last few messages.
    pub fn summarize(&self, key: &str, summary: &str) -> Result<()> {
        let session = {
            let mut cache = self.cache.lock();
            let session = cache.entry(key.to_string()).or_insert_with(|| Session {
                meta: SessionMeta::new(key),
                messages: vec![],
            });
            let keep_from = session.messages.len().saturating_sub(KEEP_ON_SUMMARIZE);
            session.messages.drain(..keep_from);
            session.meta.summary = Some(summary.to_string());
            session.meta.message_count = session.messages.len();
            session.meta.updated = Utc::now();
            session.clone()
        };
        self.persist(&session)
    }

    /// Atomic write: temp file with a random suffix, then rename.
    fn persist(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut out = serde_json::to_string(&session.meta)?;
        out.push('\n');
        for message in &session.messages {
            out.push_str(&serde_json::to_string(message)?);
            out.push('\n');
        }

        let path = self.path_for(&session.meta.key);
        let tmp = path.with_extension(format!("{:08x}.tmp", rand::thread_rng().r#gen::<u32>()));
        std::fs::write(&tmp, out)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            JanusError::Session(format!("persist {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionStore::new(dir.path()), dir)
    }

    #[test]
    fn append_then_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key = session_key("cli", "terminal");
        {
            let store = SessionStore::new(dir.path());
            store
                .append(&key, &[LlmMessage::user("hi"), LlmMessage::assistant("hello")])
                .unwrap();
        }
        // Fresh store, cold cache — must come back from disk.
        let store = SessionStore::new(dir.path());
        let session = store.get_or_create(&key);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.meta.message_count, 2);
        assert_eq!(session.messages[0].content(), "hi");
    }

    #[test]
    fn file_format_has_metadata_first_line() {
        let (store, dir) = store();
        let key = session_key("telegram", "42");
        store.append(&key, &[LlmMessage::user("x")]).unwrap();

        let path = dir.path().join("telegram_42.jsonl");
        let raw = std::fs::read_to_string(path).unwrap();
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["_type"], "metadata");
        assert_eq!(first["key"], "telegram:42");
        assert_eq!(first["messageCount"], 1);
    }

    #[test]
    fn corrupt_metadata_restarts_session() {
        let (store, dir) = store();
        let key = session_key("cli", "x");
        store.append(&key, &[LlmMessage::user("old")]).unwrap();

        std::fs::write(dir.path().join("cli_x.jsonl"), "garbage\n{\"role\":\"user\",\"content\":\"y\"}\n").unwrap();
        let fresh = SessionStore::new(dir.path());
        let session = fresh.get_or_create(&key);
        assert!(session.messages.is_empty());
    }

    #[test]
    fn invalid_message_lines_are_skipped() {
        let (_, dir) = store();
        let key = session_key("cli", "x");
        {
            let store = SessionStore::new(dir.path());
            store
                .append(&key, &[LlmMessage::user("one"), LlmMessage::user("two")])
                .unwrap();
        }
        // Corrupt the middle message line.
        let path = dir.path().join("cli_x.jsonl");
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = raw.lines().collect();
        lines[1] = "{broken";
        std::fs::write(&path, lines.join("\n")).unwrap();

        let store = SessionStore::new(dir.path());
        let session = store.get_or_create(&key);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content(), "two");
    }

    #[test]
    fn summarize_keeps_last_four_and_stores_summary() {
        let (store, _dir) = store();
        let key = session_key("cli", "long");
        let messages: Vec<LlmMessage> =
            (0..10).map(|i| LlmMessage::user(format!("m{i}"))).collect();
        store.append(&key, &messages).unwrap();

        store.summarize(&key, "we discussed storage").unwrap();

        let session = store.get_or_create(&key);
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[0].content(), "m6");
        assert_eq!(session.meta.summary.as_deref(), Some("we discussed storage"));
    }

    #[test]
    fn history_returns_last_n() {
        let (store, _dir) = store();
        let key = session_key("cli", "h");
        let messages: Vec<LlmMessage> =
            (0..6).map(|i| LlmMessage::user(format!("m{i}"))).collect();
        store.append(&key, &messages).unwrap();

        let tail = store.history(&key, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content(), "m4");
        assert_eq!(tail[1].content(), "m5");
    }

    #[test]
    fn orphan_tool_prefix_is_stripped() {
        let log = vec![
            LlmMessage::tool("stale result", "call_1"),
            LlmMessage::tool("stale result 2", "call_2"),
            LlmMessage::user("actual start"),
            LlmMessage::assistant("reply"),
        ];
        let cleaned = strip_orphan_tool_prefix(&log);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].content(), "actual start");

        // No orphans — untouched.
        let ok = vec![LlmMessage::user("u"), LlmMessage::tool("r", "c")];
        assert_eq!(strip_orphan_tool_prefix(&ok).len(), 2);
    }
}
