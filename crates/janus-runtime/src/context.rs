//! Deterministic system-prompt assembly: a fixed ordering of delimited
//! sections built from identity, workspace files, the skill catalog, the
//! memory index, and the learner. Minimal mode drops the expensive
//! sections for child agents and probes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::learner::Learner;
use janus_config::{AllowDeny, JanusConfig, UserConfig};
use janus_core::{ContextMode, InboundMessage, ToolSpec};
use janus_memory::MemoryIndex;
use janus_skills::SkillCatalog;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Memory chunks injected into the prompt.
const MEMORY_TOP_K: usize = 5;
/// Daily notes included in the no-index fallback.
const FALLBACK_DAILY_NOTES: usize = 3;

const SKILLS_PREAMBLE: &str = "\
You have skills: prewritten instruction sets for specific kinds of work. \
Most are listed as stubs; load a skill only when the task calls for it by \
reading its SKILL.md at the listed location with file_read, one skill at \
a time. Skills shown in full below are always active.";

pub struct ContextBuilder {
    config: JanusConfig,
    skills: Arc<SkillCatalog>,
    memory: Option<Arc<MemoryIndex>>,
    learner: Option<Arc<Learner>>,
    /// `~/.janus` (overridable for tests).
    home_base: PathBuf,
}

impl ContextBuilder {
    pub fn new(config: JanusConfig, skills: Arc<SkillCatalog>) -> Self {
        Self {
            config,
            skills,
            memory: None,
            learner: None,
            home_base: janus_config::home_base(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryIndex>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_learner(mut self, learner: Arc<Learner>) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn with_home_base(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_base = home.into();
        self
    }

    /// Assemble the system prompt for one inbound message.
    pub async fn build(
        &self,
        message: &InboundMessage,
        user: Option<&UserConfig>,
        previous_summary: Option<&str>,
        tool_specs: &[ToolSpec],
    ) -> String {
        let mode = message.context_mode.unwrap_or(ContextMode::Full);
        let full = mode == ContextMode::Full;
        let workspace = &self.config.workspace.dir;

        let mut sections: Vec<String> = Vec::new();

        sections.push(self.identity_section(user, tool_specs));

        if let Some(section) = self.user_section(message, user) {
            sections.push(section);
        }

        if full {
            for (label, path) in [
                ("ego", self.home_base.join("EGO.md")),
                ("agents", workspace.join("AGENTS.md")),
                ("heartbeat", workspace.join("HEARTBEAT.md")),
                ("project", workspace.join("JANUS.md")),
            ] {
                if let Some(content) = read_if_present(&path) {
                    sections.push(format!("# {label}\n\n{content}"));
                }
            }
        }

        sections.push(self.skills_section(user));

        if full {
            if let Some(section) = self.memory_section(message).await {
                sections.push(section);
            }
            if let Some(section) = self.learner_section(message) {
                sections.push(section);
            }
        }

        sections.push(self.session_section(message));

        if let Some(summary) = previous_summary {
            sections.push(format!("# previous_summary\n\n{summary}"));
        }

        sections.join(SECTION_SEPARATOR)
    }

    fn identity_section(&self, user: Option<&UserConfig>, tool_specs: &[ToolSpec]) -> String {
        let allowed: Vec<&ToolSpec> = tool_specs
            .iter()
            .filter(|spec| user.is_none_or(|u| allow_deny_permits(&u.tools, &spec.name)))
            .collect();
        let tool_summary = if allowed.is_empty() {
            "(none)".to_string()
        } else {
            allowed
                .iter()
                .map(|spec| format!("- {}: {}", spec.name, spec.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "# identity\n\nYou are Janus, a personal autonomous agent.\nCurrent time: {}\nWorkspace: {}\n\nAvailable tools:\n{}",
            Utc::now().to_rfc3339(),
            self.config.workspace.dir.display(),
            tool_summary,
        )
    }

    fn user_section(&self, message: &InboundMessage, user: Option<&UserConfig>) -> Option<String> {
        let binding = message.user.as_ref()?;
        let mut section = format!(
            "# user\n\nYou are talking to {} (user id: {}).",
            binding.display_name, binding.user_id
        );
        if let Some(user) = user
            && let Some(doc) = self.profile_doc_path(user)
            && let Some(content) = read_if_present(&doc)
        {
            section.push_str("\n\n");
            section.push_str(&content);
        }
        Some(section)
    }

    fn profile_doc_path(&self, user: &UserConfig) -> Option<PathBuf> {
        let doc = user.profile_doc.as_ref()?;
        if doc.is_absolute() {
            Some(doc.clone())
        } else {
            Some(self.home_base.join("users").join(&user.id).join(doc))
        }
    }

    fn skills_section(&self, user: Option<&UserConfig>) -> String {
        let max_entries = self.config.agent.max_skills_in_prompt;
        let max_chars = self.config.agent.max_skills_prompt_chars;

        let mut section = format!("# skills\n\n{SKILLS_PREAMBLE}\n");
        let mut included = 0usize;
        let mut omitted = 0usize;

        for skill in self.skills.list() {
            if let Some(user) = user
                && !allow_deny_permits(&user.skills, &skill.name)
            {
                continue;
            }

            let entry = if skill.always {
                format!(
                    "\n<skill name=\"{}\" description=\"{}\">\n{}\n</skill>\n",
                    skill.name, skill.description, skill.instructions
                )
            } else {
                format!(
                    "\n<skill name=\"{}\" description=\"{}\" location=\"{}\" />\n",
                    skill.name,
                    skill.description,
                    skill.location.display()
                )
            };

            if included >= max_entries || section.len() + entry.len() > max_chars {
                omitted += 1;
                continue;
            }
            section.push_str(&entry);
            included += 1;
        }

        if omitted > 0 {
            section.push_str(&format!("\n[... {omitted} more skills omitted ...]\n"));
        }
        section
    }

    async fn memory_section(&self, message: &InboundMessage) -> Option<String> {
        let hits = match &self.memory {
            Some(index) if !message.content.trim().is_empty() => {
                let scope = message.scope.as_ref();
                if self.config.memory.vector_search && index.has_embedder() {
                    match index
                        .hybrid_search(&message.content, MEMORY_TOP_K, scope)
                        .await
                    {
                        Ok(hits) => hits,
                        Err(e) => {
                            warn!(error = %e, "memory search failed");
                            vec![]
                        }
                    }
                } else {
                    index
                        .keyword_search(&message.content, MEMORY_TOP_K, scope)
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "memory search failed");
                            vec![]
                        })
                }
            }
            _ => vec![],
        };

        let mut section = String::from("# memory\n");

        if hits.is_empty() {
            // No index or no results: dump the persistent memory file and
            // the most recent daily notes instead.
            let memory_dir = self.config.workspace.memory_path();
            let mut dumped = false;
            if let Some(content) = read_if_present(&memory_dir.join("MEMORY.md")) {
                section.push_str("\n");
                section.push_str(&content);
                section.push('\n');
                dumped = true;
            }
            for note in recent_daily_notes(&memory_dir, FALLBACK_DAILY_NOTES) {
                section.push_str("\n");
                section.push_str(&note);
                section.push('\n');
                dumped = true;
            }
            if !dumped {
                return None;
            }
            return Some(section);
        }

        for hit in &hits {
            section.push_str(&format!(
                "\n<memory source=\"{}\" section=\"{}\">\n{}\n</memory>\n",
                hit.source, hit.heading, hit.content
            ));
        }

        // Today's daily note rides along with every search.
        let today = daily_note_name(Utc::now().date_naive());
        if let Some(content) =
            read_if_present(&self.config.workspace.memory_path().join(&today))
        {
            section.push_str(&format!("\n<memory source=\"{today}\">\n{content}\n</memory>\n"));
        }

        Some(section)
    }

    fn learner_section(&self, message: &InboundMessage) -> Option<String> {
        let learner = self.learner.as_ref()?;
        let rec = learner.recommend(&message.content).ok().flatten()?;
        if rec.sample_size <= 3 {
            return None;
        }

        let mut section = format!(
            "# learner\n\nSimilar past tasks ({} samples): avg duration {}ms, avg iterations {}, avg tool calls {}, success rate {}.",
            rec.sample_size,
            rec.avg_duration_ms,
            rec.avg_iterations,
            rec.avg_tool_calls,
            rec.success_rate,
        );
        for warning in &rec.warnings {
            section.push_str(&format!("\n- {warning}"));
        }
        Some(section)
    }

    fn session_section(&self, message: &InboundMessage) -> String {
        let mut section = format!(
            "# session\n\nchannel: {}\nchat_id: {}",
            message.channel, message.chat_id
        );
        if let Some(user) = &message.user {
            section.push_str(&format!("\nuser_id: {}", user.user_id));
        }
        if let Some(scope) = &message.scope {
            let kind = match scope.kind {
                janus_core::ScopeKind::User => "user",
                janus_core::ScopeKind::Family => "family",
            };
            section.push_str(&format!("\nscope: {kind}:{}", scope.id));
        }
        section
    }
}

fn allow_deny_permits(rules: &AllowDeny, name: &str) -> bool {
    if let Some(allow) = &rules.allow
        && !allow.iter().any(|n| n == name)
    {
        return false;
    }
    if let Some(deny) = &rules.deny
        && deny.iter().any(|n| n == name)
    {
        return false;
    }
    true
}

pub(crate) fn daily_note_name(date: chrono::NaiveDate) -> String {
    format!("{}.md", date.format("%Y-%m-%d"))
}

fn read_if_present(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => Some(content.trim_end().to_string()),
        Ok(_) => None,
        Err(_) => {
            debug!(path = %path.display(), "context file not present");
            None
        }
    }
}

/// The most recent date-named notes in the memory directory, newest first.
fn recent_daily_notes(memory_dir: &Path, limit: usize) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(memory_dir) else {
        return vec![];
    };
    let mut dated: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            let stem = name.strip_suffix(".md")?;
            chrono::NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()?;
            Some((name, path))
        })
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated
        .into_iter()
        .take(limit)
        .filter_map(|(_, path)| read_if_present(&path))
        .collect()
}
