use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — the merged view of defaults, `~/.janus/config.json`,
/// `./janus.json`, environment variables, and explicit overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JanusConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub workspace: WorkspaceConfig,
    pub tools: ToolsConfig,
    pub database: DatabaseConfig,
    pub heartbeat: HeartbeatConfig,
    pub streaming: StreamingConfig,
    pub gates: GatesConfig,
    pub memory: MemoryConfig,
    pub telegram: TelegramConfig,
    pub users: Vec<UserConfig>,
    pub family: FamilyConfig,
}

impl Default for JanusConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            workspace: WorkspaceConfig::default(),
            tools: ToolsConfig::default(),
            database: DatabaseConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            streaming: StreamingConfig::default(),
            gates: GatesConfig::default(),
            memory: MemoryConfig::default(),
            telegram: TelegramConfig::default(),
            users: vec![],
            family: FamilyConfig::default(),
        }
    }
}

// ── LLM ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmConfig {
    /// Active provider name, e.g. "anthropic". Filled from the environment
    /// when absent (see the loader's precedence order).
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Additional registry entries beyond the primary provider.
    pub providers: Vec<ProviderEntryConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            api_key: None,
            api_base: None,
            model: "claude-sonnet-4-5".into(),
            max_tokens: 4096,
            temperature: 0.7,
            providers: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderEntryConfig {
    pub name: String,
    pub model: Option<String>,
    /// Purpose tags this entry serves ("summarize", "flush", ...).
    /// Empty = wildcard.
    pub purposes: Vec<String>,
    /// Lower is tried first.
    pub priority: u32,
}

impl Default for ProviderEntryConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            model: None,
            purposes: vec![],
            priority: 0,
        }
    }
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmErrorPolicy {
    Stop,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub summarization_threshold: usize,
    /// Estimated-token cap used to trim history and trigger summarization.
    pub token_budget: usize,
    pub context_window: usize,
    pub tool_retries: u32,
    #[serde(rename = "onLLMError")]
    pub on_llm_error: LlmErrorPolicy,
    pub max_subagent_iterations: u32,
    pub max_skills_in_prompt: usize,
    pub max_skills_prompt_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            summarization_threshold: 20,
            token_budget: 100_000,
            context_window: 128_000,
            tool_retries: 2,
            on_llm_error: LlmErrorPolicy::Retry,
            max_subagent_iterations: 5,
            max_skills_in_prompt: 150,
            max_skills_prompt_chars: 30_000,
        }
    }
}

// ── Workspace ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub dir: PathBuf,
    pub memory_dir: String,
    pub sessions_dir: String,
    pub skills_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            memory_dir: "memory".into(),
            sessions_dir: "sessions".into(),
            skills_dir: "skills".into(),
        }
    }
}

impl WorkspaceConfig {
    pub fn memory_path(&self) -> PathBuf {
        self.dir.join(&self.memory_dir)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.dir.join(&self.sessions_dir)
    }

    pub fn skills_path(&self) -> PathBuf {
        self.dir.join(&self.skills_dir)
    }
}

// ── Tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    /// Per-call shell timeout in milliseconds.
    pub exec_timeout: u64,
    /// Commands matching any of these patterns are refused outright,
    /// before the gate is even consulted.
    pub exec_deny_patterns: Vec<String>,
    pub max_file_size: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout: 30_000,
            exec_deny_patterns: vec![
                r"rm\s+-rf\s+/\s*$".into(),
                r"rm\s+-rf\s+/(bin|boot|etc|home|lib|usr|var)\b".into(),
                r":\(\)\s*\{.*\};\s*:".into(),
                r"mkfs(\.\w+)?\s".into(),
                r"dd\s+if=.*of=/dev/".into(),
                r">\s*/dev/sd[a-z]".into(),
            ],
            max_file_size: 1_048_576,
        }
    }
}

// ── Database ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".janus/janus.db"),
        }
    }
}

// ── Heartbeat ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_ms: 60_000,
        }
    }
}

// ── Streaming ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamingConfig {
    pub enabled: bool,
    pub telegram_throttle_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            telegram_throttle_ms: 500,
        }
    }
}

// ── Gates ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatesConfig {
    pub enabled: bool,
    /// Case-insensitive patterns matched against `exec` shell commands.
    /// A match requires interactive confirmation before execution.
    pub exec_patterns: Vec<String>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exec_patterns: vec![
                r"rm\s+-rf?\s".into(),
                r"\bsudo\b".into(),
                r"git\s+push\s+.*--force".into(),
                r"git\s+reset\s+--hard".into(),
                r"\bdrop\s+(table|database)\b".into(),
                r"\bshutdown\b|\breboot\b".into(),
            ],
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Enable the vector branch of hybrid search (requires a local
    /// embedding model).
    pub vector_search: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_search: false,
        }
    }
}

// ── Telegram (chat bot) ────────────────────────────────────────

/// Recognized for the chat-bot collaborator: the token env mapping and the
/// default-user-channel rewrite need these even though the adapter itself
/// lives outside the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub allowed_chat_ids: Vec<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            allowed_chat_ids: vec![],
        }
    }
}

// ── Users & family ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AllowDeny {
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityConfig {
    pub channel: String,
    pub channel_user_id: Option<String>,
    pub channel_username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserConfig {
    pub id: String,
    pub display_name: String,
    pub identities: Vec<IdentityConfig>,
    /// Path to the user's PROFILE.md, relative to `~/.janus/users/<id>/`
    /// when not absolute.
    pub profile_doc: Option<PathBuf>,
    pub tools: AllowDeny,
    pub skills: AllowDeny,
    pub content_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FamilyConfig {
    pub id: Option<String>,
    pub group_chat_ids: Vec<String>,
}

impl JanusConfig {
    /// Resolve a user by channel identity: (channel, stable id) first,
    /// then (channel, username).
    pub fn resolve_user(
        &self,
        channel: &str,
        channel_user_id: Option<&str>,
        channel_username: Option<&str>,
    ) -> Option<&UserConfig> {
        if let Some(cid) = channel_user_id {
            let hit = self.users.iter().find(|u| {
                u.identities
                    .iter()
                    .any(|i| i.channel == channel && i.channel_user_id.as_deref() == Some(cid))
            });
            if hit.is_some() {
                return hit;
            }
        }
        if let Some(uname) = channel_username {
            return self.users.iter().find(|u| {
                u.identities
                    .iter()
                    .any(|i| i.channel == channel && i.channel_username.as_deref() == Some(uname))
            });
        }
        None
    }

    pub fn user_by_id(&self, id: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Whether a chat id belongs to the configured family group chats.
    pub fn is_family_chat(&self, chat_id: &str) -> bool {
        self.family.group_chat_ids.iter().any(|c| c == chat_id)
    }

    /// The channel/chat a system-origin reply should be rewritten to:
    /// the chat bot's first allowlisted chat when enabled, else the terminal.
    pub fn default_user_channel(&self) -> (String, String) {
        if self.telegram.enabled
            && let Some(first) = self.telegram.allowed_chat_ids.first()
        {
            return ("telegram".into(), first.clone());
        }
        ("cli".into(), "terminal".into())
    }
}
