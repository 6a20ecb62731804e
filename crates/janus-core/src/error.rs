use thiserror::Error;

/// Unified error type for the entire Janus runtime.
#[derive(Error, Debug)]
pub enum JanusError {
    /// The operation was cancelled via its cancellation token.
    /// Never logged as an error — cancellation is part of orderly shutdown.
    #[error("operation cancelled")]
    Cancelled,

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    Llm(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("context window exceeded: {0}")]
    ContextOverflow(String),

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    Tool { tool: String, reason: String },

    // ── Subsystem errors ───────────────────────────────────────
    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("skill error: {0}")]
    Skill(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl JanusError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JanusError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, JanusError>;
