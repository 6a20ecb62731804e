//! Layered JSON configuration for the Janus runtime.
//!
//! A single document merged from defaults ← `~/.janus/config.json` ←
//! `<workspace>/janus.json` ← environment ← explicit overrides. The merged
//! snapshot is passed by value to every component at startup.

pub mod loader;
pub mod schema;

pub use loader::{home_base, home_config_path, load};
pub use schema::{
    AgentConfig, AllowDeny, DatabaseConfig, FamilyConfig, GatesConfig, HeartbeatConfig,
    IdentityConfig, JanusConfig, LlmConfig, LlmErrorPolicy, MemoryConfig, ProviderEntryConfig,
    StreamingConfig, TelegramConfig, ToolsConfig, UserConfig, WorkspaceConfig,
};
