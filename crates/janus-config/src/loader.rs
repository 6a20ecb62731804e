use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::schema::JanusConfig;
use janus_core::{JanusError, Result};

/// Environment-variable provider selection, in precedence order.
const PROVIDER_ENV_KEYS: &[(&str, &str)] = &[
    ("openrouter", "OPENROUTER_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("groq", "GROQ_API_KEY"),
];

/// Load the configuration for a workspace directory.
///
/// Layers, later wins: built-in defaults ← `~/.janus/config.json` ←
/// `<workspace>/janus.json` ← environment variables ← explicit overrides.
/// The result is a plain value snapshot — configuration is loaded once at
/// startup and passed by value.
pub fn load(workspace: Option<&Path>, overrides: Option<Value>) -> Result<JanusConfig> {
    let workspace = workspace.unwrap_or(Path::new("."));

    let mut merged = serde_json::to_value(JanusConfig::default())?;

    if let Some(user_file) = home_config_path() {
        if let Some(layer) = read_json_layer(&user_file)? {
            debug!(path = %user_file.display(), "applying user config layer");
            merge(&mut merged, layer);
        }
    }

    let workspace_file = workspace.join("janus.json");
    if let Some(layer) = read_json_layer(&workspace_file)? {
        debug!(path = %workspace_file.display(), "applying workspace config layer");
        merge(&mut merged, layer);
    }

    let mut config: JanusConfig = serde_json::from_value(merged)
        .map_err(|e| JanusError::Config(format!("invalid configuration: {e}")))?;

    apply_env(&mut config);

    if let Some(overrides) = overrides {
        let mut value = serde_json::to_value(&config)?;
        merge(&mut value, overrides);
        config = serde_json::from_value(value)
            .map_err(|e| JanusError::Config(format!("invalid override: {e}")))?;
    }

    // The workspace dir itself comes from the caller, not the document.
    config.workspace.dir = workspace.to_path_buf();

    Ok(config)
}

/// `~/.janus/config.json`, when a home directory can be resolved.
pub fn home_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".janus").join("config.json"))
}

/// `~/.janus`, falling back to the current directory.
pub fn home_base() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".janus")
}

fn read_json_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(JanusError::Config(format!(
            "failed to parse {}: {e}",
            path.display()
        ))),
    }
}

/// Recursive object merge: objects merge key-wise, everything else replaces.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Environment overrides: provider API keys (first match in precedence
/// order wins when `llm.apiKey` is absent), model, API base, and the
/// chat-bot token.
fn apply_env(config: &mut JanusConfig) {
    if config.llm.api_key.is_none() {
        for (provider, env_key) in PROVIDER_ENV_KEYS {
            if let Ok(key) = std::env::var(env_key)
                && !key.is_empty()
            {
                debug!(provider, "selecting LLM provider from environment");
                config.llm.provider = Some(provider.to_string());
                config.llm.api_key = Some(key);
                break;
            }
        }
        if config.llm.api_key.is_none() {
            warn!("no LLM API key configured — provider calls will fail until one is set");
        }
    }

    if let Ok(model) = std::env::var("JANUS_MODEL")
        && !model.is_empty()
    {
        config.llm.model = model;
    }
    if let Ok(base) = std::env::var("JANUS_API_BASE")
        && !base.is_empty()
    {
        config.llm.api_base = Some(base);
    }
    if config.telegram.bot_token.is_none()
        && let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN")
        && !token.is_empty()
    {
        config.telegram.bot_token = Some(token);
    }
}
