use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::Result;

/// A request from the LLM to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Description of a tool as presented to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// Per-invocation context injected into contextual tools before dispatch.
///
/// Safe to hold in a shared field only while inbound consumption is
/// single-threaded; a sharded loop must pass this as an execute argument.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub workspace_dir: PathBuf,
    pub exec_deny_patterns: Vec<String>,
    pub exec_timeout_ms: u64,
    pub max_file_size: u64,
    pub chat_id: Option<String>,
    pub user_id: Option<String>,
    pub tool_allow: Option<Vec<String>>,
    pub tool_deny: Option<Vec<String>>,
    pub content_policy: Option<String>,
}

/// Trait implemented by every tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the parameters object.
    fn parameters(&self) -> Value;

    /// Contextual tools override this to receive the per-call context.
    fn set_context(&self, _ctx: &ToolContext) {}

    /// Execute the tool. Errors are normalized by the registry into a
    /// leading `Error:` result string fed back to the model.
    async fn execute(&self, args: Value) -> Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
