//! The tool registry: a name→tool map with per-user allow/deny, the gate
//! interlock, and per-call context injection.
//!
//! Context injection mutates registry-held state, which is safe only while
//! inbound consumption is single-threaded. A sharded loop must carry the
//! context as an execute argument instead.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::gate::{Confirmer, Gate};
use janus_core::{Tool, ToolContext, ToolSpec};

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    gate: Option<(Gate, Arc<dyn Confirmer>)>,
    ctx: RwLock<ToolContext>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            gate: None,
            ctx: RwLock::new(ToolContext::default()),
        }
    }

    /// Registry with the built-in tool set (exec, file, and HTTP tools).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::exec::ExecTool::new()));
        registry.register(Arc::new(crate::files::FileReadTool::new()));
        registry.register(Arc::new(crate::files::FileWriteTool::new()));
        registry.register(Arc::new(crate::files::FileEditTool::new()));
        registry.register(Arc::new(crate::files::FileListTool::new()));
        registry.register(Arc::new(crate::http::HttpFetchTool::new()));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "registered tool");
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    /// Arm the gate with a pattern matcher and a confirmation service.
    pub fn set_gate(&mut self, gate: Gate, confirmer: Arc<dyn Confirmer>) {
        self.gate = Some((gate, confirmer));
    }

    /// Inject the per-call context: stored for access checks and pushed
    /// into every contextual tool.
    pub fn set_context(&self, ctx: ToolContext) {
        for tool in self.tools.values() {
            tool.set_context(&ctx);
        }
        *self.ctx.write() = ctx;
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Specs in registration order, for prompt assembly and LLM requests.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// The per-user allow/deny verdict for a tool name, independent of
    /// whether this registry owns the tool. `None` = allowed.
    pub fn access_denied(&self, name: &str) -> Option<String> {
        let ctx = self.ctx.read();
        if let Some(allow) = &ctx.tool_allow
            && !allow.iter().any(|t| t == name)
        {
            return Some(format!(
                "Error: Tool \"{name}\" is not available for this user."
            ));
        }
        if let Some(deny) = &ctx.tool_deny
            && deny.iter().any(|t| t == name)
        {
            return Some(format!(
                "Error: Tool \"{name}\" is not available for this user."
            ));
        }
        None
    }

    /// Execute a tool call through the full enforcement pipeline:
    /// unknown → allow list → deny list → gate → execute, with any
    /// execution failure normalized to a leading `Error:` string.
    pub async fn execute(&self, name: &str, args: Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            let mut available = self.order.clone();
            available.sort();
            return format!(
                "Error: Unknown tool \"{name}\". Available tools: {}",
                available.join(", ")
            );
        };

        if let Some(denied) = self.access_denied(name) {
            info!(tool = %name, "tool blocked by user allow/deny");
            return denied;
        }

        if let Some((gate, confirmer)) = &self.gate
            && let Some(matched) = gate.matches(name, &args)
        {
            info!(tool = %name, command = %matched, "gated action awaiting confirmation");
            if !confirmer.confirm(&matched).await {
                return format!("Action denied by user: {matched}");
            }
        }

        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::StaticConfirmer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "exec"
        }
        fn description(&self) -> &str {
            "counting stand-in"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> janus_core::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("ran".into())
        }
    }

    fn counting_registry() -> (ToolRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
        }));
        (registry, calls)
    }

    #[tokio::test]
    async fn unknown_tool_lists_available_names() {
        let (registry, _) = counting_registry();
        let out = registry.execute("browse", json!({})).await;
        assert!(out.starts_with("Error: Unknown tool \"browse\""));
        assert!(out.contains("exec"));
    }

    #[tokio::test]
    async fn deny_list_blocks_without_executing() {
        let (registry, calls) = counting_registry();
        registry.set_context(ToolContext {
            tool_deny: Some(vec!["exec".into()]),
            ..Default::default()
        });
        let out = registry.execute("exec", json!({"command": "ls"})).await;
        assert_eq!(out, "Error: Tool \"exec\" is not available for this user.");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allow_list_blocks_absent_names() {
        let (registry, calls) = counting_registry();
        registry.set_context(ToolContext {
            tool_allow: Some(vec!["file_read".into()]),
            ..Default::default()
        });
        let out = registry.execute("exec", json!({"command": "ls"})).await;
        assert_eq!(out, "Error: Tool \"exec\" is not available for this user.");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_denial_bypasses_execute() {
        let (mut registry, calls) = counting_registry();
        registry.set_gate(
            Gate::new(&[r"rm\s".to_string()]),
            Arc::new(StaticConfirmer(false)),
        );
        let out = registry
            .execute("exec", json!({"command": "rm -rf build/"}))
            .await;
        assert!(out.starts_with("Action denied by user:"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_approval_lets_execution_through() {
        let (mut registry, calls) = counting_registry();
        registry.set_gate(
            Gate::new(&[r"rm\s".to_string()]),
            Arc::new(StaticConfirmer(true)),
        );
        let out = registry
            .execute("exec", json!({"command": "rm -rf build/"}))
            .await;
        assert_eq!(out, "ran");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_commands_skip_the_gate() {
        let (mut registry, calls) = counting_registry();
        registry.set_gate(
            Gate::new(&[r"rm\s".to_string()]),
            Arc::new(StaticConfirmer(false)),
        );
        let out = registry.execute("exec", json!({"command": "ls -la"})).await;
        assert_eq!(out, "ran");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
