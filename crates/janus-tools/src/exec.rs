//! The `exec` tool: quick, non-interactive shell commands with a per-call
//! timeout, hard deny patterns, and bounded output capture.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::RegexBuilder;
use serde_json::{Value, json};
use tracing::{debug, warn};

use janus_core::{Result, Tool, ToolContext};

/// Total bytes captured from a child process.
const CAPTURE_CAP: usize = 1_048_576;
/// Bytes returned to the model after truncation.
const RETURN_CAP: usize = 50 * 1024;

pub struct ExecTool {
    ctx: RwLock<ToolContext>,
}

impl ExecTool {
    pub fn new() -> Self {
        Self {
            ctx: RwLock::new(ToolContext::default()),
        }
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a non-interactive shell command and return its output. \
         Stdin is /dev/null — commands must not prompt. Long or \
         destructive commands may require user confirmation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        *self.ctx.write() = ctx.clone();
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'command' argument".into());
        };

        let (workspace, deny_patterns, timeout_ms) = {
            let ctx = self.ctx.read();
            (
                ctx.workspace_dir.clone(),
                ctx.exec_deny_patterns.clone(),
                if ctx.exec_timeout_ms > 0 {
                    ctx.exec_timeout_ms
                } else {
                    30_000
                },
            )
        };

        // Hard policy denials are not negotiable — no confirmation path.
        for pattern in &deny_patterns {
            let Ok(re) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
                continue;
            };
            if re.is_match(command) {
                warn!(command, pattern = %pattern, "exec blocked by deny pattern");
                return Ok(format!("Error: command blocked by policy ({pattern})"));
            }
        }

        debug!(command, "exec");
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !workspace.as_os_str().is_empty() {
            cmd.current_dir(&workspace);
        }

        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), cmd.output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(format!("Error: failed to spawn command: {e}")),
            Err(_) => return Ok(format!("Error: command timed out after {timeout_ms}ms")),
        };

        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        combined.truncate_to_char_boundary(CAPTURE_CAP);

        if combined.len() > RETURN_CAP {
            let total = combined.len();
            combined.truncate_to_char_boundary(RETURN_CAP);
            combined.push_str(&format!("\n[output truncated, {total} bytes total]"));
        }

        if output.status.success() {
            if combined.trim().is_empty() {
                combined = "(no output)".into();
            }
            Ok(combined)
        } else {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            Ok(format!("Error: exit code {code}\n{combined}"))
        }
    }
}

trait TruncateExt {
    fn truncate_to_char_boundary(&mut self, max: usize);
}

impl TruncateExt for String {
    fn truncate_to_char_boundary(&mut self, max: usize) {
        if self.len() <= max {
            return;
        }
        let mut cut = max;
        while cut > 0 && !self.is_char_boundary(cut) {
            cut -= 1;
        }
        self.truncate(cut);
    }
}
