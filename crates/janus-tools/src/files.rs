//! Filesystem tools: read, write (create/overwrite), and exact
//! search-and-replace edit. Paths resolve relative to the workspace
//! directory; reads and edits respect the configured size cap.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};

use janus_core::{Result, Tool, ToolContext};

fn resolve(workspace: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn size_guard(path: &Path, max: u64) -> Option<String> {
    match std::fs::metadata(path) {
        Ok(meta) if max > 0 && meta.len() > max => Some(format!(
            "Error: file {} is {} bytes, over the {} byte limit",
            path.display(),
            meta.len(),
            max
        )),
        _ => None,
    }
}

// ── file_read ──────────────────────────────────────────────────

pub struct FileReadTool {
    ctx: RwLock<ToolContext>,
}

impl FileReadTool {
    pub fn new() -> Self {
        Self {
            ctx: RwLock::new(ToolContext::default()),
        }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to read"}
            },
            "required": ["path"]
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        *self.ctx.write() = ctx.clone();
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let Some(raw) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'path' argument".into());
        };
        let (workspace, max_size) = {
            let ctx = self.ctx.read();
            (ctx.workspace_dir.clone(), ctx.max_file_size)
        };
        let path = resolve(&workspace, raw);
        if let Some(msg) = size_guard(&path, max_size) {
            return Ok(msg);
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) => Ok(format!("Error: cannot read {}: {e}", path.display())),
        }
    }
}

// ── file_write ─────────────────────────────────────────────────

pub struct FileWriteTool {
    ctx: RwLock<ToolContext>,
}

impl FileWriteTool {
    pub fn new() -> Self {
        Self {
            ctx: RwLock::new(ToolContext::default()),
        }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) or \
         overwriting it. Prefer this over file_edit when changing more \
         than a few lines."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to write"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["path", "content"]
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        *self.ctx.write() = ctx.clone();
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let Some(raw) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'path' argument".into());
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'content' argument".into());
        };
        let workspace = self.ctx.read().workspace_dir.clone();
        let path = resolve(&workspace, raw);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(format!("Error: cannot create {}: {e}", parent.display()));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(format!("Wrote {} bytes to {}", content.len(), path.display())),
            Err(e) => Ok(format!("Error: cannot write {}: {e}", path.display())),
        }
    }
}

// ── file_edit ──────────────────────────────────────────────────

pub struct FileEditTool {
    ctx: RwLock<ToolContext>,
}

impl FileEditTool {
    pub fn new() -> Self {
        Self {
            ctx: RwLock::new(ToolContext::default()),
        }
    }
}

impl Default for FileEditTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn description(&self) -> &str {
        "Surgical search-and-replace edit: finds the exact old_string in \
         the file and replaces its first occurrence with new_string. The \
         match must be exact, including whitespace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to edit"},
                "old_string": {"type": "string", "description": "Exact text to find"},
                "new_string": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        *self.ctx.write() = ctx.clone();
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let Some(raw) = args.get("path").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'path' argument".into());
        };
        let Some(old_string) = args.get("old_string").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'old_string' argument".into());
        };
        let Some(new_string) = args.get("new_string").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'new_string' argument".into());
        };

        let (workspace, max_size) = {
            let ctx = self.ctx.read();
            (ctx.workspace_dir.clone(), ctx.max_file_size)
        };
        let path = resolve(&workspace, raw);
        if let Some(msg) = size_guard(&path, max_size) {
            return Ok(msg);
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(format!("Error: cannot read {}: {e}", path.display())),
        };

        let Some(at) = content.find(old_string) else {
            return Ok(format!(
                "Error: old_string not found in {} — the match must be exact, including whitespace",
                path.display()
            ));
        };

        let mut edited = String::with_capacity(content.len());
        edited.push_str(&content[..at]);
        edited.push_str(new_string);
        edited.push_str(&content[at + old_string.len()..]);

        match tokio::fs::write(&path, edited).await {
            Ok(()) => Ok(format!("Edited {}", path.display())),
            Err(e) => Ok(format!("Error: cannot write {}: {e}", path.display())),
        }
    }
}

// ── file_list ──────────────────────────────────────────────────

pub struct FileListTool {
    ctx: RwLock<ToolContext>,
}

impl FileListTool {
    pub fn new() -> Self {
        Self {
            ctx: RwLock::new(ToolContext::default()),
        }
    }
}

impl Default for FileListTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: workspace root)"}
            }
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        *self.ctx.write() = ctx.clone();
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let workspace = self.ctx.read().workspace_dir.clone();
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = resolve(&workspace, raw);

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => return Ok(format!("Error: cannot list {}: {e}", path.display())),
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            Ok("(empty directory)".into())
        } else {
            Ok(names.join("\n"))
        }
    }
}
