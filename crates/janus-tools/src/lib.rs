//! The tool execution pipeline: built-in tools (shell, filesystem), the
//! gate interlock, and the registry that enforces per-user allow/deny and
//! normalizes errors.

pub mod exec;
pub mod files;
pub mod gate;
pub mod http;
pub mod registry;

pub use exec::ExecTool;
pub use files::{FileEditTool, FileListTool, FileReadTool, FileWriteTool};
pub use gate::{Confirmer, Gate, StaticConfirmer, TimeoutConfirmer};
pub use http::HttpFetchTool;
pub use registry::ToolRegistry;
