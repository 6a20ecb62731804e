use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use janus_core::{LlmMessage, Result, ToolCall, ToolSpec};

/// A request to an LLM backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier. Empty = use the registry entry's default model.
    pub model: String,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: Vec<LlmMessage>) -> Self {
        Self {
            model: String::new(),
            messages,
            tools: vec![],
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete response from an LLM backend.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The unified provider contract. Concrete vendor HTTP clients live outside
/// the runtime; anything implementing this trait can be registered.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Whether this provider streams natively. The registry adapts
    /// non-streamers by emitting the full content as a single chunk.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream text deltas into `chunks` and return the assembled response.
    /// Only called by the registry when `supports_streaming()` is true.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        chunks: mpsc::Sender<String>,
    ) -> Result<ChatResponse> {
        drop(chunks);
        self.chat(request).await
    }
}
