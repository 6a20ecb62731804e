//! Mock chat provider for deterministic testing and offline wiring.
//!
//! Returns pre-queued responses without any HTTP and records every request
//! it receives for assertions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::provider::{ChatProvider, ChatRequest, ChatResponse, Usage};
use janus_core::{JanusError, Result, ToolCall};

/// A pre-configured response from the mock provider.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// If set, the provider returns this error instead.
    pub error: Option<String>,
}

impl MockResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// A mock provider with a FIFO queue of responses.
///
/// ```
/// use janus_llm::mock::MockProvider;
/// let provider = MockProvider::new("test").with_response("Hello!");
/// ```
pub struct MockProvider {
    name: String,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Every request received, for assertions in tests.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    streaming: bool,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            streaming: false,
        }
    }

    /// Queue a plain text response.
    pub fn with_response(self, content: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::text(content));
        self
    }

    /// Queue a response carrying a single tool call.
    pub fn with_tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        self.responses.lock().unwrap().push(MockResponse {
            tool_calls: vec![ToolCall {
                id: format!("call_{}", uuid_suffix()),
                name: name.to_string(),
                arguments,
            }],
            ..Default::default()
        });
        self
    }

    /// Queue an error.
    pub fn with_error(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::error(message));
        self
    }

    /// Advertise native streaming (chunks are emitted word by word).
    pub fn with_native_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }
}

fn uuid_suffix() -> String {
    // Enough uniqueness for test call ids without pulling uuid in here.
    format!("{:08x}", rand::random::<u32>())
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let mock = self.next_response();
        if let Some(error) = mock.error {
            return Err(JanusError::Llm(error));
        }
        Ok(ChatResponse {
            content: mock.content,
            tool_calls: mock.tool_calls,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        chunks: mpsc::Sender<String>,
    ) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let mock = self.next_response();
        if let Some(error) = mock.error {
            return Err(JanusError::Llm(error));
        }
        for word in mock.content.split_inclusive(' ') {
            let _ = chunks.send(word.to_string()).await;
        }
        Ok(ChatResponse {
            content: mock.content,
            tool_calls: mock.tool_calls,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::LlmMessage;

    fn request() -> ChatRequest {
        ChatRequest::new(vec![LlmMessage::user("hello")])
    }

    #[tokio::test]
    async fn responses_come_back_in_queue_order() {
        let provider = MockProvider::new("mock")
            .with_response("first")
            .with_response("second");
        assert_eq!(provider.chat(&request()).await.unwrap().content, "first");
        assert_eq!(provider.chat(&request()).await.unwrap().content, "second");
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn queued_error_surfaces() {
        let provider = MockProvider::new("mock").with_error("HTTP 429: rate limited");
        assert!(provider.chat(&request()).await.is_err());
    }

    #[tokio::test]
    async fn tool_call_response() {
        let provider =
            MockProvider::new("mock").with_tool_call("exec", serde_json::json!({"command": "ls"}));
        let resp = provider.chat(&request()).await.unwrap();
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name, "exec");
    }
}
