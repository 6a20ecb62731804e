use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolCall;

/// How much context the prompt builder should assemble for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Everything: identity, workspace files, skills, memory, learner.
    Full,
    /// Identity, skills, and session only — used by child agents and probes.
    Minimal,
}

/// The tenancy dimension attached to a message and to memory chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    User,
    Family,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: String,
}

impl Scope {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::User,
            id: id.into(),
        }
    }

    pub fn family(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Family,
            id: id.into(),
        }
    }
}

/// Who a channel message came from, resolved against the configured users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserBinding {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_username: Option<String>,
}

/// A message entering the runtime, produced by a channel adapter or the
/// scheduler. Immutable — handled once, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_mode: Option<ContextMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            author: "user".into(),
            timestamp: Utc::now(),
            context_mode: None,
            user: None,
            scope: None,
        }
    }

    /// Whether this message was synthesized by the runtime itself
    /// (scheduler or heartbeat) rather than a person.
    pub fn is_system_origin(&self) -> bool {
        self.channel == "system"
    }
}

/// Delivery type of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Message,
    Chunk,
    StreamEnd,
}

/// A message leaving the runtime toward a channel handler.
/// Delivery is at-most-once; a missing handler drops with a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub kind: OutboundKind,
}

impl OutboundMessage {
    pub fn message(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            kind: OutboundKind::Message,
        }
    }
}

/// One entry in an LLM conversation. A closed sum with exactly four
/// variants — tool results must follow the assistant turn that requested
/// them, and a leading run of orphan `Tool` entries is stripped on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum LlmMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    /// Estimate token count for this message: ~4 chars per token plus a
    /// small per-message overhead for role markers.
    pub fn estimate_tokens(&self) -> usize {
        let mut chars = 16usize;
        chars += self.content().len();
        if let Self::Assistant { tool_calls, .. } = self {
            for tc in tool_calls {
                chars += tc.name.len();
                chars += tc.id.len();
                chars += tc.arguments.to_string().len();
            }
        }
        if let Self::Tool { tool_call_id, .. } = self {
            chars += tool_call_id.len();
        }
        (chars / 4).max(1)
    }
}
