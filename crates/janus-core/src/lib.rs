//! Core types shared across the Janus runtime: the error type, the message
//! model (inbound/outbound envelopes and the LLM conversation sum type), the
//! tool contract, and the bounded async channel the bus is built on.

pub mod channel;
pub mod error;
pub mod message;
pub mod tool;

pub use channel::Bounded;
pub use error::{JanusError, Result};
pub use message::{
    ContextMode, InboundMessage, LlmMessage, OutboundKind, OutboundMessage, Scope, ScopeKind,
    UserBinding,
};
pub use tool::{Tool, ToolCall, ToolContext, ToolSpec};
