//! The message bus: one inbound and one outbound bounded queue, a
//! name→handler table, a streaming bypass, and the dispatcher task that
//! drains outbound messages to channel handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use janus_core::{Bounded, InboundMessage, OutboundKind, OutboundMessage, Result};

/// Implemented by channel adapters to receive outbound traffic.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn deliver(&self, message: OutboundMessage) -> Result<()>;
}

pub struct MessageBus {
    inbound: Bounded<InboundMessage>,
    outbound: Bounded<OutboundMessage>,
    handlers: RwLock<HashMap<String, Arc<dyn ChannelHandler>>>,
}

impl MessageBus {
    /// Both queues share one capacity; a slow outbound handler therefore
    /// throttles the whole pipeline end to end.
    pub fn new(capacity: usize) -> Self {
        Self {
            inbound: Bounded::new(capacity),
            outbound: Bounded::new(capacity),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_handler(&self, channel: &str, handler: Arc<dyn ChannelHandler>) {
        info!(channel, "registered channel handler");
        self.handlers.write().insert(channel.to_string(), handler);
    }

    pub async fn publish_inbound(
        &self,
        message: InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inbound.publish(message, cancel).await
    }

    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Result<InboundMessage> {
        self.inbound.consume(cancel).await
    }

    pub async fn publish_outbound(
        &self,
        message: OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.outbound.publish(message, cancel).await
    }

    pub fn inbound_depth(&self) -> usize {
        self.inbound.depth()
    }

    pub fn outbound_depth(&self) -> usize {
        self.outbound.depth()
    }

    /// Direct handler invocation for high-frequency stream chunks — these
    /// bypass the outbound queue entirely. The bus permits concurrent
    /// bypass calls; per-chat ordering of chunks is the channel adapter's
    /// responsibility.
    pub async fn stream_to(
        &self,
        channel: &str,
        chat_id: &str,
        kind: OutboundKind,
        content: &str,
    ) -> Result<()> {
        let handler = self.handlers.read().get(channel).cloned();
        match handler {
            Some(handler) => {
                handler
                    .deliver(OutboundMessage {
                        channel: channel.to_string(),
                        chat_id: chat_id.to_string(),
                        content: content.to_string(),
                        timestamp: Utc::now(),
                        kind,
                    })
                    .await
            }
            None => {
                warn!(channel, "stream chunk for unregistered channel dropped");
                Ok(())
            }
        }
    }

    /// Drain the outbound queue until cancellation: look up the handler by
    /// channel name and deliver. Best-effort — a missing handler drops
    /// with a warning, a handler error is logged and dispatch continues.
    pub async fn run_dispatcher(&self, cancel: CancellationToken) {
        info!("outbound dispatcher started");
        loop {
            let message = match self.outbound.consume(&cancel).await {
                Ok(message) => message,
                Err(e) if e.is_cancelled() => {
                    debug!("outbound dispatcher stopping");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "outbound consume failed");
                    return;
                }
            };

            let handler = self.handlers.read().get(&message.channel).cloned();
            match handler {
                Some(handler) => {
                    let channel = message.channel.clone();
                    if let Err(e) = handler.deliver(message).await {
                        error!(channel, error = %e, "channel handler failed");
                    }
                }
                None => {
                    warn!(
                        channel = %message.channel,
                        "no handler registered, dropping outbound message"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    #[async_trait]
    impl ChannelHandler for Recorder {
        async fn deliver(&self, message: OutboundMessage) -> Result<()> {
            self.seen.lock().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_routes_by_channel_name() {
        let bus = Arc::new(MessageBus::new(8));
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register_handler(
            "cli",
            Arc::new(Recorder {
                seen: Arc::clone(&seen),
            }),
        );

        let cancel = CancellationToken::new();
        let dispatcher = {
            let bus = Arc::clone(&bus);
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.run_dispatcher(cancel).await })
        };

        bus.publish_outbound(OutboundMessage::message("cli", "t1", "hello"), &cancel)
            .await
            .unwrap();
        // Unregistered channel: logged and dropped, dispatch continues.
        bus.publish_outbound(OutboundMessage::message("ghost", "t1", "lost"), &cancel)
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::message("cli", "t1", "again"), &cancel)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
        dispatcher.await.unwrap();

        let seen = seen.lock();
        let contents: Vec<&str> = seen.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "again"]);
    }

    #[tokio::test]
    async fn stream_to_bypasses_the_queue() {
        let bus = MessageBus::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register_handler(
            "cli",
            Arc::new(Recorder {
                seen: Arc::clone(&seen),
            }),
        );

        bus.stream_to("cli", "t1", OutboundKind::Chunk, "partial ")
            .await
            .unwrap();
        bus.stream_to("cli", "t1", OutboundKind::StreamEnd, "")
            .await
            .unwrap();

        assert_eq!(bus.outbound_depth(), 0);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, OutboundKind::Chunk);
        assert_eq!(seen[1].kind, OutboundKind::StreamEnd);
    }
}
