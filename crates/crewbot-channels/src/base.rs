//! Channel trait — the interface every chat transport implements.
//!
//! Concrete transports (Telegram, Discord, Slack, email, …) are
//! external collaborators: they publish inbound envelopes onto the bus
//! from `start()` and deliver outbound envelopes in `send()`.

use async_trait::async_trait;
use crewbot_core::bus::types::MessageEnvelope;

/// Every chat channel implements this trait.
///
/// The `ChannelManager` holds `Arc<dyn Channel>` and orchestrates
/// start/stop/send across all enabled channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "telegram", "discord", "cli").
    ///
    /// Must match the config key and `MessageEnvelope.channel`.
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// A long-running task that publishes inbound envelopes to the
    /// message bus until `stop()` is called.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown — stop listening and clean up resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver an outbound envelope to this channel.
    async fn send(&self, msg: &MessageEnvelope) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct MockChannel {
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        sent: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                started: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                sent: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            "mock"
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, msg: &MessageEnvelope) -> anyhow::Result<()> {
            self.sent.lock().await.push(msg.content.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mock_channel_lifecycle() {
        let ch = MockChannel::new();
        ch.start().await.unwrap();
        assert!(ch.started.load(Ordering::SeqCst));
        ch.stop().await.unwrap();
        assert!(ch.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_mock_channel_send() {
        let ch = MockChannel::new();
        let msg = MessageEnvelope::outbound("mock", "chat_1", "Hello!");
        ch.send(&msg).await.unwrap();

        let sent = ch.sent.lock().await;
        assert_eq!(sent.as_slice(), ["Hello!"]);
    }
}
