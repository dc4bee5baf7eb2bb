//! Channel Manager — orchestrates channel lifecycle and outbound
//! message routing.
//!
//! Responsibilities:
//! - Register enabled channels
//! - Start/stop all channels concurrently via `tokio::spawn`
//! - Dispatch outbound envelopes from the bus to the correct channel

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crewbot_core::bus::queue::MessageBus;
use crewbot_core::bus::types::MessageEnvelope;

use crate::base::Channel;

/// Manages the lifecycle and message routing for all chat channels.
pub struct ChannelManager {
    /// Registered channels, keyed by name.
    channels: HashMap<String, Arc<dyn Channel>>,
    /// Message bus for outbound envelope consumption.
    bus: Arc<MessageBus>,
    /// Shutdown signal.
    shutdown: Arc<Notify>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a channel. Overwrites any previous channel with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registered channel");
        self.channels.insert(name, channel);
    }

    /// Unregister a channel by name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Channel>> {
        let removed = self.channels.remove(name);
        if removed.is_some() {
            info!(channel = %name, "unregistered channel");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// Names of all registered channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start all channels plus the outbound dispatcher, then block until
    /// shutdown is signaled.
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("no channels registered, nothing to start");
            return Ok(());
        }

        info!(
            channels = ?self.channel_names(),
            "starting {} channel(s)",
            self.channels.len()
        );

        let mut handles = Vec::new();

        for (name, channel) in &self.channels {
            let ch = channel.clone();
            let ch_name = name.clone();
            handles.push(tokio::spawn(async move {
                info!(channel = %ch_name, "channel starting");
                if let Err(e) = ch.start().await {
                    error!(channel = %ch_name, error = %e, "channel start failed");
                }
                info!(channel = %ch_name, "channel stopped");
            }));
        }

        let bus = self.bus.clone();
        let channels = self.channels.clone();
        let shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            Self::dispatch_outbound(bus, channels, shutdown).await;
        }));

        self.shutdown.notified().await;
        info!("channel manager shutting down");

        for handle in handles {
            handle.abort();
        }
        Ok(())
    }

    /// Stop all channels and the outbound dispatcher.
    pub async fn stop_all(&self) {
        info!("stopping all channels");
        self.shutdown.notify_waiters();

        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "channel stop failed");
            }
        }
    }

    /// Consume outbound envelopes from the bus and route each to the
    /// channel named in its `channel` field.
    async fn dispatch_outbound(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) {
        info!("outbound dispatcher started");
        loop {
            let msg = tokio::select! {
                _ = shutdown.notified() => break,
                msg = bus.consume_outbound() => msg,
            };

            let Some(msg) = msg else {
                info!("outbound channel closed, dispatcher exiting");
                break;
            };

            Self::route(&channels, msg).await;
        }
        info!("outbound dispatcher stopped");
    }

    /// Deliver one outbound envelope to its channel.
    async fn route(channels: &HashMap<String, Arc<dyn Channel>>, msg: MessageEnvelope) {
        match channels.get(&msg.channel) {
            Some(channel) => {
                debug!(channel = %msg.channel, chat_id = %msg.chat_id, "dispatching outbound message");
                if let Err(e) = channel.send(&msg).await {
                    error!(channel = %msg.channel, error = %e, "failed to send message");
                }
            }
            None => {
                warn!(channel = %msg.channel, "no channel registered for outbound message");
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
