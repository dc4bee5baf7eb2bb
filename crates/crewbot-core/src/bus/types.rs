//! The message envelope — the single shape carried by the bus, the
//! broker WAL, channels, and tools.
//!
//! Envelopes are immutable once enqueued; amendments create new
//! envelopes that reference the old `trace_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{new_trace_id, normalize_room_id, session_key_for};

/// Priority for internal system announcements.
pub const SYSTEM_PRIORITY: i64 = 0;
/// Priority for bot-to-bot traffic.
pub const BOT_PRIORITY: i64 = 3;
/// Priority for user messages.
pub const USER_PRIORITY: i64 = 5;
/// Default when nothing else applies. Lower integer = higher priority.
pub const DEFAULT_PRIORITY: i64 = USER_PRIORITY;

/// Direction of an envelope relative to the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Who sent the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Bot,
    System,
}

/// A media attachment reference (photo, voice, document).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    /// MIME type (e.g. "image/jpeg", "audio/ogg").
    pub mime_type: String,
    /// Local file path or URL to the media.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Unified message shape for broker, bus, channels, and tools.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    /// Channel name (telegram, discord, slack, cli, system, …).
    pub channel: String,
    /// Chat/conversation identifier within the channel.
    pub chat_id: String,
    /// Message text.
    pub content: String,
    /// Lower integer = higher priority.
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub direction: MessageDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<SenderRole>,
    /// Bot name when the sender is a bot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (message ids, usernames, priority override).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Room id when the message is part of room-centric routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// End-to-end correlation id, set on first touch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

impl MessageEnvelope {
    /// Create a new inbound envelope with minimal required fields.
    pub fn inbound(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        MessageEnvelope {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            priority: DEFAULT_PRIORITY,
            direction: MessageDirection::Inbound,
            sender_id: Some(sender_id.into()),
            sender_role: None,
            bot_name: None,
            reply_to: None,
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
            room_id: None,
            trace_id: None,
        }
    }

    /// Create a new outbound envelope.
    pub fn outbound(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        MessageEnvelope {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            priority: DEFAULT_PRIORITY,
            direction: MessageDirection::Outbound,
            sender_id: None,
            sender_role: Some(SenderRole::Bot),
            bot_name: None,
            reply_to: None,
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
            room_id: None,
            trace_id: None,
        }
    }

    /// Unique key for session identification (room-centric format).
    pub fn session_key(&self) -> String {
        session_key_for(self.room_id.as_deref(), &self.channel, &self.chat_id)
    }

    /// Set the room for this message, normalizing the id.
    pub fn set_room(&mut self, room_id: &str) {
        self.room_id = normalize_room_id(room_id);
    }

    /// Ensure a trace id is set for end-to-end tracking.
    pub fn ensure_trace_id(&mut self) {
        if self.trace_id.is_none() {
            self.trace_id = Some(new_trace_id());
        }
    }

    /// Ensure sender_role is set to a default if missing.
    pub fn ensure_sender_role(&mut self, default_role: SenderRole) {
        if self.sender_role.is_none() {
            self.sender_role = Some(default_role);
        }
    }

    /// Align a default priority with the sender role.
    pub fn ensure_priority(&mut self) {
        if self.priority == DEFAULT_PRIORITY {
            match self.sender_role {
                Some(SenderRole::System) => self.priority = SYSTEM_PRIORITY,
                Some(SenderRole::Bot) => self.priority = BOT_PRIORITY,
                Some(SenderRole::User) | None => self.priority = USER_PRIORITY,
            }
        }
    }

    /// Apply default sender_role, trace_id, and priority if missing.
    pub fn apply_defaults(&mut self, default_role: SenderRole) {
        self.ensure_sender_role(default_role);
        self.ensure_trace_id();
        self.ensure_priority();
    }

    /// Effective queue priority: explicit `metadata.priority` integer wins
    /// over the envelope field.
    pub fn effective_priority(&self) -> i64 {
        self.metadata
            .get("priority")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(self.priority)
    }

    /// Build a reply envelope routed back to this message's origin,
    /// carrying the same trace id.
    pub fn reply(&self, content: impl Into<String>) -> MessageEnvelope {
        let mut out = MessageEnvelope::outbound(&self.channel, &self.chat_id, content);
        out.room_id = self.room_id.clone();
        out.trace_id = self.trace_id.clone();
        out
    }
}
