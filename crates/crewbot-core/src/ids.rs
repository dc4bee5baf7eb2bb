//! Room and session identifier normalization, plus trace-id generation.
//!
//! Session keys are room-centric: messages that belong to a room share the
//! key `room:<id>`; channel-only messages fall back to
//! `room:<channel>_<chat_id>` so every conversation still maps to exactly
//! one session file and one broker queue.

use uuid::Uuid;

/// Canonical prefix for room-scoped session keys.
pub const ROOM_PREFIX: &str = "room:";

/// Normalize a room identifier to its canonical form.
///
/// Accepts values like `"room:general"`, `"#general"`, or `"general"`
/// and returns `Some("general")`. Empty or whitespace-only input
/// returns `None`.
pub fn normalize_room_id(value: &str) -> Option<String> {
    let mut text = value.trim();
    if let Some(stripped) = text.strip_prefix(ROOM_PREFIX) {
        text = stripped;
    }
    if let Some(stripped) = text.strip_prefix('#') {
        text = stripped;
    }
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Convert a room id to a session id (`room:<id>`).
pub fn room_to_session_id(room_id: &str) -> String {
    match normalize_room_id(room_id) {
        Some(normalized) => format!("{ROOM_PREFIX}{normalized}"),
        None => String::new(),
    }
}

/// Convert a session id back to a room id.
pub fn session_to_room_id(session_id: &str) -> Option<String> {
    normalize_room_id(session_id)
}

/// Compute a stable session key for a message.
///
/// Prefers the room id when available; falls back to channel + chat id.
pub fn session_key_for(room_id: Option<&str>, channel: &str, chat_id: &str) -> String {
    if let Some(normalized) = room_id.and_then(normalize_room_id) {
        return format!("{ROOM_PREFIX}{normalized}");
    }
    format!("{ROOM_PREFIX}{channel}_{chat_id}")
}

/// Generate a new trace id for end-to-end message correlation.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}
