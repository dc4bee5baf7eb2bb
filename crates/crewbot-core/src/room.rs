//! Rooms — named conversations with a fixed set of participating bots.
//!
//! Every deployment has a `general` room that always exists and always
//! keeps at least one participant (the leader bot). Project rooms are
//! created on demand and may auto-archive after inactivity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// The room every deployment starts with.
pub const GENERAL_ROOM: &str = "general";

/// Types of rooms in the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// All bots, casual chat.
    Open,
    /// Specific team, deadline-driven.
    Project,
    /// 1-on-1 focused discussion with a single bot.
    Direct,
    /// The leader manages the room while the user is away.
    Coordination,
}

/// A message in a room's history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomMessage {
    /// Bot name or "user".
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub room_id: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Shared memory for a room (all participating bots see this).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SharedContext {
    /// What happened (timestamped).
    pub events: Vec<serde_json::Value>,
    /// Knowledge graph: people, orgs, concepts.
    pub entities: HashMap<String, serde_json::Value>,
    /// Verified truths with confidence scores.
    pub facts: Vec<serde_json::Value>,
    /// Structured handoffs between bots.
    pub artifact_chain: Vec<serde_json::Value>,
}

/// A room for crew collaboration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub participants: Vec<String>,
    /// "user" or a bot name in coordination mode.
    pub owner: String,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub shared_context: SharedContext,
    #[serde(default)]
    pub history: Vec<RoomMessage>,
    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub auto_archive: bool,
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: i64,
    #[serde(default)]
    pub coordinator_mode: bool,
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_archive_after_days() -> i64 {
    30
}

fn default_escalation_threshold() -> String {
    "medium".to_string()
}

impl Room {
    /// Create a new room.
    pub fn new(id: impl Into<String>, room_type: RoomType, participants: Vec<String>) -> Self {
        Room {
            id: id.into(),
            room_type,
            participants,
            owner: "user".to_string(),
            created_at: Utc::now(),
            shared_context: SharedContext::default(),
            history: Vec::new(),
            summary: String::new(),
            auto_archive: false,
            archive_after_days: 30,
            coordinator_mode: false,
            escalation_threshold: "medium".to_string(),
            deadline: None,
            metadata: HashMap::new(),
        }
    }

    /// Add a message to room history.
    pub fn add_message(&mut self, sender: impl Into<String>, content: impl Into<String>) -> &RoomMessage {
        let msg = RoomMessage {
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
            room_id: self.id.clone(),
            attachments: Vec::new(),
        };
        self.history.push(msg);
        self.history.last().unwrap()
    }

    /// Add a bot to the room (idempotent).
    pub fn add_participant(&mut self, bot_name: &str) {
        if !self.participants.iter().any(|p| p == bot_name) {
            self.participants.push(bot_name.to_string());
        }
    }

    /// Remove a bot from the room. The last participant is never
    /// removable — every room keeps someone to answer.
    pub fn remove_participant(&mut self, bot_name: &str) -> bool {
        if self.participants.len() <= 1 {
            return false;
        }
        let before = self.participants.len();
        self.participants.retain(|p| p != bot_name);
        self.participants.len() != before
    }

    pub fn has_participant(&self, bot_name: &str) -> bool {
        self.participants.iter().any(|p| p == bot_name)
    }

    /// Whether the room is still active (recent history inside the
    /// archive window).
    pub fn is_active(&self) -> bool {
        let Some(last) = self.history.last() else {
            return false;
        };
        let days_inactive = (Utc::now() - last.timestamp).num_days();
        days_inactive < self.archive_after_days
    }

    pub fn last_message(&self) -> Option<&RoomMessage> {
        self.history.last()
    }

    /// Add a fact to shared memory.
    pub fn add_fact(&mut self, subject: &str, predicate: &str, object: &str, confidence: f64) {
        self.shared_context.facts.push(serde_json::json!({
            "subject": subject,
            "predicate": predicate,
            "object": object,
            "confidence": confidence,
            "timestamp": Utc::now().to_rfc3339(),
        }));
    }

    /// Add an event to the shared history.
    pub fn add_event(&mut self, content: &str, source: &str) {
        self.shared_context.events.push(serde_json::json!({
            "content": content,
            "source": source,
            "timestamp": Utc::now().to_rfc3339(),
        }));
    }
}

// ─────────────────────────────────────────────
// RoomManager
// ─────────────────────────────────────────────

/// In-process registry of rooms, keyed by normalized id.
///
/// Constructed once at service init and passed down; the `general` room
/// exists from the start with the leader as its only participant.
/// With persistence attached, each room's shared context (events and
/// facts — what every participating bot sees) is written through the
/// CAS store, so concurrent bot updates merge instead of clobbering.
pub struct RoomManager {
    leader: String,
    rooms: RwLock<HashMap<String, Room>>,
    shared_store: Option<crate::cas::SessionCas>,
}

impl RoomManager {
    pub fn new(leader: impl Into<String>) -> Self {
        let leader = leader.into();
        let mut rooms = HashMap::new();
        rooms.insert(
            GENERAL_ROOM.to_string(),
            Room::new(GENERAL_ROOM, RoomType::Open, vec![leader.clone()]),
        );
        RoomManager {
            leader,
            rooms: RwLock::new(rooms),
            shared_store: None,
        }
    }

    /// Attach CAS-backed persistence for room shared contexts under
    /// `<dir>/rooms/`. Existing shared context loads back on creation.
    pub fn with_shared_store(mut self, dir: &std::path::Path) -> std::io::Result<Self> {
        self.shared_store = Some(crate::cas::SessionCas::new(dir.join("rooms"), 10)?);
        Ok(self)
    }

    /// Write a room's shared context through the CAS store.
    fn persist_shared_context(&self, room: &Room) {
        let Some(store) = &self.shared_store else { return };
        let mut records: Vec<serde_json::Value> = Vec::new();
        records.extend(room.shared_context.events.iter().cloned());
        records.extend(room.shared_context.facts.iter().cloned());
        let result = store.save_session(&format!("room:{}", room.id), records);
        if !result.success {
            tracing::warn!(
                room = %room.id,
                error = ?result.error,
                "failed to persist room shared context"
            );
        }
    }

    /// Load a room's shared context back from the CAS store.
    fn load_shared_context(&self, room: &mut Room) {
        let Some(store) = &self.shared_store else { return };
        let (records, _) = store.read(&format!("room:{}", room.id));
        for record in records.unwrap_or_default() {
            // Facts carry a predicate; everything else is an event.
            if record.get("predicate").is_some() {
                room.shared_context.facts.push(record);
            } else {
                room.shared_context.events.push(record);
            }
        }
    }

    /// The leader bot name.
    pub fn leader(&self) -> &str {
        &self.leader
    }

    /// Get a room by id (normalized).
    pub fn get(&self, room_id: &str) -> Option<Room> {
        let id = crate::ids::normalize_room_id(room_id)?;
        self.rooms.read().unwrap().get(&id).cloned()
    }

    /// Get a room, falling back to `general`.
    pub fn get_or_general(&self, room_id: &str) -> Room {
        self.get(room_id)
            .unwrap_or_else(|| self.get(GENERAL_ROOM).expect("general room always exists"))
    }

    /// Create a room. The leader always joins. Returns the created room,
    /// or the existing one if the id is taken.
    pub fn create(&self, room_id: &str, room_type: RoomType, mut participants: Vec<String>) -> Room {
        let Some(id) = crate::ids::normalize_room_id(room_id) else {
            return self.get_or_general(GENERAL_ROOM);
        };

        let mut rooms = self.rooms.write().unwrap();
        if let Some(existing) = rooms.get(&id) {
            return existing.clone();
        }

        if !participants.iter().any(|p| p == &self.leader) {
            participants.insert(0, self.leader.clone());
        }
        let mut room = Room::new(&id, room_type, participants);
        self.load_shared_context(&mut room);
        rooms.insert(id, room.clone());
        room
    }

    /// Apply a mutation to a room in place, persisting its shared
    /// context. Returns false for unknown rooms.
    pub fn update(&self, room_id: &str, f: impl FnOnce(&mut Room)) -> bool {
        let Some(id) = crate::ids::normalize_room_id(room_id) else {
            return false;
        };
        let mut rooms = self.rooms.write().unwrap();
        match rooms.get_mut(&id) {
            Some(room) => {
                f(room);
                let snapshot = room.clone();
                drop(rooms);
                self.persist_shared_context(&snapshot);
                true
            }
            None => false,
        }
    }

    /// Delete a room. The `general` room is never deletable.
    pub fn delete(&self, room_id: &str) -> bool {
        let Some(id) = crate::ids::normalize_room_id(room_id) else {
            return false;
        };
        if id == GENERAL_ROOM {
            return false;
        }
        self.rooms.write().unwrap().remove(&id).is_some()
    }

    /// All room ids, sorted.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_room_always_exists() {
        let mgr = RoomManager::new("crewbot");
        let room = mgr.get("general").unwrap();
        assert_eq!(room.room_type, RoomType::Open);
        assert_eq!(room.participants, vec!["crewbot"]);
    }

    #[test]
    fn test_create_room_adds_leader() {
        let mgr = RoomManager::new("crewbot");
        let room = mgr.create("project-x", RoomType::Project, vec!["coder".into()]);
        assert!(room.has_participant("crewbot"));
        assert!(room.has_participant("coder"));
    }

    #[test]
    fn test_create_existing_returns_existing() {
        let mgr = RoomManager::new("crewbot");
        mgr.create("alpha", RoomType::Project, vec!["coder".into()]);
        let again = mgr.create("alpha", RoomType::Open, vec!["researcher".into()]);
        assert_eq!(again.room_type, RoomType::Project);
        assert!(!again.has_participant("researcher"));
    }

    #[test]
    fn test_create_normalizes_id() {
        let mgr = RoomManager::new("crewbot");
        mgr.create("#beta", RoomType::Project, vec![]);
        assert!(mgr.get("beta").is_some());
        assert!(mgr.get("room:beta").is_some());
    }

    #[test]
    fn test_last_participant_not_removable() {
        let mut room = Room::new("solo", RoomType::Open, vec!["crewbot".into()]);
        assert!(!room.remove_participant("crewbot"));
        assert_eq!(room.participants.len(), 1);
    }

    #[test]
    fn test_remove_participant() {
        let mut room = Room::new(
            "team",
            RoomType::Project,
            vec!["crewbot".into(), "coder".into()],
        );
        assert!(room.remove_participant("coder"));
        assert!(!room.has_participant("coder"));
        assert!(!room.remove_participant("ghost"));
    }

    #[test]
    fn test_add_participant_idempotent() {
        let mut room = Room::new("team", RoomType::Project, vec!["crewbot".into()]);
        room.add_participant("coder");
        room.add_participant("coder");
        assert_eq!(room.participants.len(), 2);
    }

    #[test]
    fn test_general_not_deletable() {
        let mgr = RoomManager::new("crewbot");
        assert!(!mgr.delete("general"));
        assert!(mgr.get("general").is_some());
    }

    #[test]
    fn test_delete_project_room() {
        let mgr = RoomManager::new("crewbot");
        mgr.create("temp", RoomType::Project, vec![]);
        assert!(mgr.delete("temp"));
        assert!(mgr.get("temp").is_none());
    }

    #[test]
    fn test_is_active() {
        let mut room = Room::new("r", RoomType::Open, vec!["crewbot".into()]);
        assert!(!room.is_active()); // no history yet
        room.add_message("user", "hello");
        assert!(room.is_active());
    }

    #[test]
    fn test_update_room() {
        let mgr = RoomManager::new("crewbot");
        mgr.create("proj", RoomType::Project, vec![]);
        let ok = mgr.update("proj", |room| {
            room.add_participant("researcher");
            room.summary = "research room".into();
        });
        assert!(ok);
        let room = mgr.get("proj").unwrap();
        assert!(room.has_participant("researcher"));
        assert_eq!(room.summary, "research room");
    }

    #[test]
    fn test_shared_context_facts_and_events() {
        let mut room = Room::new("r", RoomType::Open, vec!["crewbot".into()]);
        room.add_fact("launch", "scheduled_for", "March", 0.9);
        room.add_event("kickoff meeting done", "user");
        assert_eq!(room.shared_context.facts.len(), 1);
        assert_eq!(room.shared_context.events.len(), 1);
        assert_eq!(room.shared_context.facts[0]["object"], "March");
    }

    #[test]
    fn test_shared_context_persists_through_cas() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mgr = RoomManager::new("crewbot")
                .with_shared_store(dir.path())
                .unwrap();
            mgr.create("proj", RoomType::Project, vec![]);
            mgr.update("proj", |room| {
                room.add_fact("launch", "scheduled_for", "March", 0.9);
                room.add_event("kickoff done", "user");
            });
        }

        // A fresh manager (new process) sees the same shared context.
        let mgr = RoomManager::new("crewbot")
            .with_shared_store(dir.path())
            .unwrap();
        let room = mgr.create("proj", RoomType::Project, vec![]);
        assert_eq!(room.shared_context.facts.len(), 1);
        assert_eq!(room.shared_context.events.len(), 1);
        assert_eq!(room.shared_context.facts[0]["object"], "March");
    }

    #[test]
    fn test_room_ids_sorted() {
        let mgr = RoomManager::new("crewbot");
        mgr.create("zeta", RoomType::Project, vec![]);
        mgr.create("alpha", RoomType::Project, vec![]);
        assert_eq!(mgr.room_ids(), vec!["alpha", "general", "zeta"]);
    }
}
