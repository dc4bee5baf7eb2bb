//! Session persistence and caching, one JSONL file per room.
//!
//! File format: `room_sessions/<safe_room>.jsonl`
//! - Line 1: `{"_type":"metadata","created_at":"…","updated_at":"…","metadata":{}}`
//! - Line 2+: `{"role":"user","content":"hello","timestamp":"…"}`
//!
//! History reads repair the tool-chain invariant: every `tool` message
//! handed to a provider must have its matching assistant `tool_calls`
//! entry earlier in the same window.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

// ─────────────────────────────────────────────
// Session metadata (first line of JSONL)
// ─────────────────────────────────────────────

/// Metadata header written as the first line of each JSONL session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMetadata {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// Tool-chain helpers
// ─────────────────────────────────────────────

/// Repair the tool-chain invariant in a history window.
///
/// If the window contains a `tool` message whose `tool_call_id` has no
/// matching assistant `tool_calls` entry inside the window, the full log
/// is searched backward for the assistant message carrying that call and
/// it is prepended. Orphans with no originating assistant message
/// anywhere are dropped — a broken chain must never reach a provider.
pub fn repair_tool_chains(window: Vec<Message>, full_log: &[Message]) -> Vec<Message> {
    let mut window = window;

    loop {
        let known: HashSet<String> = window
            .iter()
            .flat_map(|m| m.tool_call_ids())
            .map(String::from)
            .collect();

        let missing = window.iter().find_map(|m| {
            m.answered_tool_call_id()
                .filter(|id| !known.contains(*id))
                .map(String::from)
        });

        let Some(missing_id) = missing else {
            return window;
        };

        let carrier = full_log
            .iter()
            .rev()
            .find(|m| m.tool_call_ids().iter().any(|id| *id == missing_id));

        match carrier {
            Some(assistant) => {
                debug!(tool_call_id = %missing_id, "prepending assistant message to preserve tool chain");
                window.insert(0, assistant.clone());
            }
            None => {
                warn!(tool_call_id = %missing_id, "dropping orphan tool result with no originating call");
                window.retain(|m| m.answered_tool_call_id() != Some(missing_id.as_str()));
            }
        }
    }
}

/// Find a safe index to compact at, ensuring no tool chains are broken.
///
/// Walks backward from `len - target_keep` looking for an assistant
/// message that either has no tool calls, or whose every tool-call id
/// has a matching tool result later in the kept window. Returns 0 when
/// no safe boundary exists (compact nothing or everything — caller's
/// choice).
pub fn safe_compaction_point(messages: &[Message], target_keep: usize) -> usize {
    if messages.len() <= target_keep {
        return 0;
    }

    let mut check_index = messages.len() - target_keep;

    while check_index > 0 {
        let msg = &messages[check_index];

        if msg.role() == "assistant" {
            let call_ids = msg.tool_call_ids();
            if call_ids.is_empty() {
                return check_index;
            }

            let all_results_present = call_ids.iter().all(|id| {
                messages[check_index + 1..]
                    .iter()
                    .any(|later| later.answered_tool_call_id() == Some(*id))
            });
            if all_results_present {
                return check_index;
            }
        }

        check_index -= 1;
    }

    0
}

// ─────────────────────────────────────────────
// RoomSessionManager
// ─────────────────────────────────────────────

/// Manages per-room conversation sessions with in-memory caching and
/// JSONL persistence.
///
/// Thread-safe via `RwLock`; the owning room broker serializes writes
/// for a given room, and saves are atomic (temp file + rename) so
/// concurrent readers never see a torn file.
pub struct RoomSessionManager {
    /// Directory where `.jsonl` session files are stored.
    sessions_dir: PathBuf,
    /// In-memory cache of active sessions.
    cache: RwLock<HashMap<String, Session>>,
    /// Per-message timestamps, parallel to each session's message list.
    times: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RoomSessionManager {
    /// Create a new session manager.
    ///
    /// `sessions_dir` defaults to `~/.crewbot/room_sessions/` if `None`.
    pub fn new(sessions_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.unwrap_or_else(utils::get_room_sessions_path);
        std::fs::create_dir_all(&dir)?;

        Ok(RoomSessionManager {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
            times: RwLock::new(HashMap::new()),
        })
    }

    /// Get an existing session or create a new one (cache → disk → new).
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if let Some(session) = self.load_from_disk(key) {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
            return session;
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Add a message to a session and persist to disk.
    pub fn add_message(&self, key: &str, message: Message) {
        let mut session = self.get_or_create(key);
        session.messages.push(message);
        session.updated_at = Utc::now();

        {
            let mut times = self.times.write().unwrap();
            times
                .entry(key.to_string())
                .or_default()
                .push(session.updated_at);
        }

        self.store(session);
    }

    /// Replace a session wholesale (used by the compactor) and persist.
    pub fn replace(&self, session: Session) {
        {
            let mut times = self.times.write().unwrap();
            let stamps = times.entry(session.key.clone()).or_default();
            stamps.resize(session.messages.len(), session.updated_at);
        }
        self.store(session);
    }

    /// Update session metadata in place and persist.
    pub fn update_metadata(&self, key: &str, f: impl FnOnce(&mut HashMap<String, String>)) {
        let mut session = self.get_or_create(key);
        f(&mut session.metadata);
        session.updated_at = Utc::now();
        self.store(session);
    }

    /// Get the last `max_messages` from a session's history, with the
    /// tool-chain invariant repaired.
    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let len = session.messages.len();
        let window = if len <= max_messages {
            session.messages.clone()
        } else {
            session.messages[len - max_messages..].to_vec()
        };
        repair_tool_chains(window, &session.messages)
    }

    /// The safe compaction index for a session (see [`safe_compaction_point`]).
    pub fn compaction_point(&self, key: &str, target_keep: usize) -> usize {
        let session = self.get_or_create(key);
        safe_compaction_point(&session.messages, target_keep)
    }

    /// Clear all messages in a session (reset conversation).
    pub fn clear(&self, key: &str) {
        let mut session = self.get_or_create(key);
        session.messages.clear();
        session.updated_at = Utc::now();
        {
            let mut times = self.times.write().unwrap();
            times.insert(key.to_string(), Vec::new());
        }
        self.store(session);
    }

    /// Delete a session entirely (cache and disk).
    ///
    /// Returns `true` if the session file existed on disk.
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
            let mut times = self.times.write().unwrap();
            times.remove(key);
        }

        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to delete session file: {}", e);
                return false;
            }
            true
        } else {
            false
        }
    }

    /// List all sessions from disk, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();

        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read sessions directory: {}", e);
                return summaries;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "jsonl") {
                continue;
            }

            if let Ok(file) = std::fs::File::open(&path) {
                let reader = std::io::BufReader::new(file);
                if let Some(Ok(line)) = reader.lines().next() {
                    if let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) {
                        let key = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .map(|s| s.replacen('_', ":", 1))
                            .unwrap_or_default();

                        summaries.push(SessionSummary {
                            key,
                            created_at: meta.created_at,
                            updated_at: meta.updated_at,
                            path: path.clone(),
                        });
                    }
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// The JSONL file path for a session key.
    fn session_path(&self, key: &str) -> PathBuf {
        let safe_key = utils::safe_filename(&key.replace(':', "_"));
        self.sessions_dir.join(format!("{}.jsonl", safe_key))
    }

    /// Cache and persist a session, logging (not propagating) disk errors
    /// so the in-memory conversation always advances.
    fn store(&self, session: Session) {
        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(session.key.clone(), session.clone());
        }
        if let Err(e) = self.save_to_disk(&session) {
            warn!("Failed to persist session {}: {}", session.key, e);
        }
    }

    /// Load a session from its JSONL file.
    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open session file {}: {}", path.display(), e);
                return None;
            }
        };

        let reader = std::io::BufReader::new(file);
        let mut session = Session::new(key);
        let mut messages = Vec::new();
        let mut stamps = Vec::new();

        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }

            if let Ok(meta) = serde_json::from_str::<SessionMetadata>(&line) {
                if meta.record_type == "metadata" {
                    session.created_at = meta.created_at;
                    session.updated_at = meta.updated_at;
                    session.metadata = meta.metadata;
                    continue;
                }
            }

            // Message lines carry a `timestamp` field serde ignores.
            if let Ok(msg) = serde_json::from_str::<Message>(&line) {
                let stamp = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| {
                        v.get("timestamp")
                            .and_then(|t| t.as_str())
                            .and_then(|t| t.parse::<DateTime<Utc>>().ok())
                    })
                    .unwrap_or(session.updated_at);
                messages.push(msg);
                stamps.push(stamp);
            }
        }

        session.messages = messages;
        {
            let mut times = self.times.write().unwrap();
            times.insert(key.to_string(), stamps);
        }
        debug!(
            "Loaded session '{}' with {} messages from disk",
            key,
            session.messages.len()
        );
        Some(session)
    }

    /// Save a session atomically: write the whole file under a temp name,
    /// then rename over the target.
    fn save_to_disk(&self, session: &Session) -> std::io::Result<()> {
        use std::io::Write;

        let path = self.session_path(&session.key);
        let tmp_path = path.with_extension("tmp");

        let stamps = {
            let times = self.times.read().unwrap();
            times.get(&session.key).cloned().unwrap_or_default()
        };

        {
            let mut file = std::fs::File::create(&tmp_path)?;

            let meta = SessionMetadata {
                record_type: "metadata".to_string(),
                created_at: session.created_at,
                updated_at: session.updated_at,
                metadata: session.metadata.clone(),
            };
            writeln!(file, "{}", serde_json::to_string(&meta)?)?;

            for (i, msg) in session.messages.iter().enumerate() {
                let mut value = serde_json::to_value(msg)?;
                let stamp = stamps.get(i).copied().unwrap_or(session.updated_at);
                if let Some(obj) = value.as_object_mut() {
                    obj.insert(
                        "timestamp".to_string(),
                        serde_json::Value::String(stamp.to_rfc3339()),
                    );
                }
                writeln!(file, "{}", serde_json::to_string(&value)?)?;
            }
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// Summary of a session for listing purposes.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    /// Session key (e.g. `"room:general"`).
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Path to the JSONL file.
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use tempfile::tempdir;

    fn make_manager() -> (RoomSessionManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();
        (mgr, dir)
    }

    #[test]
    fn test_get_or_create_new_session() {
        let (mgr, _dir) = make_manager();
        let session = mgr.get_or_create("room:general");
        assert_eq!(session.key, "room:general");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_add_message() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("room:a", Message::user("hello"));
        mgr.add_message("room:a", Message::assistant("hi there!"));

        let session = mgr.get_or_create("room:a");
        assert_eq!(session.messages.len(), 2);
    }

    #[test]
    fn test_get_history_limit() {
        let (mgr, _dir) = make_manager();
        for i in 0..10 {
            mgr.add_message("room:a", Message::user(format!("msg {}", i)));
        }

        let history = mgr.get_history("room:a", 3);
        assert_eq!(history.len(), 3);
        match &history[0] {
            Message::User {
                content: crate::types::MessageContent::Text(text),
            } => assert_eq!(text, "msg 7"),
            _ => panic!("expected user message"),
        }
    }

    #[test]
    fn test_history_repairs_split_tool_chain() {
        let (mgr, _dir) = make_manager();
        // assistant(tool_use T1) / tool(T1) split exactly at the window edge
        mgr.add_message("room:a", Message::user("check the file"));
        mgr.add_message(
            "room:a",
            Message::assistant_tool_calls(vec![ToolCall::new("T1", "read_file", "{}")]),
        );
        mgr.add_message("room:a", Message::tool_result("T1", "contents"));
        mgr.add_message("room:a", Message::assistant("done"));

        // Window of 2 starts at the tool result → assistant must be pulled in.
        let history = mgr.get_history("room:a", 2);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].tool_call_ids(), vec!["T1"]);
        assert_eq!(history[1].answered_tool_call_id(), Some("T1"));
    }

    #[test]
    fn test_repair_drops_orphan_results() {
        let window = vec![
            Message::tool_result("ghost", "no origin anywhere"),
            Message::assistant("done"),
        ];
        let full: Vec<Message> = window.clone();
        let repaired = repair_tool_chains(window, &full);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].role(), "assistant");
    }

    #[test]
    fn test_repair_handles_multiple_missing_chains() {
        let full = vec![
            Message::assistant_tool_calls(vec![ToolCall::new("A", "exec", "{}")]),
            Message::tool_result("A", "ok"),
            Message::assistant_tool_calls(vec![ToolCall::new("B", "exec", "{}")]),
            Message::tool_result("B", "ok"),
            Message::assistant("summary"),
        ];
        // Window starts at the first tool result: both chains broken.
        let window = full[1..].to_vec();
        let repaired = repair_tool_chains(window, &full);

        let known: Vec<&str> = repaired.iter().flat_map(|m| m.tool_call_ids()).collect();
        assert!(known.contains(&"A"));
        assert!(known.contains(&"B"));
        for m in &repaired {
            if let Some(id) = m.answered_tool_call_id() {
                assert!(known.contains(&id));
            }
        }
    }

    #[test]
    fn test_safe_compaction_point_short_session() {
        let messages = vec![Message::user("a"), Message::assistant("b")];
        assert_eq!(safe_compaction_point(&messages, 30), 0);
    }

    #[test]
    fn test_safe_compaction_point_toolless_assistant() {
        let mut messages = Vec::new();
        for i in 0..40 {
            messages.push(Message::user(format!("q{}", i)));
            messages.push(Message::assistant(format!("a{}", i)));
        }
        let idx = safe_compaction_point(&messages, 30);
        assert!(idx > 0);
        assert!(idx <= messages.len() - 30);
        assert_eq!(messages[idx].role(), "assistant");
    }

    #[test]
    fn test_safe_compaction_point_respects_tool_chain() {
        // 40 alternating messages; assistant tool_use at 25, result at 26.
        let mut messages = Vec::new();
        for i in 0..20 {
            messages.push(Message::user(format!("q{}", i)));
            messages.push(Message::assistant(format!("a{}", i)));
        }
        messages[25] = Message::assistant_tool_calls(vec![ToolCall::new("T1", "read_file", "{}")]);
        messages[26] = Message::tool_result("T1", "data");
        assert_eq!(messages.len(), 40);

        let idx = safe_compaction_point(&messages, 30);
        assert!(idx > 0);
        assert!(idx <= 25);
        // The boundary is an assistant message; if it carries tool calls,
        // every result must live in the kept tail.
        assert_eq!(messages[idx].role(), "assistant");
        for id in messages[idx].tool_call_ids() {
            assert!(messages[idx + 1..]
                .iter()
                .any(|m| m.answered_tool_call_id() == Some(id)));
        }
        // The T1 pair survives in the kept tail.
        assert!(messages[idx..]
            .iter()
            .any(|m| m.tool_call_ids().contains(&"T1")));
        assert!(messages[idx..]
            .iter()
            .any(|m| m.answered_tool_call_id() == Some("T1")));
    }

    #[test]
    fn test_clear_session() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("room:a", Message::user("hello"));
        mgr.clear("room:a");
        assert!(mgr.get_or_create("room:a").messages.is_empty());
    }

    #[test]
    fn test_delete_session() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("room:a", Message::user("hello"));
        assert!(mgr.delete("room:a"));
        assert!(!mgr.delete("room:a"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();

        {
            let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            mgr.add_message("room:general", Message::system("You are Crewbot."));
            mgr.add_message("room:general", Message::user("Hello"));
            mgr.add_message("room:general", Message::assistant("Hi! How can I help?"));
        }

        {
            let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            let session = mgr.get_or_create("room:general");
            assert_eq!(session.messages.len(), 3);
        }
    }

    #[test]
    fn test_session_file_format() {
        let dir = tempdir().unwrap();
        let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();

        mgr.add_message("room:general", Message::user("test message"));

        let path = dir.path().join("room_general.jsonl");
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let meta: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["_type"], "metadata");

        let msg: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"], "test message");
        assert!(msg.get("timestamp").is_some());
    }

    #[test]
    fn test_update_metadata_persists() {
        let dir = tempdir().unwrap();
        {
            let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            mgr.update_metadata("room:a", |m| {
                m.insert("routing_tier".into(), "complex".into());
            });
        }
        {
            let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();
            let session = mgr.get_or_create("room:a");
            assert_eq!(
                session.metadata.get("routing_tier").map(|s| s.as_str()),
                Some("complex")
            );
        }
    }

    #[test]
    fn test_list_sessions() {
        let dir = tempdir().unwrap();
        let mgr = RoomSessionManager::new(Some(dir.path().to_path_buf())).unwrap();

        mgr.add_message("room:general", Message::user("a"));
        mgr.add_message("room:project-x", Message::user("b"));

        let sessions = mgr.list_sessions();
        assert_eq!(sessions.len(), 2);
        let keys: Vec<&str> = sessions.iter().map(|s| s.key.as_str()).collect();
        assert!(keys.contains(&"room:general"));
        assert!(keys.contains(&"room:project-x"));
    }

    #[test]
    fn test_multiple_sessions_independent() {
        let (mgr, _dir) = make_manager();
        mgr.add_message("room:a", Message::user("hello a"));
        mgr.add_message("room:b", Message::user("hello b"));
        mgr.add_message("room:b", Message::user("hello b again"));

        assert_eq!(mgr.get_history("room:a", 50).len(), 1);
        assert_eq!(mgr.get_history("room:b", 50).len(), 2);
    }
}
