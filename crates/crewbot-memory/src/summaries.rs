//! Summary tree maintenance: stale nodes refresh lazily, in bounded
//! batches, from the events recorded since their last update.

use chrono::Utc;
use tracing::{debug, info};

use crate::models::SummaryNode;
use crate::store::MemoryStore;

/// Statistics from one refresh pass.
#[derive(Debug, Default)]
pub struct RefreshStats {
    pub checked: usize,
    pub refreshed: usize,
}

/// Refreshes summary nodes whose `events_since_update` crossed the
/// staleness threshold.
pub struct SummaryTreeManager<'a> {
    store: &'a MemoryStore,
    staleness_threshold: i64,
    max_refresh_batch: usize,
}

impl<'a> SummaryTreeManager<'a> {
    pub fn new(store: &'a MemoryStore, staleness_threshold: i64, max_refresh_batch: usize) -> Self {
        SummaryTreeManager {
            store,
            staleness_threshold,
            max_refresh_batch,
        }
    }

    /// Get or create a session summary node for a session key.
    pub fn ensure_session_node(&self, session_key: &str) -> anyhow::Result<SummaryNode> {
        let key = format!("session:{session_key}");
        if let Some(node) = self.store.get_summary_node(&key)? {
            return Ok(node);
        }
        let node = SummaryNode::new("session", &key);
        self.store.save_summary_node(&node)?;
        Ok(node)
    }

    /// Mark a session node as having seen one more event.
    pub fn note_event(&self, session_key: &str) -> anyhow::Result<()> {
        self.ensure_session_node(session_key)?;
        self.store
            .increment_summary_staleness(&format!("session:{session_key}"))
    }

    /// Refresh all stale nodes, up to the batch cap.
    pub fn refresh_all_stale(&self) -> anyhow::Result<RefreshStats> {
        let stale = self
            .store
            .get_stale_summary_nodes(self.staleness_threshold, self.max_refresh_batch)?;

        let mut stats = RefreshStats {
            checked: stale.len(),
            ..Default::default()
        };

        for mut node in stale {
            self.refresh_node(&mut node)?;
            stats.refreshed += 1;
        }

        if stats.refreshed > 0 {
            info!(refreshed = stats.refreshed, "summary nodes refreshed");
        }
        Ok(stats)
    }

    /// Rebuild one node's digest from its recent events.
    fn refresh_node(&self, node: &mut SummaryNode) -> anyhow::Result<()> {
        if let Some(session_key) = node.key.strip_prefix("session:") {
            let events = self.store.get_events_by_session(session_key, 50, 0)?;
            let inbound = events.iter().filter(|e| e.direction == "inbound").count();
            let outbound = events.len() - inbound;

            let mut recent_lines: Vec<String> = events
                .iter()
                .take(5)
                .map(|e| {
                    let first_line = e.content.lines().next().unwrap_or("");
                    format!("- {}", crewbot_core::utils::truncate_string(first_line, 80))
                })
                .collect();
            recent_lines.reverse();

            node.summary = format!(
                "{} events ({} inbound, {} outbound). Recent:\n{}",
                events.len(),
                inbound,
                outbound,
                recent_lines.join("\n")
            );
        }

        node.events_since_update = 0;
        node.last_updated = Some(Utc::now());
        self.store.save_summary_node(node)?;
        debug!(key = %node.key, "summary node refreshed");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Event;
    use tempfile::tempdir;

    fn make_store() -> (MemoryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = MemoryStore::open_at(&dir.path().join("memory.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_ensure_session_node_idempotent() {
        let (store, _dir) = make_store();
        let manager = SummaryTreeManager::new(&store, 10, 20);

        let first = manager.ensure_session_node("room:general").unwrap();
        let second = manager.ensure_session_node("room:general").unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(first.key, "session:room:general");
    }

    #[test]
    fn test_note_event_increments_staleness() {
        let (store, _dir) = make_store();
        let manager = SummaryTreeManager::new(&store, 10, 20);

        for _ in 0..3 {
            manager.note_event("room:general").unwrap();
        }
        let node = store.get_summary_node("session:room:general").unwrap().unwrap();
        assert_eq!(node.events_since_update, 3);
    }

    #[test]
    fn test_refresh_skips_fresh_nodes() {
        let (store, _dir) = make_store();
        let manager = SummaryTreeManager::new(&store, 10, 20);

        manager.note_event("room:general").unwrap();
        let stats = manager.refresh_all_stale().unwrap();
        assert_eq!(stats.refreshed, 0);
    }

    #[test]
    fn test_refresh_rebuilds_stale_node() {
        let (store, _dir) = make_store();
        let manager = SummaryTreeManager::new(&store, 3, 20);

        for i in 0..4 {
            store
                .save_event(&Event::new(
                    "cli",
                    "inbound",
                    "message",
                    format!("planning item {i}"),
                    "room:general",
                ))
                .unwrap();
            manager.note_event("room:general").unwrap();
        }

        let stats = manager.refresh_all_stale().unwrap();
        assert_eq!(stats.refreshed, 1);

        let node = store.get_summary_node("session:room:general").unwrap().unwrap();
        assert_eq!(node.events_since_update, 0);
        assert!(node.summary.contains("4 events"));
        assert!(node.summary.contains("planning item"));
    }

    #[test]
    fn test_refresh_respects_batch_cap() {
        let (store, _dir) = make_store();
        let manager = SummaryTreeManager::new(&store, 1, 2);

        for room in ["a", "b", "c"] {
            manager.note_event(&format!("room:{room}")).unwrap();
            manager.note_event(&format!("room:{room}")).unwrap();
        }

        let stats = manager.refresh_all_stale().unwrap();
        assert_eq!(stats.refreshed, 2);
    }
}
