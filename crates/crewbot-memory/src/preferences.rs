//! User preference aggregation.
//!
//! Active learnings are compiled into the distinguished
//! `user_preferences` summary node so every prompt build can include a
//! compact personalization block.

use chrono::Utc;
use tracing::info;

use crate::models::{Learning, SummaryNode};
use crate::store::MemoryStore;

/// Key of the distinguished preferences node.
pub const USER_PREFERENCES_KEY: &str = "user_preferences";

const EMPTY_SUMMARY: &str = "No preferences learned yet.";

/// Aggregates learnings into the `user_preferences` summary node.
pub struct PreferencesAggregator<'a> {
    store: &'a MemoryStore,
    staleness_threshold: i64,
}

impl<'a> PreferencesAggregator<'a> {
    /// Create the aggregator, ensuring the preferences node exists.
    pub fn new(store: &'a MemoryStore, staleness_threshold: i64) -> anyhow::Result<Self> {
        let aggregator = PreferencesAggregator {
            store,
            staleness_threshold,
        };
        aggregator.ensure_node()?;
        Ok(aggregator)
    }

    fn ensure_node(&self) -> anyhow::Result<()> {
        if self.store.get_summary_node(USER_PREFERENCES_KEY)?.is_none() {
            let mut node = SummaryNode::new(USER_PREFERENCES_KEY, USER_PREFERENCES_KEY);
            node.summary = EMPTY_SUMMARY.to_string();
            self.store.save_summary_node(&node)?;
            info!("created user_preferences summary node");
        }
        Ok(())
    }

    /// Rebuild the preferences summary from all active learnings.
    pub fn aggregate(&self) -> anyhow::Result<SummaryNode> {
        let learnings = self.store.get_all_learnings(true)?;

        let summary = if learnings.is_empty() {
            EMPTY_SUMMARY.to_string()
        } else {
            build_summary(&learnings)
        };

        let mut node = self
            .store
            .get_summary_node(USER_PREFERENCES_KEY)?
            .unwrap_or_else(|| SummaryNode::new(USER_PREFERENCES_KEY, USER_PREFERENCES_KEY));
        node.summary = summary;
        node.events_since_update = 0;
        node.last_updated = Some(Utc::now());
        self.store.save_summary_node(&node)?;

        Ok(node)
    }

    /// Current preferences summary text.
    pub fn summary(&self) -> String {
        self.store
            .get_summary_node(USER_PREFERENCES_KEY)
            .ok()
            .flatten()
            .map(|n| n.summary)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| EMPTY_SUMMARY.to_string())
    }

    /// Refresh when enough new learnings accumulated since the last
    /// aggregation. Returns whether a refresh ran.
    pub fn refresh_if_stale(&self) -> anyhow::Result<bool> {
        let Some(node) = self.store.get_summary_node(USER_PREFERENCES_KEY)? else {
            return Ok(false);
        };
        if node.events_since_update >= self.staleness_threshold {
            self.aggregate()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Bump the staleness counter (call when a new learning is created).
    pub fn increment_staleness(&self) -> anyhow::Result<()> {
        self.store.increment_summary_staleness(USER_PREFERENCES_KEY)
    }

    /// Number of active learnings.
    pub fn preference_count(&self) -> anyhow::Result<usize> {
        Ok(self.store.get_all_learnings(true)?.len())
    }
}

/// Compile learnings into the markdown summary block.
fn build_summary(learnings: &[Learning]) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(format!("## User Preferences ({} learned)", learnings.len()));
    parts.push(String::new());

    let high_conf: Vec<&Learning> = learnings.iter().filter(|l| l.confidence >= 0.8).collect();
    if !high_conf.is_empty() {
        parts.push("### Confirmed Preferences".to_string());
        for learning in high_conf.iter().take(5) {
            parts.push(format!("• {}", learning.content));
        }
        parts.push(String::new());
    }

    for (category, keywords) in [
        ("Communication", &["response", "reply", "tone", "style", "write"][..]),
        ("Formatting", &["format", "markdown", "table", "indent", "syntax"][..]),
        ("Tools", &["tool", "command", "script", "search", "file"][..]),
        ("Workflow", &["workflow", "process", "step", "schedule", "organize"][..]),
    ] {
        let matching: Vec<&Learning> = learnings
            .iter()
            .filter(|l| {
                let lower = l.content.to_lowercase();
                keywords.iter().any(|k| lower.contains(k))
            })
            .collect();
        if !matching.is_empty() {
            parts.push(format!("### {}", category));
            for learning in matching.iter().take(3) {
                parts.push(format!("• {}", learning.content));
            }
            parts.push(String::new());
        }
    }

    let recommendations: Vec<&str> = learnings
        .iter()
        .filter_map(|l| l.recommendation.as_deref())
        .collect();
    if !recommendations.is_empty() {
        parts.push("### Key Recommendations".to_string());
        for rec in recommendations.iter().take(5) {
            parts.push(format!("• {}", rec));
        }
        parts.push(String::new());
    }

    let tool_prefs: Vec<&Learning> = learnings.iter().filter(|l| l.tool_name.is_some()).collect();
    if !tool_prefs.is_empty() {
        parts.push("### Tool Preferences".to_string());
        for learning in tool_prefs {
            parts.push(format!(
                "• {}: {}",
                learning.tool_name.as_deref().unwrap_or(""),
                learning.content
            ));
        }
        parts.push(String::new());
    }

    parts.join("\n")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
