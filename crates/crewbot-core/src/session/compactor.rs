//! Long-conversation compaction.
//!
//! When a session's estimated token count approaches the context
//! ceiling, the prefix before a safe boundary is replaced by one
//! synthetic assistant summary message. The cut point is chosen so no
//! assistant tool call is ever separated from its matching tool result.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::session::manager::safe_compaction_point;
use crate::types::{Message, MessageContent, Session};
use crate::utils::estimate_tokens;

/// Session metadata key where the latest compaction stats are recorded.
pub const LAST_COMPACTION_KEY: &str = "last_compaction";

/// Configuration for the session compactor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Context ceiling in tokens for the target model family.
    pub max_context_tokens: usize,
    /// Fraction of the ceiling that triggers compaction.
    pub compact_threshold: f64,
    /// How many recent messages to try to keep verbatim.
    pub target_keep: usize,
    /// How many trailing messages the memory flush hook scans.
    pub flush_window: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_context_tokens: 100_000,
            compact_threshold: 0.8,
            target_keep: 30,
            flush_window: 10,
        }
    }
}

/// Outcome of one compaction pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactionResult {
    pub original_count: usize,
    pub compacted_count: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub mode: String,
}

impl CompactionResult {
    /// Fraction of messages removed.
    pub fn compaction_ratio(&self) -> f64 {
        if self.original_count == 0 {
            return 0.0;
        }
        1.0 - self.compacted_count as f64 / self.original_count as f64
    }
}

/// Pre-compaction hook: the memory layer scans recent user messages for
/// feedback and refreshes aggregated preferences. Failures are logged
/// and ignored — the hook must never fail the compaction.
pub trait MemoryFlushHook: Send + Sync {
    fn flush(&self, recent_messages: &[Message]) -> anyhow::Result<()>;
}

/// Compacts long sessions at tool-chain-safe boundaries.
pub struct SessionCompactor {
    config: CompactionConfig,
}

impl SessionCompactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Whether the session has grown past the compaction threshold.
    pub fn should_compact(&self, messages: &[Message]) -> bool {
        if !self.config.enabled {
            return false;
        }
        let tokens = total_tokens(messages);
        tokens as f64 >= self.config.max_context_tokens as f64 * self.config.compact_threshold
    }

    /// Compact a session in place.
    ///
    /// 1. Run the memory flush hook over the trailing window.
    /// 2. Cut at the safe compaction index; everything before it becomes
    ///    a single synthetic assistant summary message.
    /// 3. Record stats in session metadata for the next response's UX.
    pub fn compact(
        &self,
        session: &mut Session,
        hook: Option<&dyn MemoryFlushHook>,
    ) -> CompactionResult {
        let tokens_before = total_tokens(&session.messages);
        let original_count = session.messages.len();

        if let Some(hook) = hook {
            let start = session.messages.len().saturating_sub(self.config.flush_window);
            if let Err(e) = hook.flush(&session.messages[start..]) {
                warn!(error = %e, "memory flush hook failed, continuing compaction");
            }
        }

        let cut = safe_compaction_point(&session.messages, self.config.target_keep);
        if cut == 0 {
            let result = CompactionResult {
                original_count,
                compacted_count: original_count,
                tokens_before,
                tokens_after: tokens_before,
                mode: "skipped".to_string(),
            };
            self.record(session, &result);
            return result;
        }

        let summary = summarize_elided(&session.messages[..cut]);
        let mut compacted = Vec::with_capacity(session.messages.len() - cut + 1);
        compacted.push(Message::assistant(summary));
        compacted.extend_from_slice(&session.messages[cut..]);
        session.messages = compacted;

        let tokens_after = total_tokens(&session.messages);
        let result = CompactionResult {
            original_count,
            compacted_count: session.messages.len(),
            tokens_before,
            tokens_after,
            mode: "summary".to_string(),
        };

        info!(
            original = result.original_count,
            compacted = result.compacted_count,
            tokens_before = result.tokens_before,
            tokens_after = result.tokens_after,
            "session compacted"
        );
        self.record(session, &result);
        result
    }

    fn record(&self, session: &mut Session, result: &CompactionResult) {
        if let Ok(json) = serde_json::to_string(result) {
            session.metadata.insert(LAST_COMPACTION_KEY.to_string(), json);
        }
        session.updated_at = chrono::Utc::now();
    }
}

/// Estimated token count of a message list.
pub fn total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

fn message_tokens(msg: &Message) -> usize {
    let text_len = match msg {
        Message::System { content } => estimate_tokens(content),
        Message::User { content } => match content {
            MessageContent::Text(text) => estimate_tokens(text),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    crate::types::ContentPart::Text { text } => estimate_tokens(text),
                    // Inline images dominate; approximate a fixed budget.
                    crate::types::ContentPart::ImageUrl { .. } => 1000,
                })
                .sum::<usize>(),
        },
        Message::Assistant {
            content,
            tool_calls,
            reasoning_content,
        } => {
            estimate_tokens(content.as_deref().unwrap_or(""))
                + estimate_tokens(reasoning_content.as_deref().unwrap_or(""))
                + tool_calls
                    .as_ref()
                    .map(|calls| {
                        calls
                            .iter()
                            .map(|c| estimate_tokens(&c.function.arguments) + 10)
                            .sum::<usize>()
                    })
                    .unwrap_or(0)
        }
        Message::Tool { content, .. } => estimate_tokens(content),
    };
    // Per-message framing overhead.
    text_len + 4
}

/// Build the synthetic summary for an elided prefix.
fn summarize_elided(elided: &[Message]) -> String {
    let user_count = elided.iter().filter(|m| m.role() == "user").count();
    let assistant_count = elided.iter().filter(|m| m.role() == "assistant").count();
    let tool_count = elided.iter().filter(|m| m.role() == "tool").count();

    let mut topics: Vec<String> = Vec::new();
    for msg in elided {
        if let Message::User {
            content: MessageContent::Text(text),
        } = msg
        {
            let first_line = text.lines().next().unwrap_or("").trim();
            if !first_line.is_empty() {
                topics.push(crate::utils::truncate_string(first_line, 80));
            }
        }
        if topics.len() >= 5 {
            break;
        }
    }

    let mut summary = format!(
        "[Earlier conversation compacted: {} user message(s), {} assistant message(s), {} tool result(s).]",
        user_count, assistant_count, tool_count
    );
    if !topics.is_empty() {
        summary.push_str("\nTopics discussed:\n");
        for topic in topics {
            summary.push_str(&format!("- {}\n", topic));
        }
    }
    summary
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn long_session(pairs: usize) -> Session {
        let mut session = Session::new("room:general");
        for i in 0..pairs {
            session.messages.push(Message::user(format!("question number {}", i)));
            session
                .messages
                .push(Message::assistant(format!("answer number {}", i)));
        }
        session
    }

    fn tiny_compactor(target_keep: usize) -> SessionCompactor {
        SessionCompactor::new(CompactionConfig {
            enabled: true,
            max_context_tokens: 100,
            compact_threshold: 0.5,
            target_keep,
            flush_window: 10,
        })
    }

    #[test]
    fn test_should_compact_thresholds() {
        let compactor = tiny_compactor(4);
        let short = long_session(1);
        assert!(!compactor.should_compact(&short.messages));

        let long = long_session(50);
        assert!(compactor.should_compact(&long.messages));
    }

    #[test]
    fn test_disabled_never_compacts() {
        let compactor = SessionCompactor::new(CompactionConfig {
            enabled: false,
            ..Default::default()
        });
        let long = long_session(500);
        assert!(!compactor.should_compact(&long.messages));
    }

    #[test]
    fn test_compact_replaces_prefix_with_summary() {
        let compactor = tiny_compactor(4);
        let mut session = long_session(20);
        let before = session.messages.len();

        let result = compactor.compact(&mut session, None);

        assert_eq!(result.mode, "summary");
        assert_eq!(result.original_count, before);
        assert!(session.messages.len() < before);
        assert!(result.tokens_after < result.tokens_before);

        // First message is the synthetic assistant summary.
        match &session.messages[0] {
            Message::Assistant { content, .. } => {
                assert!(content.as_ref().unwrap().contains("compacted"));
            }
            other => panic!("expected assistant summary, got {:?}", other),
        }
    }

    #[test]
    fn test_compact_records_metadata() {
        let compactor = tiny_compactor(4);
        let mut session = long_session(20);
        compactor.compact(&mut session, None);

        let stats = session.metadata.get(LAST_COMPACTION_KEY).unwrap();
        let parsed: CompactionResult = serde_json::from_str(stats).unwrap();
        assert_eq!(parsed.mode, "summary");
        assert!(parsed.compaction_ratio() > 0.0);
    }

    #[test]
    fn test_compact_preserves_tool_chain() {
        // Session with a tool pair in the middle; compaction must keep
        // the pair together (either both elided or both kept).
        let compactor = tiny_compactor(6);
        let mut session = long_session(10);
        session.messages.insert(
            15,
            Message::assistant_tool_calls(vec![ToolCall::new("T1", "exec", "{}")]),
        );
        session.messages.insert(16, Message::tool_result("T1", "ok"));

        compactor.compact(&mut session, None);

        let has_call = session
            .messages
            .iter()
            .any(|m| m.tool_call_ids().contains(&"T1"));
        let has_result = session
            .messages
            .iter()
            .any(|m| m.answered_tool_call_id() == Some("T1"));
        assert_eq!(has_call, has_result);
    }

    #[test]
    fn test_flush_hook_runs_and_errors_are_swallowed() {
        struct CountingHook {
            calls: AtomicUsize,
        }
        impl MemoryFlushHook for CountingHook {
            fn flush(&self, recent: &[Message]) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                assert!(recent.len() <= 10);
                anyhow::bail!("flush exploded")
            }
        }

        let hook = CountingHook {
            calls: AtomicUsize::new(0),
        };
        let compactor = tiny_compactor(4);
        let mut session = long_session(20);

        // Hook failure must not prevent compaction.
        let result = compactor.compact(&mut session, Some(&hook));
        assert_eq!(result.mode, "summary");
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_safe_boundary_skips() {
        let compactor = tiny_compactor(50);
        let mut session = long_session(3);
        let result = compactor.compact(&mut session, None);
        assert_eq!(result.mode, "skipped");
        assert_eq!(session.messages.len(), 6);
    }

    #[test]
    fn test_summary_mentions_topics() {
        let mut elided = vec![Message::user("Plan the product launch for March")];
        elided.push(Message::assistant("Sure, here's a plan."));
        let summary = summarize_elided(&elided);
        assert!(summary.contains("Plan the product launch"));
        assert!(summary.contains("1 user message"));
    }

    #[test]
    fn test_total_tokens_monotonic() {
        let short = long_session(1);
        let long = long_session(10);
        assert!(total_tokens(&long.messages) > total_tokens(&short.messages));
    }
}
