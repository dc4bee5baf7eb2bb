//! Bot profiles — the crew of specialists and their tool permissions.
//!
//! Each bot has a personality blurb (optionally overridden by
//! `bots/<name>/SOUL.md` in the workspace), a tool allow/deny policy,
//! and a reasoning configuration gating chain-of-thought reflection.

use std::collections::HashMap;

use crate::reasoning::ReasoningConfig;

/// One bot's static profile.
#[derive(Clone, Debug)]
pub struct BotProfile {
    pub name: String,
    /// Short personality description injected into the system prompt.
    pub personality: String,
    /// Tools this bot may use. Empty = all registered tools.
    pub allowed_tools: Vec<String>,
    /// Tools this bot must never use, applied after the allow list.
    pub denied_tools: Vec<String>,
    pub reasoning: ReasoningConfig,
}

impl BotProfile {
    pub fn new(name: impl Into<String>, personality: impl Into<String>) -> Self {
        BotProfile {
            name: name.into(),
            personality: personality.into(),
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            reasoning: ReasoningConfig::default(),
        }
    }

    fn with_allowed(mut self, tools: &[&str]) -> Self {
        self.allowed_tools = tools.iter().map(|s| s.to_string()).collect();
        self
    }

    fn with_denied(mut self, tools: &[&str]) -> Self {
        self.denied_tools = tools.iter().map(|s| s.to_string()).collect();
        self
    }

    fn with_reasoning(mut self, reasoning: ReasoningConfig) -> Self {
        self.reasoning = reasoning;
        self
    }

    /// Resolve this bot's permitted tools from the full registry list:
    /// `allowed ∩ all` minus `denied`.
    pub fn permitted_tools(&self, all_tools: &[String]) -> Vec<String> {
        let mut permitted: Vec<String> = if self.allowed_tools.is_empty() {
            all_tools.to_vec()
        } else {
            all_tools
                .iter()
                .filter(|t| self.allowed_tools.contains(t))
                .cloned()
                .collect()
        };
        permitted.retain(|t| !self.denied_tools.contains(t));
        permitted
    }
}

/// Registry of the crew, keyed by lowercase bot name.
pub struct BotRegistry {
    leader: String,
    bots: HashMap<String, BotProfile>,
}

impl BotRegistry {
    /// Build the default crew around a leader name.
    pub fn with_defaults(leader: impl Into<String>) -> Self {
        let leader = leader.into();
        let mut bots = HashMap::new();

        bots.insert(
            leader.clone(),
            BotProfile::new(
                &leader,
                "The coordinator. Keeps the room organized, delegates to \
                 specialists, and answers directly when no specialist fits.",
            )
            .with_reasoning(ReasoningConfig::for_coordinator()),
        );
        bots.insert(
            "coder".to_string(),
            BotProfile::new(
                "coder",
                "A pragmatic software engineer. Writes, reviews, and debugs code.",
            )
            .with_reasoning(ReasoningConfig::for_specialist()),
        );
        bots.insert(
            "researcher".to_string(),
            BotProfile::new(
                "researcher",
                "A thorough analyst. Finds, verifies, and summarizes information.",
            )
            .with_allowed(&[
                "web_search",
                "web_fetch",
                "read_file",
                "search_memory",
                "recall",
                "get_entity",
                "get_relationships",
            ]),
        );
        bots.insert(
            "creative".to_string(),
            BotProfile::new(
                "creative",
                "A writer and designer. Drafts copy, names things, and shapes tone.",
            )
            .with_denied(&["exec"]),
        );
        bots.insert(
            "social".to_string(),
            BotProfile::new(
                "social",
                "A communications specialist. Writes posts and announcements.",
            )
            .with_denied(&["exec", "write_file", "edit_file"]),
        );
        bots.insert(
            "auditor".to_string(),
            BotProfile::new(
                "auditor",
                "A careful reviewer. Checks work for errors, risks, and gaps.",
            )
            .with_denied(&["write_file", "edit_file", "exec"])
            .with_reasoning(ReasoningConfig::for_specialist()),
        );

        BotRegistry { leader, bots }
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    pub fn get(&self, name: &str) -> Option<&BotProfile> {
        self.bots.get(&name.to_lowercase())
    }

    /// The leader's profile (always present).
    pub fn leader_profile(&self) -> &BotProfile {
        self.bots.get(&self.leader).expect("leader profile exists")
    }

    /// Profile for a name, falling back to the leader.
    pub fn get_or_leader(&self, name: &str) -> &BotProfile {
        self.get(name).unwrap_or_else(|| self.leader_profile())
    }

    pub fn bot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bots.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
