//! Bot dispatch — deciding which bots participate in a message.
//!
//! Rules, in order: DMs go straight to their target; an explicit
//! `@mention` overrides (`@all` fans out through the leader, a named
//! bot is addressed directly); everything else is leader-first with the
//! remaining room participants as secondaries.

use regex::Regex;

use crewbot_core::room::Room;

/// How a message was routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Leader answers first, secondaries may be consulted.
    LeaderFirst,
    /// A specific bot was mentioned and handles it alone.
    DirectBot,
    /// Direct message to one bot.
    Dm,
}

/// Result of dispatching one message.
#[derive(Clone, Debug)]
pub struct DispatchResult {
    pub target: DispatchTarget,
    pub primary_bot: String,
    pub secondary_bots: Vec<String>,
    pub room_id: Option<String>,
}

/// Routes messages to bots within a room.
pub struct BotDispatch {
    leader: String,
    mention_regex: Regex,
}

impl BotDispatch {
    pub fn new(leader: impl Into<String>) -> Self {
        BotDispatch {
            leader: leader.into(),
            mention_regex: Regex::new(r"@([A-Za-z0-9_-]+)").unwrap(),
        }
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    /// Resolve the participants for one message.
    pub fn dispatch(
        &self,
        content: &str,
        room: Option<&Room>,
        is_dm: bool,
        dm_target: Option<&str>,
    ) -> DispatchResult {
        // 1. DMs bypass the room entirely.
        if is_dm {
            let primary = dm_target.unwrap_or(self.leader.as_str()).to_lowercase();
            return DispatchResult {
                target: DispatchTarget::Dm,
                primary_bot: primary,
                secondary_bots: Vec::new(),
                room_id: None,
            };
        }

        let participants: Vec<String> = room
            .map(|r| r.participants.iter().map(|p| p.to_lowercase()).collect())
            .unwrap_or_else(|| vec![self.leader.clone()]);
        let room_id = room.map(|r| r.id.clone());

        // 2. Explicit mention override.
        if let Some(mention) = self.extract_mention(content) {
            if mention == "all" {
                let secondaries = participants
                    .iter()
                    .filter(|p| **p != self.leader)
                    .cloned()
                    .collect();
                return DispatchResult {
                    target: DispatchTarget::LeaderFirst,
                    primary_bot: self.leader.clone(),
                    secondary_bots: secondaries,
                    room_id,
                };
            }

            if participants.iter().any(|p| *p == mention) {
                return DispatchResult {
                    target: DispatchTarget::DirectBot,
                    primary_bot: mention,
                    secondary_bots: Vec::new(),
                    room_id,
                };
            }
        }

        // 3. Default: leader first.
        let secondaries = participants
            .iter()
            .filter(|p| **p != self.leader)
            .cloned()
            .collect();
        DispatchResult {
            target: DispatchTarget::LeaderFirst,
            primary_bot: self.leader.clone(),
            secondary_bots: secondaries,
            room_id,
        }
    }

    /// Extract the first `@name` token, lowercased.
    pub fn extract_mention(&self, content: &str) -> Option<String> {
        self.mention_regex
            .captures(content)
            .map(|caps| caps[1].to_lowercase())
    }

    /// Heuristic: does this message ask the leader to spin up a room?
    ///
    /// Returns `(should_create, suggested_name, project_type)`.
    pub fn should_leader_create_room(&self, content: &str) -> (bool, Option<String>, Option<String>) {
        let lower = content.to_lowercase();

        let trigger = [
            "create a room",
            "create a workspace",
            "new project",
            "start a project",
            "set up a room",
        ]
        .iter()
        .find(|t| lower.contains(**t));

        let Some(trigger) = trigger else {
            return (false, None, None);
        };

        // Whatever follows the trigger phrase (minus filler) names it.
        let tail = lower
            .split_once(trigger)
            .map(|(_, rest)| rest)
            .unwrap_or("")
            .trim_start_matches([':', ' '])
            .trim_start_matches("for the ")
            .trim_start_matches("for ")
            .trim_start_matches("called ")
            .trim();
        let name = tail
            .split(['.', ',', '!', '?'])
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let project_type = detect_project_type(&lower);
        (true, name, Some(project_type.to_string()))
    }

    /// Which specialists a project of this kind needs.
    pub fn suggest_bots_for_project(&self, project_type: &str) -> Vec<String> {
        let mut bots = vec![self.leader.clone()];
        let extra: &[&str] = match project_type {
            "web" | "mobile" => &["coder", "creative"],
            "research" => &["researcher"],
            "marketing" => &["social", "creative"],
            "audit" => &["auditor"],
            _ => &["coder"],
        };
        bots.extend(extra.iter().map(|s| s.to_string()));
        bots
    }
}

fn detect_project_type(lower: &str) -> &'static str {
    if lower.contains("website") || lower.contains("web") || lower.contains("landing") {
        "web"
    } else if lower.contains("mobile") || lower.contains("app") {
        "mobile"
    } else if lower.contains("research") || lower.contains("study") {
        "research"
    } else if lower.contains("marketing") || lower.contains("campaign") || lower.contains("social")
    {
        "marketing"
    } else if lower.contains("audit") || lower.contains("review") {
        "audit"
    } else {
        "general"
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crewbot_core::room::RoomType;

    fn dispatch() -> BotDispatch {
        BotDispatch::new("crewbot")
    }

    fn sample_room() -> Room {
        Room::new(
            "test-project",
            RoomType::Project,
            vec!["crewbot".into(), "coder".into(), "creative".into()],
        )
    }

    // ── Leader-first ──

    #[test]
    fn test_default_message_goes_to_leader() {
        let result = dispatch().dispatch("Create a landing page", Some(&sample_room()), false, None);

        assert_eq!(result.target, DispatchTarget::LeaderFirst);
        assert_eq!(result.primary_bot, "crewbot");
        assert!(result.secondary_bots.contains(&"coder".to_string()));
        assert!(result.secondary_bots.contains(&"creative".to_string()));
        assert_eq!(result.room_id.as_deref(), Some("test-project"));
    }

    #[test]
    fn test_leader_alone_in_room() {
        let room = Room::new("solo", RoomType::Open, vec!["crewbot".into()]);
        let result = dispatch().dispatch("Hello", Some(&room), false, None);

        assert_eq!(result.primary_bot, "crewbot");
        assert!(result.secondary_bots.is_empty());
    }

    #[test]
    fn test_no_room_defaults_to_leader() {
        let result = dispatch().dispatch("Hello", None, false, None);
        assert_eq!(result.primary_bot, "crewbot");
        assert!(result.secondary_bots.is_empty());
        assert!(result.room_id.is_none());
    }

    // ── Direct mentions ──

    #[test]
    fn test_mention_bypasses_leader() {
        let result = dispatch().dispatch("@coder help me with this bug", Some(&sample_room()), false, None);

        assert_eq!(result.target, DispatchTarget::DirectBot);
        assert_eq!(result.primary_bot, "coder");
        assert!(result.secondary_bots.is_empty());
    }

    #[test]
    fn test_mention_case_insensitive() {
        let result = dispatch().dispatch("@CODER @coder @Coder", Some(&sample_room()), false, None);
        assert_eq!(result.primary_bot, "coder");
    }

    #[test]
    fn test_mention_all_includes_everyone() {
        let result = dispatch().dispatch("@all meeting in 5 minutes", Some(&sample_room()), false, None);

        assert_eq!(result.target, DispatchTarget::LeaderFirst);
        assert_eq!(result.primary_bot, "crewbot");
        assert!(result.secondary_bots.contains(&"coder".to_string()));
        assert!(result.secondary_bots.contains(&"creative".to_string()));
        assert!(!result.secondary_bots.contains(&"crewbot".to_string()));
    }

    #[test]
    fn test_mention_of_nonparticipant_falls_back_to_leader() {
        let result = dispatch().dispatch("@stranger can you help", Some(&sample_room()), false, None);
        assert_eq!(result.target, DispatchTarget::LeaderFirst);
        assert_eq!(result.primary_bot, "crewbot");
    }

    // ── DMs ──

    #[test]
    fn test_dm_bypasses_room() {
        let result = dispatch().dispatch("Help me code", None, true, Some("coder"));

        assert_eq!(result.target, DispatchTarget::Dm);
        assert_eq!(result.primary_bot, "coder");
        assert!(result.secondary_bots.is_empty());
        assert!(result.room_id.is_none());
    }

    #[test]
    fn test_dm_to_leader() {
        let result = dispatch().dispatch("What's the plan?", None, true, Some("crewbot"));
        assert_eq!(result.target, DispatchTarget::Dm);
        assert_eq!(result.primary_bot, "crewbot");
    }

    // ── Room creation detection ──

    #[test]
    fn test_detect_create_room() {
        let (should, name, project_type) =
            dispatch().should_leader_create_room("Create a workspace for the website");
        assert!(should);
        assert!(name.unwrap().contains("website"));
        assert_eq!(project_type.as_deref(), Some("web"));
    }

    #[test]
    fn test_detect_new_project() {
        let (should, name, project_type) =
            dispatch().should_leader_create_room("New project: mobile app");
        assert!(should);
        assert!(name.unwrap().contains("mobile app"));
        assert_eq!(project_type.as_deref(), Some("mobile"));
    }

    #[test]
    fn test_normal_message_no_room_creation() {
        let (should, name, _) = dispatch().should_leader_create_room("What's the weather today?");
        assert!(!should);
        assert!(name.is_none());
    }

    // ── Bot suggestions ──

    #[test]
    fn test_web_project_bots() {
        let bots = dispatch().suggest_bots_for_project("web");
        assert!(bots.contains(&"crewbot".to_string()));
        assert!(bots.contains(&"coder".to_string()));
        assert!(bots.contains(&"creative".to_string()));
    }

    #[test]
    fn test_research_project_bots() {
        let bots = dispatch().suggest_bots_for_project("research");
        assert!(bots.contains(&"researcher".to_string()));
    }

    #[test]
    fn test_marketing_project_bots() {
        let bots = dispatch().suggest_bots_for_project("marketing");
        assert!(bots.contains(&"social".to_string()));
        assert!(bots.contains(&"creative".to_string()));
    }

    #[test]
    fn test_audit_project_bots() {
        let bots = dispatch().suggest_bots_for_project("audit");
        assert!(bots.contains(&"auditor".to_string()));
    }

    // ── Mention extraction ──

    #[test]
    fn test_extract_mention() {
        let d = dispatch();
        assert_eq!(d.extract_mention("Hey @Coder help me"), Some("coder".into()));
        assert_eq!(d.extract_mention("Hello @all"), Some("all".into()));
        assert_eq!(d.extract_mention("Just a normal message"), None);
    }
}
