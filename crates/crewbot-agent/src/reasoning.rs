//! Per-bot reasoning configuration.
//!
//! Chain-of-thought reflection adds a user-role prompt between tool
//! executions, nudging the model to check its intermediate results.
//! It is gated twice: the bot must opt in, and the current routing tier
//! must be one where reflection pays for its tokens.

use crewbot_router::RoutingTier;

/// The reflection prompt inserted between tool results.
const REFLECTION_PROMPT: &str = "Before continuing, briefly check: did the last tool result \
     actually answer what you needed? If something looks off, adjust \
     your approach rather than repeating the same call.";

/// When a bot reflects between tool calls.
#[derive(Clone, Debug)]
pub struct ReasoningConfig {
    /// Master switch for CoT reflection.
    pub reflection_enabled: bool,
    /// Tiers where reflection applies.
    pub reflection_tiers: Vec<RoutingTier>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            reflection_enabled: false,
            reflection_tiers: Vec::new(),
        }
    }
}

impl ReasoningConfig {
    /// Coordinators reflect on the heavyweight tiers.
    pub fn for_coordinator() -> Self {
        Self {
            reflection_enabled: true,
            reflection_tiers: vec![RoutingTier::Complex, RoutingTier::Reasoning],
        }
    }

    /// Specialists also reflect while coding.
    pub fn for_specialist() -> Self {
        Self {
            reflection_enabled: true,
            reflection_tiers: vec![
                RoutingTier::Complex,
                RoutingTier::Reasoning,
                RoutingTier::Coding,
            ],
        }
    }

    /// The reflection prompt, when the config and tier call for one.
    pub fn reflection_prompt(&self, tier: RoutingTier) -> Option<&'static str> {
        if self.reflection_enabled && self.reflection_tiers.contains(&tier) {
            Some(REFLECTION_PROMPT)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_reflects() {
        let config = ReasoningConfig::default();
        for tier in [
            RoutingTier::Simple,
            RoutingTier::Medium,
            RoutingTier::Complex,
            RoutingTier::Reasoning,
            RoutingTier::Coding,
        ] {
            assert!(config.reflection_prompt(tier).is_none());
        }
    }

    #[test]
    fn test_coordinator_reflects_on_elevated_tiers() {
        let config = ReasoningConfig::for_coordinator();
        assert!(config.reflection_prompt(RoutingTier::Complex).is_some());
        assert!(config.reflection_prompt(RoutingTier::Reasoning).is_some());
        assert!(config.reflection_prompt(RoutingTier::Simple).is_none());
        assert!(config.reflection_prompt(RoutingTier::Coding).is_none());
    }

    #[test]
    fn test_specialist_reflects_while_coding() {
        let config = ReasoningConfig::for_specialist();
        assert!(config.reflection_prompt(RoutingTier::Coding).is_some());
    }

    #[test]
    fn test_disabled_overrides_tiers() {
        let mut config = ReasoningConfig::for_specialist();
        config.reflection_enabled = false;
        assert!(config.reflection_prompt(RoutingTier::Coding).is_none());
    }
}
