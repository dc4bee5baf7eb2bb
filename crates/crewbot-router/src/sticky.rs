//! Sticky routing — tier retention across a conversation.
//!
//! Once a conversation runs at an elevated tier (complex or reasoning),
//! follow-up messages stay there even when they classify as simple on
//! their own ("Thanks" after a debugging session should not bounce the
//! conversation down to a weak model). A downgrade only happens when the
//! message is explicitly simple, the classifier is confident, and the
//! content looks genuinely trivial.

use tracing::debug;

use crewbot_core::types::Session;

use crate::classifier::ClientSideClassifier;
use crate::llm::LlmRouter;
use crate::models::{ClassificationScores, RoutingDecision, RoutingTier};

/// Session metadata key holding the latest routing tier.
pub const ROUTING_TIER_KEY: &str = "routing_tier";
/// Session metadata key holding the bounded tier history (JSON array).
pub const ROUTING_TIERS_KEY: &str = "routing_tiers";

/// Combines the client classifier, the optional LLM fallback, and tier
/// retention into one routing decision per message.
pub struct StickyRouter {
    pub client_classifier: ClientSideClassifier,
    pub llm_router: Option<LlmRouter>,
    pub context_window: usize,
    pub downgrade_confidence: f64,
}

impl StickyRouter {
    pub fn new(
        client_classifier: ClientSideClassifier,
        llm_router: Option<LlmRouter>,
        context_window: usize,
        downgrade_confidence: f64,
    ) -> Self {
        StickyRouter {
            client_classifier,
            llm_router,
            context_window,
            downgrade_confidence,
        }
    }

    /// Classify a message in the context of its session, applying sticky
    /// retention, and record the chosen tier into session metadata.
    pub async fn classify(&self, content: &str, session: &mut Session) -> RoutingDecision {
        let (client_decision, scores) = self.client_classifier.classify(content);

        // Uncertain → consult the LLM classifier and record the comparison.
        let mut decision = if client_decision.confidence < self.client_classifier.min_confidence {
            match &self.llm_router {
                Some(llm) => {
                    let llm_decision = llm.classify(content).await;
                    let comparison = serde_json::json!({
                        "client_tier": client_decision.tier.as_str(),
                        "client_confidence": client_decision.confidence,
                        "llm_tier": llm_decision.tier.as_str(),
                        "llm_confidence": llm_decision.confidence,
                        "match": client_decision.tier == llm_decision.tier,
                    });
                    let mut merged = llm_decision;
                    merged
                        .metadata
                        .insert("feedback_comparison".to_string(), comparison);
                    merged
                }
                None => client_decision,
            }
        } else {
            client_decision
        };

        // Sticky retention against the recent tier history.
        let recent = self.recent_tiers(session);
        if let Some(elevated) = highest_elevated(&recent) {
            if !decision.tier.is_elevated() {
                let downgrade_allowed = decision.tier == RoutingTier::Simple
                    && decision.confidence >= self.downgrade_confidence
                    && self.should_downgrade(content, &scores);

                if downgrade_allowed {
                    debug!(tier = %decision.tier, "explicit downgrade from elevated conversation");
                    decision.metadata.insert(
                        "sticky_override".to_string(),
                        serde_json::Value::String("downgrade_allowed".to_string()),
                    );
                } else {
                    debug!(from = %decision.tier, to = %elevated, "sticky routing maintained elevated tier");
                    decision.tier = elevated;
                    decision
                        .metadata
                        .insert("sticky_maintained".to_string(), serde_json::Value::Bool(true));
                }
            }
        }

        self.record_tier(session, decision.tier);
        decision
    }

    /// The last `context_window` tiers observed in this session.
    pub fn recent_tiers(&self, session: &Session) -> Vec<RoutingTier> {
        let mut tiers: Vec<RoutingTier> = session
            .metadata
            .get(ROUTING_TIERS_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .map(|names| names.iter().filter_map(|n| RoutingTier::parse(n)).collect())
            .unwrap_or_default();

        // Older single-tier records still count.
        if tiers.is_empty() {
            if let Some(tier) = session
                .metadata
                .get(ROUTING_TIER_KEY)
                .and_then(|n| RoutingTier::parse(n))
            {
                tiers.push(tier);
            }
        }

        let len = tiers.len();
        if len > self.context_window {
            tiers.split_off(len - self.context_window)
        } else {
            tiers
        }
    }

    /// Heuristic gate for downgrading out of an elevated conversation:
    /// at least two of — short message, no technical terms, strongly
    /// simple indicators.
    pub fn should_downgrade(&self, content: &str, scores: &ClassificationScores) -> bool {
        let mut conditions = 0;
        if content.split_whitespace().count() <= 10 {
            conditions += 1;
        }
        if scores.technical_terms < 0.3 {
            conditions += 1;
        }
        if scores.simple_indicators >= 0.5 {
            conditions += 1;
        }
        conditions >= 2
    }

    /// Record the chosen tier into session metadata, bounding history.
    fn record_tier(&self, session: &mut Session, tier: RoutingTier) {
        session
            .metadata
            .insert(ROUTING_TIER_KEY.to_string(), tier.as_str().to_string());

        let mut history: Vec<String> = session
            .metadata
            .get(ROUTING_TIERS_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        history.push(tier.as_str().to_string());
        let keep = self.context_window.max(10);
        if history.len() > keep {
            let excess = history.len() - keep;
            history.drain(..excess);
        }
        if let Ok(raw) = serde_json::to_string(&history) {
            session.metadata.insert(ROUTING_TIERS_KEY.to_string(), raw);
        }
    }
}

/// The strongest elevated tier present, if any.
fn highest_elevated(tiers: &[RoutingTier]) -> Option<RoutingTier> {
    if tiers.contains(&RoutingTier::Reasoning) {
        Some(RoutingTier::Reasoning)
    } else if tiers.contains(&RoutingTier::Complex) {
        Some(RoutingTier::Complex)
    } else {
        None
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
