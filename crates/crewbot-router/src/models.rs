//! Data models for the smart router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Tiers
// ─────────────────────────────────────────────

/// Capability tiers for model selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingTier {
    Simple,
    Medium,
    Complex,
    Reasoning,
    Coding,
}

impl RoutingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingTier::Simple => "simple",
            RoutingTier::Medium => "medium",
            RoutingTier::Complex => "complex",
            RoutingTier::Reasoning => "reasoning",
            RoutingTier::Coding => "coding",
        }
    }

    /// Parse a tier name (case-insensitive).
    pub fn parse(s: &str) -> Option<RoutingTier> {
        match s.to_lowercase().as_str() {
            "simple" => Some(RoutingTier::Simple),
            "medium" => Some(RoutingTier::Medium),
            "complex" => Some(RoutingTier::Complex),
            "reasoning" => Some(RoutingTier::Reasoning),
            "coding" => Some(RoutingTier::Coding),
            _ => None,
        }
    }

    /// Whether a conversation at this tier stays elevated under sticky
    /// routing.
    pub fn is_elevated(&self) -> bool {
        matches!(self, RoutingTier::Complex | RoutingTier::Reasoning)
    }
}

impl std::fmt::Display for RoutingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────
// Decisions
// ─────────────────────────────────────────────

/// Result of a routing classification.
#[derive(Clone, Debug)]
pub struct RoutingDecision {
    pub tier: RoutingTier,
    /// Filled from the tier config by the routing stage.
    pub model: String,
    pub confidence: f64,
    /// "client" or "llm".
    pub layer: &'static str,
    pub reasoning: String,
    pub estimated_tokens: u32,
    pub needs_tools: bool,
    /// Analytics metadata (scores, sticky flags, comparison data).
    pub metadata: HashMap<String, serde_json::Value>,
}

// ─────────────────────────────────────────────
// Dimension scores
// ─────────────────────────────────────────────

/// Scores from the 15-dimension classification system, each in [0, 1].
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClassificationScores {
    pub reasoning_markers: f64,
    pub code_presence: f64,
    pub simple_indicators: f64,
    pub multi_step_patterns: f64,
    pub technical_terms: f64,
    pub token_count: f64,
    pub creative_markers: f64,
    pub question_complexity: f64,
    pub constraint_count: f64,
    pub imperative_verbs: f64,
    pub output_format: f64,
    pub domain_specificity: f64,
    pub reference_complexity: f64,
    pub negation_complexity: f64,
    pub social_interaction: f64,
}

impl ClassificationScores {
    /// All (dimension name, score) pairs.
    pub fn entries(&self) -> [(&'static str, f64); 15] {
        [
            ("reasoning_markers", self.reasoning_markers),
            ("code_presence", self.code_presence),
            ("simple_indicators", self.simple_indicators),
            ("multi_step_patterns", self.multi_step_patterns),
            ("technical_terms", self.technical_terms),
            ("token_count", self.token_count),
            ("creative_markers", self.creative_markers),
            ("question_complexity", self.question_complexity),
            ("constraint_count", self.constraint_count),
            ("imperative_verbs", self.imperative_verbs),
            ("output_format", self.output_format),
            ("domain_specificity", self.domain_specificity),
            ("reference_complexity", self.reference_complexity),
            ("negation_complexity", self.negation_complexity),
            ("social_interaction", self.social_interaction),
        ]
    }

    /// Weighted sum across all dimensions.
    pub fn weighted_sum(&self, weights: &HashMap<&'static str, f64>) -> f64 {
        self.entries()
            .iter()
            .map(|(name, score)| score * weights.get(name).copied().unwrap_or(0.0))
            .sum()
    }
}

// ─────────────────────────────────────────────
// Patterns
// ─────────────────────────────────────────────

/// A learned pattern for client-side classification, with performance
/// tracking so calibration can evict what stopped working.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingPattern {
    pub regex: String,
    pub tier: RoutingTier,
    pub confidence: f64,
    #[serde(default)]
    pub examples: Vec<String>,
    pub added_at: DateTime<Utc>,

    #[serde(default)]
    pub times_used: u64,
    #[serde(default)]
    pub times_matched: u64,
    #[serde(default)]
    pub times_correct: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// "builtin", "auto_calibration", or "user_added".
    #[serde(default = "default_source")]
    pub source: String,
    /// Action type the pattern was learned under, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_context: Option<String>,
}

fn default_source() -> String {
    "builtin".to_string()
}

impl RoutingPattern {
    pub fn new(regex: impl Into<String>, tier: RoutingTier, confidence: f64) -> Self {
        RoutingPattern {
            regex: regex.into(),
            tier,
            confidence,
            examples: Vec::new(),
            added_at: Utc::now(),
            times_used: 0,
            times_matched: 0,
            times_correct: 0,
            last_used: None,
            source: "builtin".to_string(),
            action_context: None,
        }
    }

    /// Fraction of matches confirmed correct. 0 when never matched.
    pub fn success_rate(&self) -> f64 {
        if self.times_matched == 0 {
            return 0.0;
        }
        self.times_correct as f64 / self.times_matched as f64
    }

    /// Age in whole days since the pattern was added.
    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.added_at).num_days()
    }

    /// Whether the pattern should be kept. New patterns get a 7-day
    /// grace period; established ones need a 40 % success rate once
    /// matched at least 5 times.
    pub fn is_effective(&self) -> bool {
        if self.age_days() < 7 {
            return true;
        }
        if self.times_matched >= 5 {
            return self.success_rate() >= 0.4;
        }
        true
    }

    /// Effectiveness score 0–100: success rate (0–50), usage frequency
    /// (0–30), recency (0–20).
    pub fn effectiveness_score(&self) -> f64 {
        let mut score = self.success_rate() * 50.0;

        score += match self.times_used {
            n if n > 100 => 30.0,
            n if n > 50 => 20.0,
            n if n > 10 => 10.0,
            _ => 0.0,
        };

        if let Some(last) = self.last_used {
            let days_since = (Utc::now() - last).num_days();
            score += match days_since {
                d if d < 7 => 20.0,
                d if d < 30 => 10.0,
                d if d < 90 => 5.0,
                _ => 0.0,
            };
        }

        score
    }

    /// Record pattern usage for analytics.
    pub fn record_usage(&mut self, was_matched: bool, was_correct: bool) {
        self.times_used += 1;
        self.last_used = Some(Utc::now());
        if was_matched {
            self.times_matched += 1;
            if was_correct {
                self.times_correct += 1;
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
