//! The routing stage — glue between the classifier layers, the tier →
//! model mapping, and the calibration loop.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crewbot_core::config::schema::RoutingConfig;
use crewbot_core::types::Session;
use crewbot_providers::traits::LlmProvider;

use crate::calibration::{CalibrationManager, ClassificationRecord};
use crate::classifier::ClientSideClassifier;
use crate::llm::LlmRouter;
use crate::models::RoutingDecision;
use crate::sticky::StickyRouter;

/// Calibration due-ness is only checked every N routing decisions to
/// bound overhead.
const CALIBRATION_CHECK_INTERVAL: u64 = 100;

/// The model chosen for one message, with its fallback.
#[derive(Clone, Debug)]
pub struct ModelSelection {
    pub model: String,
    pub secondary_model: Option<String>,
    pub decision: RoutingDecision,
}

/// Pipeline stage for intelligent model routing.
pub struct RoutingStage {
    config: RoutingConfig,
    sticky: StickyRouter,
    calibration: Option<Arc<CalibrationManager>>,
    check_counter: AtomicU64,
}

impl RoutingStage {
    /// Build the stage from config. `workspace` locates the patterns and
    /// analytics files; `provider` enables the LLM fallback layer.
    pub fn new(
        config: RoutingConfig,
        provider: Option<Arc<dyn LlmProvider>>,
        workspace: Option<&Path>,
    ) -> Self {
        let patterns_file = workspace.map(|w| w.join("memory").join("ROUTING_PATTERNS.json"));

        let classifier = ClientSideClassifier::new(
            patterns_file.clone(),
            config.client_classifier.min_confidence,
        );

        let llm_router = provider.map(|p| {
            LlmRouter::new(
                p,
                config.llm_classifier.model.clone(),
                config.llm_classifier.timeout_ms,
                config.llm_classifier.secondary_model.clone(),
            )
        });

        let sticky = StickyRouter::new(
            classifier,
            llm_router,
            config.sticky.context_window,
            config.sticky.downgrade_confidence,
        );

        let calibration = match (&patterns_file, workspace) {
            (Some(patterns), Some(w)) if config.auto_calibration.enabled => {
                Some(Arc::new(CalibrationManager::new(
                    patterns.clone(),
                    w.join("analytics").join("routing_stats.json"),
                    &config.auto_calibration,
                )))
            }
            _ => None,
        };

        RoutingStage {
            config,
            sticky,
            calibration,
            check_counter: AtomicU64::new(0),
        }
    }

    /// Whether routing is enabled at all.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Route one message: classify with sticky retention, map the tier
    /// to its configured model pair, record for calibration, and run a
    /// throttled calibration check.
    pub async fn select_model(&self, content: &str, session: &mut Session) -> ModelSelection {
        let mut decision = self.sticky.classify(content, session).await;

        let (model, secondary) = match self.config.tiers.get(decision.tier.as_str()) {
            Some(tier_config) => (tier_config.model.clone(), tier_config.secondary_model.clone()),
            None => (String::new(), None),
        };
        decision.model = model.clone();

        session
            .metadata
            .insert("routing_confidence".into(), format!("{:.3}", decision.confidence));
        session
            .metadata
            .insert("routing_layer".into(), decision.layer.to_string());

        if let Some(calibration) = &self.calibration {
            calibration.record_classification(build_record(content, &decision));

            let count = self.check_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if count % CALIBRATION_CHECK_INTERVAL == 0 && calibration.should_calibrate() {
                debug!("running routing auto-calibration");
                let calibration = calibration.clone();
                tokio::task::spawn_blocking(move || {
                    calibration.calibrate();
                });
            }
        }

        ModelSelection {
            model,
            secondary_model: secondary,
            decision,
        }
    }

    /// Current routing configuration and stats, for status surfaces.
    pub fn routing_info(&self) -> serde_json::Value {
        let tiers: serde_json::Map<String, serde_json::Value> =
            ["simple", "medium", "complex", "reasoning", "coding"]
                .iter()
                .filter_map(|name| {
                    self.config.tiers.get(name).map(|t| {
                        (
                            name.to_string(),
                            serde_json::json!({
                                "model": t.model,
                                "costPerMtok": t.cost_per_mtok,
                                "secondaryModel": t.secondary_model,
                            }),
                        )
                    })
                })
                .collect();

        let mut info = serde_json::json!({
            "enabled": self.config.enabled,
            "tiers": tiers,
            "clientConfidenceThreshold": self.config.client_classifier.min_confidence,
            "llmClassifier": {
                "model": self.config.llm_classifier.model,
                "timeoutMs": self.config.llm_classifier.timeout_ms,
            },
            "sticky": {
                "contextWindow": self.config.sticky.context_window,
                "downgradeConfidence": self.config.sticky.downgrade_confidence,
            },
        });

        if let Some(calibration) = &self.calibration {
            info["calibration"] = serde_json::json!({
                "enabled": self.config.auto_calibration.enabled,
                "interval": self.config.auto_calibration.interval,
                "lastRun": calibration.last_calibration(),
                "totalClassifications": calibration.record_count(),
            });
        }

        info
    }
}

/// Build a calibration record from a decision's metadata.
fn build_record(content: &str, decision: &RoutingDecision) -> ClassificationRecord {
    let comparison = decision.metadata.get("feedback_comparison");
    let get_str = |key: &str| {
        comparison
            .and_then(|c| c.get(key))
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    let get_f64 = |key: &str| comparison.and_then(|c| c.get(key)).and_then(|v| v.as_f64());

    ClassificationRecord {
        content_preview: content.chars().take(200).collect(),
        final_tier: decision.tier.as_str().to_string(),
        final_confidence: decision.confidence,
        layer: decision.layer.to_string(),
        action_type: decision
            .metadata
            .get("action_type")
            .and_then(|v| v.as_str())
            .map(String::from),
        has_negations: decision
            .metadata
            .get("has_negations")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        content_length: content.len(),
        client_tier: get_str("client_tier"),
        client_confidence: get_f64("client_confidence"),
        llm_tier: get_str("llm_tier"),
        llm_confidence: get_f64("llm_confidence"),
        timestamp: None,
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
