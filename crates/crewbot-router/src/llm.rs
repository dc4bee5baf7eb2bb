//! LLM-assisted router for uncertain classifications.
//!
//! Only consulted when the client classifier's confidence falls below
//! the configured minimum. The call runs on a short timeout against a
//! cheap model, retries once on a secondary model, and degrades to a
//! MEDIUM decision when everything fails.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crewbot_core::types::Message;
use crewbot_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::models::{RoutingDecision, RoutingTier};

/// Classification prompt sent ahead of the user message.
const CLASSIFICATION_PROMPT: &str = r#"You are a routing classifier for an AI assistant.

Analyze the user's message and classify it into ONE of these tiers:

SIMPLE: Quick questions, facts, definitions, translations, simple calculations, casual conversation.
Examples: "What's 2+2?", "Define photosynthesis", "Translate hello to French"
Characteristics: Single answer, no reasoning needed, <50 tokens likely

MEDIUM: General coding tasks, file operations, web searches, explanations with examples, planning.
Examples: "Write a function to parse JSON", "Search for best practices", "Explain how async/await works"
Characteristics: Some context needed, may use tools, 50-200 tokens likely

COMPLEX: Multi-step reasoning, complex algorithms, large codebases, debugging tricky issues, architectural decisions.
Examples: "Debug why this distributed system is failing", "Design a database schema for this domain"
Characteristics: Deep analysis needed, multiple steps, 200-1000 tokens likely

REASONING: Formal proofs, mathematical derivations, step-by-step logical reasoning.
Examples: "Prove this theorem", "Analyze the time complexity"
Characteristics: Requires careful reasoning, chains of logic, >1000 tokens likely

Respond ONLY with a JSON object in this exact format:
{
    "tier": "SIMPLE|MEDIUM|COMPLEX|REASONING",
    "confidence": 0.0-1.0,
    "reasoning": "Brief explanation of why this tier was chosen",
    "estimated_tokens": 50|200|1000|2000,
    "needs_tools": true|false
}

User message to classify:
"#;

/// Raw JSON shape the classifier model is instructed to return.
#[derive(Debug, Deserialize)]
struct RawClassification {
    tier: String,
    confidence: f64,
    reasoning: String,
    estimated_tokens: i64,
    needs_tools: serde_json::Value,
}

/// LLM-assisted classification for uncertain cases.
pub struct LlmRouter {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
    secondary_model: Option<String>,
}

impl LlmRouter {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        timeout_ms: u64,
        secondary_model: Option<String>,
    ) -> Self {
        LlmRouter {
            provider,
            model: model.into(),
            timeout: Duration::from_millis(timeout_ms),
            secondary_model,
        }
    }

    /// Classify content with LLM assistance.
    pub async fn classify(&self, content: &str) -> RoutingDecision {
        match self.call_and_parse(content, &self.model).await {
            Ok(decision) => decision,
            Err(primary_err) => {
                warn!(error = %primary_err, model = %self.model, "LLM classification failed");

                if let Some(secondary) = &self.secondary_model {
                    match self.call_and_parse(content, secondary).await {
                        Ok(mut decision) => {
                            decision.metadata.insert(
                                "llm_secondary".into(),
                                serde_json::Value::String(secondary.clone()),
                            );
                            return decision;
                        }
                        Err(e) => {
                            warn!(error = %e, model = %secondary, "secondary LLM classification failed");
                        }
                    }
                }

                // Safe default: a capable middle tier.
                RoutingDecision {
                    tier: RoutingTier::Medium,
                    model: String::new(),
                    confidence: 0.5,
                    layer: "llm",
                    reasoning: format!(
                        "Error in LLM classification: {primary_err}. Defaulting to medium tier."
                    ),
                    estimated_tokens: 200,
                    needs_tools: true,
                    metadata: HashMap::from([(
                        "error".to_string(),
                        serde_json::Value::String(primary_err.to_string()),
                    )]),
                }
            }
        }
    }

    async fn call_and_parse(&self, content: &str, model: &str) -> anyhow::Result<RoutingDecision> {
        let messages = vec![
            Message::system("You are a routing classifier. Respond ONLY with valid JSON."),
            Message::user(format!("{CLASSIFICATION_PROMPT}{content}")),
        ];
        let config = LlmRequestConfig {
            max_tokens: 200,
            temperature: 0.1,
            timeout: Some(self.timeout),
            trace_id: None,
        };

        // The outer timeout backstops providers that ignore the budget.
        let response = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, None, model, &config),
        )
        .await
        .map_err(|_| anyhow::anyhow!("LLM classification timed out after {:?}", self.timeout))??;

        let text = response.content.unwrap_or_default();
        let (tier, confidence, reasoning, estimated_tokens, needs_tools) = parse_response(&text)?;

        debug!(tier = %tier, confidence, "LLM classification");

        Ok(RoutingDecision {
            tier,
            model: String::new(),
            confidence,
            layer: "llm",
            reasoning,
            estimated_tokens,
            needs_tools,
            metadata: HashMap::from([
                (
                    "llm_model".to_string(),
                    serde_json::Value::String(model.to_string()),
                ),
                ("raw_response".to_string(), serde_json::Value::String(text)),
            ]),
        })
    }
}

/// Parse and normalize the model's JSON response.
fn parse_response(content: &str) -> anyhow::Result<(RoutingTier, f64, String, u32, bool)> {
    let mut text = content.trim();

    // Strip markdown fences the model sometimes adds.
    if let Some(start) = text.find("```json") {
        text = &text[start + 7..];
        if let Some(end) = text.find("```") {
            text = &text[..end];
        }
    } else if let Some(start) = text.find("```") {
        text = &text[start + 3..];
        if let Some(end) = text.find("```") {
            text = &text[..end];
        }
    }

    let raw: RawClassification = serde_json::from_str(text.trim())?;

    let tier = RoutingTier::parse(&raw.tier)
        .ok_or_else(|| anyhow::anyhow!("invalid tier: {}", raw.tier))?;

    let confidence = raw.confidence.clamp(0.0, 1.0);

    // Normalize to the standard token buckets.
    let estimated_tokens = match raw.estimated_tokens {
        n if n <= 100 => 50,
        n if n <= 500 => 200,
        n if n <= 1500 => 1000,
        _ => 2000,
    };

    let needs_tools = match &raw.needs_tools {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    Ok((tier, confidence, raw.reasoning, estimated_tokens, needs_tools))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crewbot_core::types::{LlmResponse, ToolDefinition};
    use crewbot_providers::traits::ProviderError;

    struct CannedProvider {
        responses: std::sync::Mutex<Vec<Result<LlmResponse, ProviderError>>>,
        delay: Duration,
    }

    impl CannedProvider {
        fn new(responses: Vec<Result<LlmResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses),
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            tokio::time::sleep(self.delay).await;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(ProviderError::InvalidResponse("no more responses".into()))
            } else {
                responses.remove(0)
            }
        }

        fn default_model(&self) -> &str {
            "canned"
        }
        fn display_name(&self) -> &str {
            "Canned"
        }
    }

    fn json_response(body: &str) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse {
            content: Some(body.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_valid_classification() {
        let provider = CannedProvider::new(vec![json_response(
            r#"{"tier": "COMPLEX", "confidence": 0.92, "reasoning": "multi-step debugging", "estimated_tokens": 800, "needs_tools": true}"#,
        )]);
        let router = LlmRouter::new(provider, "mini", 500, None);

        let decision = router.classify("Debug this").await;
        assert_eq!(decision.tier, RoutingTier::Complex);
        assert_eq!(decision.layer, "llm");
        assert!((decision.confidence - 0.92).abs() < 1e-9);
        // 800 normalizes to the 1000 bucket.
        assert_eq!(decision.estimated_tokens, 1000);
        assert!(decision.needs_tools);
    }

    #[tokio::test]
    async fn test_markdown_wrapped_json() {
        let provider = CannedProvider::new(vec![json_response(
            "```json\n{\"tier\": \"simple\", \"confidence\": 0.8, \"reasoning\": \"greeting\", \"estimated_tokens\": 20, \"needs_tools\": false}\n```",
        )]);
        let router = LlmRouter::new(provider, "mini", 500, None);

        let decision = router.classify("hi").await;
        assert_eq!(decision.tier, RoutingTier::Simple);
        assert_eq!(decision.estimated_tokens, 50);
    }

    #[tokio::test]
    async fn test_garbage_falls_back_to_secondary() {
        let provider = CannedProvider::new(vec![
            json_response("definitely not json"),
            json_response(
                r#"{"tier": "MEDIUM", "confidence": 0.7, "reasoning": "ok", "estimated_tokens": 200, "needs_tools": false}"#,
            ),
        ]);
        let router = LlmRouter::new(provider, "mini", 500, Some("backup".into()));

        let decision = router.classify("something").await;
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert!(decision.metadata.contains_key("llm_secondary"));
    }

    #[tokio::test]
    async fn test_provider_error_falls_back_to_secondary() {
        let provider = CannedProvider::new(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            json_response(
                r#"{"tier": "SIMPLE", "confidence": 0.8, "reasoning": "ok", "estimated_tokens": 50, "needs_tools": false}"#,
            ),
        ]);
        let router = LlmRouter::new(provider, "mini", 500, Some("backup".into()));

        let decision = router.classify("hello").await;
        assert_eq!(decision.tier, RoutingTier::Simple);
        assert!(decision.metadata.contains_key("llm_secondary"));
    }

    #[tokio::test]
    async fn test_total_failure_defaults_to_medium() {
        let provider = CannedProvider::new(vec![
            json_response("garbage"),
            json_response("more garbage"),
        ]);
        let router = LlmRouter::new(provider, "mini", 500, Some("backup".into()));

        let decision = router.classify("something").await;
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
        assert_eq!(decision.layer, "llm");
        assert!(decision.metadata.contains_key("error"));
    }

    #[tokio::test]
    async fn test_timeout_triggers_fallback() {
        let provider = Arc::new(CannedProvider {
            responses: std::sync::Mutex::new(vec![json_response(
                r#"{"tier": "SIMPLE", "confidence": 0.9, "reasoning": "x", "estimated_tokens": 50, "needs_tools": false}"#,
            )]),
            delay: Duration::from_millis(200),
        });
        let router = LlmRouter::new(provider, "mini", 20, None);

        let decision = router.classify("hello").await;
        // The 20 ms budget expires before the 200 ms provider answers.
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_normalizes_token_buckets() {
        for (input, expected) in [(30, 50), (400, 200), (1200, 1000), (5000, 2000)] {
            let body = format!(
                r#"{{"tier": "MEDIUM", "confidence": 0.7, "reasoning": "x", "estimated_tokens": {input}, "needs_tools": false}}"#
            );
            let (_, _, _, tokens, _) = parse_response(&body).unwrap();
            assert_eq!(tokens, expected);
        }
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let body = r#"{"tier": "SIMPLE", "confidence": 1.7, "reasoning": "x", "estimated_tokens": 50, "needs_tools": "true"}"#;
        let (_, confidence, _, _, needs_tools) = parse_response(body).unwrap();
        assert_eq!(confidence, 1.0);
        assert!(needs_tools);
    }

    #[test]
    fn test_parse_rejects_unknown_tier() {
        let body = r#"{"tier": "GALACTIC", "confidence": 0.5, "reasoning": "x", "estimated_tokens": 50, "needs_tools": false}"#;
        assert!(parse_response(body).is_err());
    }
}
