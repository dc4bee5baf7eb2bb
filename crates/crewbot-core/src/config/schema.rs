//! Configuration schema — the typed tree behind `~/.crewbot/config.json`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! `#[serde(rename_all = "camelCase")]` handles the conversion, and
//! every section defaults so partial files load cleanly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::session::compactor::CompactionConfig;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.crewbot/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub tools: ToolsConfig,
    pub gateway: GatewayConfig,
    pub routing: RoutingConfig,
    pub memory: MemoryConfig,
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

/// Agent configuration container.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
    /// Name of the leader bot that coordinates rooms.
    pub leader: String,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
            leader: "crewbot".to_string(),
        }
    }
}

/// Default agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    /// Default workspace directory.
    pub workspace: String,
    /// Default LLM model identifier.
    pub model: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Maximum tool-calling loop iterations before forcing a response.
    pub max_tool_iterations: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.crewbot/workspace".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for a single LLM provider (API key, base URL, headers).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    #[serde(default)]
    pub api_key: String,
    /// Custom API base URL (overrides provider default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// All provider configurations, one per supported LLM backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub deepseek: ProviderConfig,
    #[serde(default)]
    pub groq: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub moonshot: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
}

impl ProvidersConfig {
    /// Get a provider config by name (e.g. `"anthropic"`).
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            "openrouter" => Some(&self.openrouter),
            "deepseek" => Some(&self.deepseek),
            "groq" => Some(&self.groq),
            "gemini" => Some(&self.gemini),
            "moonshot" => Some(&self.moonshot),
            "vllm" => Some(&self.vllm),
            _ => None,
        }
    }

    /// Convert to a map for use with the provider registry.
    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        let entries: &[(&str, &ProviderConfig)] = &[
            ("anthropic", &self.anthropic),
            ("openai", &self.openai),
            ("openrouter", &self.openrouter),
            ("deepseek", &self.deepseek),
            ("groq", &self.groq),
            ("gemini", &self.gemini),
            ("moonshot", &self.moonshot),
            ("vllm", &self.vllm),
        ];
        entries
            .iter()
            .map(|(name, config)| (name.to_string(), (*config).clone()))
            .collect()
    }

    /// Whether any provider has an API key.
    pub fn any_configured(&self) -> bool {
        self.to_map().values().any(|c| c.is_configured())
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Per-channel settings. Transport adapters are external collaborators,
/// so the core only knows enablement and access control.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Flat allowed-users list. Empty = allow everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Transport-specific settings passed through opaquely.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Tool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Web tools configuration (search, fetch).
    #[serde(default)]
    pub web: WebToolsConfig,
    /// Shell exec tool configuration.
    #[serde(default)]
    pub exec: ExecToolConfig,
    /// Whether to restrict file/exec operations to the workspace directory.
    #[serde(default)]
    pub restrict_to_workspace: bool,
    /// Explicit whitelist of allowed path prefixes (when not workspace-restricted).
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Blacklisted path prefixes, enforced even inside allowed paths.
    #[serde(default)]
    pub protected_paths: Vec<String>,
    /// Whether evolving skills may be installed after a security scan.
    #[serde(default)]
    pub evolutionary: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web: WebToolsConfig::default(),
            exec: ExecToolConfig::default(),
            restrict_to_workspace: false,
            allowed_paths: Vec::new(),
            protected_paths: Vec::new(),
            evolutionary: false,
        }
    }
}

/// Web tools configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebToolsConfig {
    #[serde(default)]
    pub search: WebSearchConfig,
}

/// Web search configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSearchConfig {
    /// Search API key.
    #[serde(default)]
    pub api_key: String,
    /// Maximum number of search results to return.
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: 5,
        }
    }
}

/// Shell exec tool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecToolConfig {
    /// Timeout in seconds for shell commands.
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

// ─────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────

/// Gateway service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18790,
        }
    }
}

// ─────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────

/// Smart-router configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub enabled: bool,
    pub tiers: TiersConfig,
    pub client_classifier: ClientClassifierConfig,
    pub llm_classifier: LlmClassifierConfig,
    pub sticky: StickyConfig,
    pub auto_calibration: AutoCalibrationConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tiers: TiersConfig::default(),
            client_classifier: ClientClassifierConfig::default(),
            llm_classifier: LlmClassifierConfig::default(),
            sticky: StickyConfig::default(),
            auto_calibration: AutoCalibrationConfig::default(),
        }
    }
}

/// Model assignment for one tier.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierConfig {
    pub model: String,
    /// Observability only; never part of the routing decision.
    pub cost_per_mtok: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_model: Option<String>,
}

/// The five capability tiers and their models.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TiersConfig {
    pub simple: TierConfig,
    pub medium: TierConfig,
    pub complex: TierConfig,
    pub reasoning: TierConfig,
    pub coding: TierConfig,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            simple: TierConfig {
                model: "openai/gpt-4o-mini".into(),
                cost_per_mtok: 0.15,
                secondary_model: Some("groq/llama-3.3-70b-versatile".into()),
            },
            medium: TierConfig {
                model: "anthropic/claude-haiku-4-5".into(),
                cost_per_mtok: 1.0,
                secondary_model: Some("openai/gpt-4o-mini".into()),
            },
            complex: TierConfig {
                model: "anthropic/claude-sonnet-4-20250514".into(),
                cost_per_mtok: 3.0,
                secondary_model: Some("openai/gpt-4o".into()),
            },
            reasoning: TierConfig {
                model: "deepseek/deepseek-reasoner".into(),
                cost_per_mtok: 2.19,
                secondary_model: Some("anthropic/claude-sonnet-4-20250514".into()),
            },
            coding: TierConfig {
                model: "anthropic/claude-sonnet-4-20250514".into(),
                cost_per_mtok: 3.0,
                secondary_model: Some("deepseek/deepseek-chat".into()),
            },
        }
    }
}

impl TiersConfig {
    /// Look up a tier config by tier name.
    pub fn get(&self, tier: &str) -> Option<&TierConfig> {
        match tier {
            "simple" => Some(&self.simple),
            "medium" => Some(&self.medium),
            "complex" => Some(&self.complex),
            "reasoning" => Some(&self.reasoning),
            "coding" => Some(&self.coding),
            _ => None,
        }
    }
}

/// Client-side classifier settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientClassifierConfig {
    /// Below this confidence, the LLM classifier is consulted.
    pub min_confidence: f64,
}

impl Default for ClientClassifierConfig {
    fn default() -> Self {
        Self { min_confidence: 0.85 }
    }
}

/// LLM-assisted classifier settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmClassifierConfig {
    pub model: String,
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_model: Option<String>,
}

impl Default for LlmClassifierConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            timeout_ms: 500,
            secondary_model: Some("groq/llama-3.1-8b-instant".to_string()),
        }
    }
}

/// Sticky routing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StickyConfig {
    /// How many recent tiers to consider.
    pub context_window: usize,
    /// Confidence required before a downgrade from an elevated tier.
    pub downgrade_confidence: f64,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            context_window: 3,
            downgrade_confidence: 0.90,
        }
    }
}

/// Auto-calibration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoCalibrationConfig {
    pub enabled: bool,
    /// Time interval between calibrations ("24h", "7d", or plain hours).
    pub interval: String,
    /// Count-based threshold that can trigger early calibration.
    pub min_classifications: usize,
    pub max_patterns: usize,
    pub backup_before_calibration: bool,
}

impl Default for AutoCalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "24h".to_string(),
            min_classifications: 50,
            max_patterns: 100,
            backup_before_calibration: true,
        }
    }
}

// ─────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────

/// Memory system configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Database path relative to the workspace.
    pub db_path: String,
    pub background: BackgroundConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub summary: SummaryConfig,
    pub learning: LearningConfig,
    pub context: MemoryContextConfig,
    pub privacy: PrivacyConfig,
    pub session_compaction: CompactionConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: "memory/memory.db".to_string(),
            background: BackgroundConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            summary: SummaryConfig::default(),
            learning: LearningConfig::default(),
            context: MemoryContextConfig::default(),
            privacy: PrivacyConfig::default(),
            session_compaction: CompactionConfig::default(),
        }
    }
}

/// Background processor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Seconds of inactivity before the user counts as "quiet".
    pub quiet_threshold_seconds: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            quiet_threshold_seconds: 30,
        }
    }
}

/// Embedding provider selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    /// "local" (deterministic hashing fallback) or "api".
    pub provider: String,
    pub local_model: String,
    pub api_model: String,
    /// Fall back to the API embedder when the local model is unavailable.
    pub api_fallback: bool,
    pub cache_embeddings: bool,
    pub lazy_load: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            local_model: "bge-small-en-v1.5".to_string(),
            api_model: "text-embedding-3-small".to_string(),
            api_fallback: false,
            cache_embeddings: true,
            lazy_load: true,
        }
    }
}

/// Entity extraction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionConfig {
    /// Extractor backend name ("pattern" built-in fallback).
    pub provider: String,
    /// Max pending events pulled per background cycle.
    pub batch_size: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: "pattern".to_string(),
            batch_size: 20,
        }
    }
}

/// Summary tree refresh settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryConfig {
    /// Events since update that mark a node stale.
    pub staleness_threshold: i64,
    pub max_refresh_batch: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: 10,
            max_refresh_batch: 20,
        }
    }
}

/// Learning lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub decay_days: i64,
    pub max_learnings: usize,
    /// Daily relevance decay rate.
    pub relevance_decay_rate: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_days: 14,
            max_learnings: 500,
            relevance_decay_rate: 0.05,
        }
    }
}

/// Budget for memory context injected into prompts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryContextConfig {
    /// Total character budget for the memory context block.
    pub total_budget: usize,
    pub always_include_preferences: bool,
}

impl Default for MemoryContextConfig {
    fn default() -> Self {
        Self {
            total_budget: 4000,
            always_include_preferences: true,
        }
    }
}

/// Privacy controls for stored content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacyConfig {
    pub auto_redact_pii: bool,
    pub auto_redact_credentials: bool,
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            auto_redact_pii: false,
            auto_redact_credentials: true,
            excluded_patterns: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
