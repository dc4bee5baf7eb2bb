//! The LLM provider seam.
//!
//! Providers separate *what the model said* from *why the call failed*:
//! `chat` returns a typed [`ProviderError`] on failure, and the error
//! knows whether it is transient. The agent loop retries transient
//! failures once on the tier's secondary model; permanent ones surface
//! to the user immediately. Each call also carries the trace id of the
//! envelope that triggered it, so provider traffic correlates with the
//! rest of the message's journey.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crewbot_core::types::{LlmResponse, Message, ToolDefinition};

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

/// Why a provider call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider asked us to back off (HTTP 429).
    #[error("rate limited{}", .retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// The provider itself failed (HTTP 5xx).
    #[error("provider unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The request was rejected (HTTP 4xx other than 429) — bad model
    /// name, malformed request, revoked key. Retrying won't help.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The call exceeded its time budget.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The connection itself failed.
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered, but not in a shape we can use.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry (on this or a secondary model) could plausibly
    /// succeed: rate limits, 5xx, timeouts, and network failures are
    /// transient; rejections and malformed responses are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Network(_)
        )
    }
}

// ─────────────────────────────────────────────
// Request config
// ─────────────────────────────────────────────

/// Per-call request parameters.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Optional time budget for this call. The router's classification
    /// calls run on a few hundred milliseconds; agent turns leave this
    /// unset and use the transport default.
    pub timeout: Option<Duration>,
    /// Trace id of the envelope this call serves, propagated to the
    /// provider for end-to-end correlation.
    pub trace_id: Option<String>,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            timeout: None,
            trace_id: None,
        }
    }
}

impl LlmRequestConfig {
    /// A copy of this config bound to one envelope's trace id.
    pub fn for_trace(&self, trace_id: Option<&str>) -> Self {
        let mut config = self.clone();
        config.trace_id = trace_id.map(String::from);
        config
    }
}

// ─────────────────────────────────────────────
// Provider trait
// ─────────────────────────────────────────────

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Arguments
    /// * `messages` — Conversation history in OpenAI format.
    /// * `tools`    — Optional list of tool definitions the LLM can call.
    /// * `model`    — Model identifier.
    /// * `config`   — Tokens, temperature, time budget, trace id.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError>;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
