//! HTTP provider for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Beyond speaking the wire format, this layer is where failure gets
//! its meaning: HTTP status codes, timeouts, and connection errors map
//! onto the [`ProviderError`] taxonomy so the agent loop can decide
//! between retrying on a secondary model and giving up. Requests honor
//! the per-call time budget and carry the originating envelope's trace
//! id as an `x-trace-id` header.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crewbot_core::types::{LlmResponse, Message, ToolCall, ToolDefinition, UsageInfo};

use crate::registry::{apply_model_overrides, resolve_model_name, ProviderConfig, ProviderSpec};
use crate::traits::{LlmProvider, LlmRequestConfig, ProviderError};

/// Trace correlation header sent with every request.
const TRACE_HEADER: &str = "x-trace-id";

/// Transport-level default when the call carries no time budget.
const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

/// Request body for an OpenAI-compatible chat completion call.
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f64,
}

/// Response body of a chat completion call.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl WireResponse {
    /// Pull the first choice into an [`LlmResponse`]. A reply with no
    /// choices is a malformed (permanent) failure, not a silent empty.
    fn into_llm_response(self) -> Result<LlmResponse, ProviderError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in reply".into()))?;

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: self.usage,
            reasoning_content: choice.message.reasoning_content,
        })
    }
}

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A provider speaking the OpenAI-compatible chat completions protocol.
pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    default_model: String,
    extra_headers: HeaderMap,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Create a provider from a config and its registry spec.
    pub fn new(config: &ProviderConfig, spec: &'static ProviderSpec, model: &str) -> Self {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| spec.default_api_base.map(String::from))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                match (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(val)) => {
                        extra_headers.insert(name, val);
                    }
                    _ => warn!("invalid extra header: {}={}", key, value),
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: model.to_string(),
            extra_headers,
            spec,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// Send one request and map every failure mode onto the taxonomy.
    async fn dispatch(
        &self,
        body: &WireRequest<'_>,
        config: &LlmRequestConfig,
    ) -> Result<WireResponse, ProviderError> {
        let mut request = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(body);

        if let Some(trace_id) = &config.trace_id {
            request = request.header(TRACE_HEADER, trace_id.as_str());
        }

        let send = request.send();
        let response = match config.timeout {
            Some(budget) => tokio::time::timeout(budget, send)
                .await
                .map_err(|_| ProviderError::Timeout(budget))?,
            None => send.await,
        }
        .map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(DEFAULT_TIMEOUT)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let message = response
                .text()
                .await
                .ok()
                .map(|body| extract_error_message(&body))
                .unwrap_or_else(|| status.to_string());

            return Err(classify_status(status.as_u16(), message, retry_after));
        }

        response
            .json::<WireResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Map an HTTP error status onto the provider error taxonomy.
fn classify_status(status: u16, message: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after },
        500..=599 => ProviderError::Unavailable { status, message },
        _ => ProviderError::Rejected { status, message },
    }
}

/// Pull `error.message` out of an API error body, falling back to the
/// raw (truncated) body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| crewbot_core::utils::truncate_string(body, 200))
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        let resolved_model = resolve_model_name(model, self.spec);
        let temperature = apply_model_overrides(model, self.spec, config.temperature);

        debug!(
            provider = self.spec.display_name,
            model = %resolved_model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            trace_id = config.trace_id.as_deref().unwrap_or("-"),
            "calling LLM"
        );

        let body = WireRequest {
            model: &resolved_model,
            messages,
            tools,
            tool_choice: tools.map(|_| "auto"),
            max_tokens: config.max_tokens,
            temperature,
        };

        let wire = self.dispatch(&body, config).await.map_err(|e| {
            warn!(provider = self.spec.display_name, error = %e, transient = e.is_transient(), "LLM call failed");
            e
        })?;

        let response = wire.into_llm_response()?;
        debug!(
            provider = self.spec.display_name,
            has_content = response.content.is_some(),
            tool_calls = response.tool_calls.len(),
            finish_reason = response.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(response)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build an `HttpProvider` from a model name and configured providers.
///
/// Matches the model to a provider spec (with gateway fallback), reads
/// its config, and constructs the client.
pub fn create_provider(
    model: &str,
    providers: &std::collections::HashMap<String, ProviderConfig>,
) -> Result<HttpProvider, String> {
    let (config, spec) = crate::registry::match_provider(model, providers).ok_or_else(|| {
        format!(
            "No configured provider found for model '{}'. \
             Set the appropriate API key (e.g. ANTHROPIC_API_KEY, OPENROUTER_API_KEY).",
            model
        )
    })?;

    debug!(
        provider = spec.display_name,
        model = model,
        api_base = config.api_base.as_deref().unwrap_or("default"),
        "creating LLM provider"
    );

    Ok(HttpProvider::new(config, spec, model))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
