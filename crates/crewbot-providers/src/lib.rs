//! LLM providers: the `LlmProvider` trait, a generic OpenAI-compatible
//! HTTP client, and the static provider registry used to match models
//! to configured backends.

pub mod http_provider;
pub mod registry;
pub mod traits;

pub use http_provider::{create_provider, HttpProvider};
pub use traits::{LlmProvider, LlmRequestConfig, ProviderError};
