//! LLM providers that turn a product idea into a tool-specific prompt

pub mod gemini;
pub mod openai;
pub mod templates;

use std::sync::Arc;

use async_trait::async_trait;
use metamind_shared::ToolType;
use reqwest::Client;

use crate::config::{Config, LlmProviderKind};

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Error type for LLM provider calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Provider returned no content")]
    EmptyResponse,

    #[error("{0} API key is missing")]
    MissingApiKey(&'static str),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    async fn generate(&self, tool: ToolType, idea: &str) -> Result<String, LlmError>;
}

/// Provider selected by `LLM_PROVIDER`
pub fn provider_from_config(config: &Config, http_client: Client) -> Arc<dyn LlmProvider> {
    match config.llm_provider {
        LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            http_client,
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
        )),
        LlmProviderKind::Gemini => Arc::new(GeminiProvider::new(
            http_client,
            config.gemini_api_key.clone(),
            config.gemini_base_url.clone(),
            config.gemini_model.clone(),
        )),
    }
}

/// Pull `error.message` out of an error body, if there is one
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string())
}
