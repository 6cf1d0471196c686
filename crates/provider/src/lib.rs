pub mod anthropic;
pub mod openai;
pub mod types;

mod error;
mod sse;

pub use error::ProviderError;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;

/// The LLM collaborator boundary: every reviewer agent, the deduplicator's
/// semantic check, and the streaming validator's challenge rounds all talk
/// to the model exclusively through this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn supported_models(&self) -> &[ModelInfo];

    fn model_for_tier(&self, tier: ModelTier) -> Option<&ModelInfo> {
        let models = self.supported_models();
        models
            .iter()
            .find(|m| m.tier == tier)
            .or_else(|| models.first())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Builds a `Provider` for the named backend, resolving its credential via
/// `sentinel_auth::resolve_credential` (explicit config key, then env var,
/// then OS keyring).
pub fn create_provider(
    name: &str,
    config: &sentinel_config::ProviderConfig,
) -> Result<Box<dyn Provider>> {
    let entry = config.entry(name);
    let style = entry
        .and_then(|e| e.api_style.clone())
        .unwrap_or_else(|| default_api_style(name).to_string());

    let cred = sentinel_auth::resolve_credential(name, entry.and_then(|e| e.api_key.as_deref()))?;
    let base_url = entry.and_then(|e| e.base_url.clone());
    let model = entry.and_then(|e| e.model.clone());

    match style.as_str() {
        "openai" => Ok(Box::new(openai::OpenAIProvider::new(
            cred.header_value(),
            base_url,
            model,
        ))),
        "anthropic" => Ok(Box::new(anthropic::AnthropicProvider::new(
            cred.header_value(),
            base_url,
            model,
        ))),
        other => anyhow::bail!("unsupported api_style '{other}' for provider '{name}'"),
    }
}

fn default_api_style(name: &str) -> &'static str {
    match name {
        "anthropic" => "anthropic",
        _ => "openai",
    }
}

/// Collects the hardcoded model catalogue for every built-in provider.
/// Used by the CLI/config layer to validate a configured model id and to
/// report context-window limits to reviewer agents.
pub struct ModelRegistry {
    models: HashMap<String, Vec<ModelInfo>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        let mut models = HashMap::new();
        models.insert("openai".into(), openai::default_models());
        models.insert("anthropic".into(), anthropic::default_models());
        Self { models }
    }

    pub fn models_for(&self, provider: &str) -> &[ModelInfo] {
        self.models
            .get(provider)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, provider: &str, model_id: &str) -> Option<&ModelInfo> {
        self.models.get(provider)?.iter().find(|m| m.id == model_id)
    }

    pub fn providers(&self) -> Vec<&str> {
        self.models.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_finds_known_model() {
        let registry = ModelRegistry::new();
        assert!(registry.find("anthropic", "claude-sonnet-4-20250514").is_some());
        assert!(registry.find("openai", "does-not-exist").is_none());
    }
}
