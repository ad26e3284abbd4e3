//! Reasoning backend clients

pub mod openai;

use crate::{Context, Error, MessageEventStream, Model, Provider, Result, StreamOptions};
use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the LLM
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream>;
}

/// Resolve an API key from an explicit value or the given environment variable
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

/// Build the client for a model. Providers without a key variable run keyless.
pub fn provider_for(model: &Model, api_key: Option<&str>) -> Result<Box<dyn LlmProvider>> {
    let key = match model.provider.api_key_env_var() {
        Some(var) => Some(get_api_key(api_key, var)?),
        None => api_key.map(str::to_string),
    };
    if model.provider == Provider::Custom && model.base_url.is_empty() {
        return Err(Error::InvalidConfig(
            "custom provider requires a base URL".into(),
        ));
    }
    Ok(Box::new(openai::ChatCompletionsProvider::new(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resolve_model;

    #[test]
    fn test_explicit_key_wins() {
        assert_eq!(
            get_api_key(Some("sk-test"), "STEWARD_TEST_UNSET_VAR").unwrap(),
            "sk-test"
        );
    }

    #[test]
    fn test_missing_key_is_error() {
        assert!(matches!(
            get_api_key(None, "STEWARD_TEST_DEFINITELY_UNSET"),
            Err(Error::InvalidApiKey)
        ));
    }

    #[test]
    fn test_keyless_provider() {
        let model = resolve_model("ollama", "llama3", None);
        assert!(provider_for(&model, None).is_ok());
    }

    #[test]
    fn test_custom_provider_needs_base_url() {
        let model = resolve_model("custom", "local", None);
        assert!(matches!(
            provider_for(&model, None),
            Err(Error::InvalidConfig(_))
        ));
    }
}
