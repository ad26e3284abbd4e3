//! Model resolution for OpenAI-compatible backends.

use crate::{Model, Provider};

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Build a model definition for a provider name and model id.
///
/// `base_url` overrides the provider's default endpoint and is required for
/// `Custom` providers.
pub fn resolve_model(provider: &str, model_id: &str, base_url: Option<&str>) -> Model {
    let provider = Provider::parse(provider);
    let base_url = base_url
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| provider.default_base_url().to_string());

    Model {
        id: model_id.to_string(),
        name: model_id.to_string(),
        provider,
        base_url,
        context_window: DEFAULT_CONTEXT_WINDOW,
        max_tokens: DEFAULT_MAX_TOKENS,
        headers: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_provider_uses_default_url() {
        let model = resolve_model("groq", "llama-3.3-70b-versatile", None);
        assert_eq!(model.provider, Provider::Groq);
        assert_eq!(model.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(model.id, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_base_url_override_strips_trailing_slash() {
        let model = resolve_model("custom", "local", Some("http://127.0.0.1:9000/v1/"));
        assert_eq!(model.provider, Provider::Custom);
        assert_eq!(model.base_url, "http://127.0.0.1:9000/v1");
    }
}
