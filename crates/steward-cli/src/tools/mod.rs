//! Capability providers for the agent

mod browser;
mod data_provider;
mod fs;
mod misc;
mod search;
mod shell;
mod task;

pub use browser::{BrowserClient, BrowserProvider};
pub use data_provider::DataProvidersProvider;
pub use fs::{FilesystemProvider, Sandbox};
pub use misc::{MiscProvider, Prompter, StdinPrompter};
pub use search::WebSearchProvider;
pub use shell::ShellProvider;
pub use task::TaskProvider;

use std::sync::Arc;
use steward_agent::{CapabilityProvider, CapabilityRegistry, SharedBlobStore};

/// Everything the providers need at construction
pub struct ProviderSettings {
    pub sandbox: Arc<Sandbox>,
    pub store: SharedBlobStore,
    pub browser_api_url: String,
    pub tavily_api_key: Option<String>,
    pub rapid_api_key: Option<String>,
    pub prompter: Arc<dyn Prompter>,
}

/// Build every provider, in registration order
pub fn providers(settings: ProviderSettings) -> Vec<Box<dyn CapabilityProvider>> {
    let browser = Arc::new(BrowserClient::new(settings.browser_api_url));
    vec![
        Box::new(BrowserProvider::new(browser.clone())),
        Box::new(FilesystemProvider::new(settings.sandbox.clone())),
        Box::new(DataProvidersProvider::new(settings.rapid_api_key)),
        Box::new(MiscProvider::new(
            settings.store.clone(),
            settings.prompter,
            browser,
        )),
        Box::new(ShellProvider::new(settings.sandbox.root())),
        Box::new(TaskProvider::new(settings.store)),
        Box::new(WebSearchProvider::new(settings.tavily_api_key)),
    ]
}

/// Register every provider's capabilities into a fresh registry
pub fn build_registry(settings: ProviderSettings) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for provider in providers(settings) {
        registry.register_provider(provider.as_ref());
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_agent::MemoryBlobStore;

    fn settings() -> ProviderSettings {
        let workspace = std::env::temp_dir().join(format!("steward-tools-{}", uuid::Uuid::new_v4()));
        ProviderSettings {
            sandbox: Arc::new(Sandbox::open(&workspace, "session").unwrap()),
            store: Arc::new(MemoryBlobStore::new()),
            browser_api_url: "http://127.0.0.1:9".to_string(),
            tavily_api_key: None,
            rapid_api_key: None,
            prompter: Arc::new(StdinPrompter),
        }
    }

    #[test]
    fn test_registry_has_every_capability_once() {
        let registry = build_registry(settings());
        let names = registry.names();
        for expected in [
            "browser_navigate_to",
            "get_browser_state",
            "create_file",
            "modify_file",
            "read_file",
            "write_file",
            "get_data_provider_endpoints",
            "execute_data_provider_call",
            "expand_message",
            "ask",
            "browser_takeover",
            "execute_command",
            "create_tasks",
            "view_tasks",
            "update_task",
            "web_search",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len());
        assert_eq!(registry.len(), 30);
    }

    #[tokio::test]
    async fn test_file_round_trip_through_registry() {
        let registry = build_registry(settings());
        let cancel = tokio_util::sync::CancellationToken::new();
        let created = registry
            .invoke(
                "c1",
                "create_file",
                serde_json::json!({"file_name": "a.txt", "content": "data"}),
                cancel.clone(),
            )
            .await;
        assert!(!created.is_error);

        let read = registry
            .invoke("c2", "read_file", serde_json::json!({"file_name": "a.txt"}), cancel)
            .await;
        assert_eq!(read.text_content(), "data");
    }
}
