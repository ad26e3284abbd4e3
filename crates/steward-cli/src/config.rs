//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use steward_agent::CompressionPass;

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_STEPS: u32 = 100;
pub const DEFAULT_WORKSPACE_DIR: &str = "./workspace";
pub const DEFAULT_BROWSER_API_URL: &str = "http://localhost:8000/api/automation";

/// Configuration for steward
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Default provider
    pub provider: Option<String>,
    /// Override the provider's base URL
    pub base_url: Option<String>,
    /// Step budget per query
    pub max_steps: Option<u32>,
    /// Root for session directories and the blob store
    pub workspace_dir: Option<String>,
    /// Base URL of the browser automation service
    pub browser_api_url: Option<String>,
    /// Dispatch all capability requests of one response concurrently
    pub parallel_tool_calls: Option<bool>,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    /// Compression passes, replacing the defaults when non-empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compression: Vec<CompressionPass>,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
    pub tavily: Option<String>,
    pub rapid_api: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("steward")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STEWARD_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file. A missing file yields the defaults; an
    /// unreadable or malformed one is an error the caller reports.
    pub fn load() -> Result<Self, String> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read config file {}: {}", path.display(), e))?;
        Self::parse(&content)
            .map_err(|e| format!("failed to parse config file {}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            provider: Some(DEFAULT_PROVIDER.to_string()),
            max_steps: Some(DEFAULT_MAX_STEPS),
            workspace_dir: Some(DEFAULT_WORKSPACE_DIR.to_string()),
            browser_api_url: Some(DEFAULT_BROWSER_API_URL.to_string()),
            parallel_tool_calls: Some(false),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Provider name: env var, then config file, then the default
    pub fn provider(&self) -> String {
        std::env::var("STEWARD_PROVIDER")
            .ok()
            .or_else(|| self.provider.clone())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
    }

    /// Model id: env var, then config file, then the default
    pub fn model(&self) -> String {
        std::env::var("STEWARD_MODEL")
            .ok()
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        PathBuf::from(
            self.workspace_dir
                .as_deref()
                .unwrap_or(DEFAULT_WORKSPACE_DIR),
        )
    }

    pub fn browser_api_url(&self) -> String {
        self.browser_api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BROWSER_API_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn compression_passes(&self) -> Vec<CompressionPass> {
        if self.compression.is_empty() {
            CompressionPass::default_passes()
        } else {
            self.compression.clone()
        }
    }

    /// Get the backend API key for a provider, checking config then env
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let from_config = match provider {
            "openai" => self.api_keys.openai.clone(),
            "groq" => self.api_keys.groq.clone(),
            "openrouter" => self.api_keys.openrouter.clone(),
            _ => None,
        };

        if from_config.is_some() {
            return from_config;
        }

        steward_ai::Provider::parse(provider)
            .api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
    }

    /// Tavily key for web search
    pub fn tavily_api_key(&self) -> Option<String> {
        self.api_keys
            .tavily
            .clone()
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
    }

    /// RapidAPI key for data providers
    pub fn rapid_api_key(&self) -> Option<String> {
        self.api_keys
            .rapid_api
            .clone()
            .or_else(|| std::env::var("RAPID_API_KEY").ok())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# steward configuration file
# Place at ~/.config/steward/config.toml (Linux), ~/Library/Application Support/steward/config.toml (Mac)
# or point STEWARD_CONFIG_PATH at it

# Reasoning backend (openai, groq, cerebras, xai, openrouter, ollama)
provider = "openai"
model = "gpt-4o"
# base_url = "http://localhost:11434/v1"

# Maximum number of acting steps per query
max_steps = 100

# Session directories and the blob store live here
workspace_dir = "./workspace"

# Browser automation service
browser_api_url = "http://localhost:8000/api/automation"

# Run all capability requests of one response concurrently
parallel_tool_calls = false

# API keys (optional - can also use OPENAI_API_KEY, TAVILY_API_KEY, RAPID_API_KEY)
[api_keys]
# openai = "sk-..."
# tavily = "tvly-..."
# rapid_api = "..."

# Compression passes, applied in order before every reasoning call.
# Omit to use the defaults shown here.
# [[compression]]
# target = "tool"
# max_tokens = 12800
# single_message_threshold = 1024
#
# [[compression]]
# target = "human"
# max_tokens = 12800
# single_message_threshold = 1024
#
# [[compression]]
# target = "ai"
# max_tokens = 12800
# single_message_threshold = 1025
"#
}
