//! RapidAPI-backed data providers (LinkedIn, Twitter)
//!
//! Each provider is a static catalog of named endpoints. The model first asks
//! for a provider's endpoints, then calls one by name with a payload.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

use crate::utils::truncate_chars;

/// Error text is cut to this many characters
const MAX_ERROR_CHARS: usize = 200;
const REQUEST_TIMEOUT_SECS: u64 = 60;

const LINKEDIN_CATALOG: &str = include_str!("catalog/linkedin.json");
const TWITTER_CATALOG: &str = include_str!("catalog/twitter.json");

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub route: String,
    pub method: String,
    pub description: String,
    /// Parameter name to human-readable requirement
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataProvider {
    pub base_url: String,
    pub endpoints: BTreeMap<String, Endpoint>,
}

impl DataProvider {
    fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

/// Parse the bundled catalogs, keyed by service name
pub fn load_catalog() -> BTreeMap<String, DataProvider> {
    let mut catalog = BTreeMap::new();
    for (name, raw) in [("linkedin", LINKEDIN_CATALOG), ("twitter", TWITTER_CATALOG)] {
        match serde_json::from_str::<DataProvider>(raw) {
            Ok(provider) => {
                catalog.insert(name.to_string(), provider);
            }
            Err(e) => tracing::error!(provider = name, "invalid data provider catalog: {}", e),
        }
    }
    catalog
}

/// Shared state for both data provider capabilities
struct Catalog {
    providers: BTreeMap<String, DataProvider>,
    client: Client,
    api_key: Option<String>,
}

impl Catalog {
    fn available(&self) -> String {
        let names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        format!("{:?}", names)
    }

    fn lookup(&self, service_name: &str) -> Result<&DataProvider, String> {
        if service_name.is_empty() {
            return Err("Data provider name is required.".to_string());
        }
        self.providers.get(service_name).ok_or_else(|| {
            format!(
                "Data provider '{}' not found. Available data providers: {}",
                service_name,
                self.available()
            )
        })
    }

    async fn call(
        &self,
        provider: &DataProvider,
        endpoint: &Endpoint,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or("Data providers are not configured. Set RAPID_API_KEY or api_keys.rapid_api.")?;
        let url = format!("{}{}", provider.base_url.trim_end_matches('/'), endpoint.route);

        let mut request = match endpoint.method.to_ascii_uppercase().as_str() {
            "GET" => self.client.get(&url).query(&query_pairs(payload)),
            "POST" => self.client.post(&url).json(payload),
            other => return Err(format!("Unsupported method '{}'", other)),
        };
        request = request.header("x-rapidapi-key", api_key);
        if let Some(host) = provider.host() {
            request = request.header("x-rapidapi-host", host);
        }

        tracing::debug!(%url, method = %endpoint.method, "calling data provider");

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status, body));
        }
        Ok(body)
    }
}

/// Flatten a JSON payload into query parameters, strings unquoted
fn query_pairs(payload: &serde_json::Map<String, serde_json::Value>) -> Vec<(String, String)> {
    payload
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Accept an object, a JSON string encoding an object, or nothing
fn parse_payload(
    value: Option<&serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(serde_json::Map::new()),
        Some(serde_json::Value::Object(map)) => Ok(map.clone()),
        Some(serde_json::Value::String(raw)) if raw.trim().is_empty() => Ok(serde_json::Map::new()),
        Some(serde_json::Value::String(raw)) => match serde_json::from_str(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err("Invalid JSON in payload: expected an object".to_string()),
            Err(e) => Err(format!("Invalid JSON in payload: {}", e)),
        },
        Some(_) => Err("Payload must be an object or a JSON string".to_string()),
    }
}

fn simplified_error(prefix: &str, message: &str) -> ToolResult {
    ToolResult::error(format!("{}: {}", prefix, truncate_chars(message, MAX_ERROR_CHARS)))
}

/// Contributes get_data_provider_endpoints and execute_data_provider_call
pub struct DataProvidersProvider {
    catalog: Arc<Catalog>,
}

impl DataProvidersProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_catalog(load_catalog(), api_key)
    }

    pub fn with_catalog(providers: BTreeMap<String, DataProvider>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            catalog: Arc::new(Catalog {
                providers,
                client,
                api_key,
            }),
        }
    }
}

impl CapabilityProvider for DataProvidersProvider {
    fn name(&self) -> &str {
        "data_providers"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        vec![
            Arc::new(GetEndpointsTool(self.catalog.clone())),
            Arc::new(ExecuteCallTool(self.catalog.clone())),
        ]
    }
}

struct GetEndpointsTool(Arc<Catalog>);

#[async_trait]
impl Tool for GetEndpointsTool {
    fn name(&self) -> &str {
        "get_data_provider_endpoints"
    }

    fn description(&self) -> &str {
        "Get available endpoints for a specific data provider."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "service_name": {
                    "type": "string",
                    "description": "The name of the data provider (e.g., 'linkedin', 'twitter')"
                }
            },
            "required": ["service_name"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let service_name = arguments
            .get("service_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let provider = match self.0.lookup(service_name) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let endpoints: serde_json::Map<String, serde_json::Value> = provider
            .endpoints
            .iter()
            .map(|(name, ep)| {
                (
                    name.clone(),
                    json!({
                        "route": ep.route,
                        "method": ep.method,
                        "description": ep.description,
                        "payload": ep.payload,
                    }),
                )
            })
            .collect();
        ToolResult::json(&serde_json::Value::Object(endpoints))
    }
}

struct ExecuteCallTool(Arc<Catalog>);

#[async_trait]
impl Tool for ExecuteCallTool {
    fn name(&self) -> &str {
        "execute_data_provider_call"
    }

    fn description(&self) -> &str {
        "Execute a call to a specific data provider endpoint."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "service_name": {
                    "type": "string",
                    "description": "The name of the data provider (e.g., 'linkedin', 'twitter')"
                },
                "endpoint": {
                    "type": "string",
                    "description": "The endpoint name, as listed by get_data_provider_endpoints"
                },
                "payload": {
                    "type": ["object", "string", "null"],
                    "description": "Parameters for the call (object or JSON string)"
                }
            },
            "required": ["service_name", "endpoint"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let payload = match parse_payload(arguments.get("payload")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let service_name = arguments
            .get("service_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let endpoint_name = arguments
            .get("endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if endpoint_name.is_empty() {
            return ToolResult::error("endpoint is required.");
        }

        let provider = match self.0.lookup(service_name) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(endpoint) = provider.endpoints.get(endpoint_name) else {
            return ToolResult::error(format!(
                "Endpoint '{}' not found in {} data provider.",
                endpoint_name, service_name
            ));
        };

        tokio::select! {
            _ = cancel.cancelled() => ToolResult::error("Data provider call cancelled"),
            result = self.0.call(provider, endpoint, &payload) => match result {
                Ok(body) => ToolResult::text(body),
                Err(e) => simplified_error("Error executing data provider call", &e),
            },
        }
    }
}
