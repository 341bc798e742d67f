//! JSON-RPC 2.0 client for external tool servers.
//!
//! Discovery runs once at startup: every configured server gets a
//! `tools/list` request in parallel, and each returned tool is cached under
//! its namespaced name (`{server}__{tool}`). A server that fails discovery
//! contributes zero tools without aborting the others. After discovery the
//! registry is a read-mostly cache; invocation proxies `tools/call` and
//! concatenates the text blocks of the response.

use crate::lodestar::tool_protocol::{namespaced, split_namespaced, ToolError, ToolSchema};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Proxy to the configured tool servers plus the schema registry built
/// from their discovery responses.
pub struct ToolServerProxy {
    http: reqwest::Client,
    /// Server name (dashed) → base URL.
    servers: HashMap<String, String>,
    /// Namespaced tool name → schema. Written during discovery, read-only
    /// afterwards.
    schemas: RwLock<HashMap<String, ToolSchema>>,
}

impl ToolServerProxy {
    pub fn new(http: reqwest::Client, servers: HashMap<String, String>) -> Self {
        Self {
            http,
            servers,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    async fn jsonrpc(
        &self,
        server_url: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ToolError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response = self.http.post(server_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::UpstreamStatus(status.to_string()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::Malformed(e.to_string()))
    }

    /// Discover tools from every configured server, in parallel. Partial
    /// failures are logged and tolerated.
    pub async fn discover(&self) {
        log::info!("discovering tools from {} servers", self.servers.len());

        let futures = self.servers.iter().map(|(name, url)| async move {
            let count = self.discover_server(name, url).await;
            match &count {
                Ok(n) => log::info!("  {}: {} tools", name, n),
                Err(e) => log::warn!("  {}: discovery failed: {}", name, e),
            }
            count.unwrap_or(0)
        });
        let total: usize = join_all(futures).await.into_iter().sum();

        log::info!("total tools discovered: {}", total);
    }

    async fn discover_server(&self, server_name: &str, url: &str) -> Result<usize, ToolError> {
        let body = self.jsonrpc(url, "tools/list", None).await?;
        let tools = body
            .pointer("/result/tools")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::Malformed("missing result.tools".into()))?;

        let mut discovered = Vec::with_capacity(tools.len());
        for tool in tools {
            let name = tool
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::Malformed("tool without name".into()))?;
            let schema = ToolSchema::new(
                namespaced(server_name, name),
                tool.get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                tool.get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            );
            discovered.push(schema);
        }

        let count = discovered.len();
        let mut registry = self.schemas.write().await;
        for schema in discovered {
            registry.insert(schema.name.clone(), schema);
        }
        Ok(count)
    }

    /// Pre-seed the registry with a schema, bypassing discovery. Useful
    /// for offline operation and tests.
    pub async fn register_schema(&self, schema: ToolSchema) {
        self.schemas.write().await.insert(schema.name.clone(), schema);
    }

    /// Proxy a `tools/call` for a namespaced tool name.
    pub async fn call(&self, namespaced_name: &str, arguments: &Value) -> Result<String, ToolError> {
        let (server_name, tool_name) = split_namespaced(namespaced_name)
            .ok_or_else(|| ToolError::UnknownTool(namespaced_name.to_string()))?;
        let server_url = self
            .servers
            .get(&server_name)
            .ok_or(ToolError::UnknownServer(server_name))?;

        let body = self
            .jsonrpc(
                server_url,
                "tools/call",
                Some(serde_json::json!({ "name": tool_name, "arguments": arguments })),
            )
            .await?;

        let content = body
            .pointer("/result/content")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::Malformed("missing result.content".into()))?;

        let texts: Vec<&str> = content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();

        if texts.is_empty() {
            // No text blocks; hand the raw content back rather than lose it.
            Ok(serde_json::to_string(content).unwrap_or_default())
        } else {
            Ok(texts.join("\n"))
        }
    }

    /// Schemas for the given namespaced names, in allow-list order.
    /// Missing names (server never discovered) are skipped.
    pub async fn schemas_for(&self, allow_list: &[&str]) -> Vec<ToolSchema> {
        let registry = self.schemas.read().await;
        allow_list
            .iter()
            .filter_map(|name| registry.get(*name).cloned())
            .collect()
    }

    /// Number of discovered tools.
    pub async fn tool_count(&self) -> usize {
        self.schemas.read().await.len()
    }
}
