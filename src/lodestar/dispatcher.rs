//! Tool routing for agent conversations.
//!
//! One dispatcher instance is shared by every agent. `invoke` routes a
//! model-requested tool call to either a built-in public tool or a
//! proxied tool server, and *always* returns a result string: any failure
//! at any stage is rendered as a structured error payload for the model,
//! never raised to the conversation engine.

use crate::lodestar::config::OrchestratorConfig;
use crate::lodestar::mcp::ToolServerProxy;
use crate::lodestar::public_tools::{public_tool, PublicToolClient};
use crate::lodestar::roles::AgentRole;
use crate::lodestar::tool_protocol::{error_payload, ToolSchema};
use serde_json::Value;
use std::collections::HashSet;

pub struct ToolDispatcher {
    public: PublicToolClient,
    proxy: ToolServerProxy,
}

impl ToolDispatcher {
    /// Build a dispatcher from the configured tool-server map. Both halves
    /// share one connection pool.
    pub fn new(config: &OrchestratorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            public: PublicToolClient::new(http.clone()),
            proxy: ToolServerProxy::new(http, config.tool_servers.clone()),
        }
    }

    /// Run startup discovery against every configured tool server.
    pub async fn discover(&self) {
        self.proxy.discover().await;
    }

    /// Pre-seed the discovered-tool registry, bypassing discovery.
    pub async fn register_schema(&self, schema: ToolSchema) {
        self.proxy.register_schema(schema).await;
    }

    /// Number of tools in the discovered registry.
    pub async fn discovered_tool_count(&self) -> usize {
        self.proxy.tool_count().await
    }

    /// Execute one tool call and return its result text. Public tools are
    /// matched first; anything else must be a namespaced server tool.
    /// Failures degrade to a structured error string.
    pub async fn invoke(&self, tool_name: &str, arguments: &Value) -> String {
        let result = if public_tool(tool_name).is_some() {
            self.public.invoke(tool_name, arguments).await
        } else {
            self.proxy.call(tool_name, arguments).await
        };

        match result {
            Ok(text) => text,
            Err(err) => {
                log::warn!("tool '{}' failed: {}", tool_name, err);
                error_payload(tool_name, &err)
            }
        }
    }

    /// Assemble the tool set for one agent role: the role's public
    /// allow-list unioned with its discovered allow-list.
    pub async fn tools_for_role(&self, role: AgentRole) -> Vec<ToolSchema> {
        let public = role
            .public_allow_list()
            .iter()
            .filter_map(|name| public_tool(name).cloned())
            .collect();
        let discovered = self.proxy.schemas_for(role.discovered_allow_list()).await;
        assemble_tool_set(public, discovered, role.allows_search_fallback())
    }
}

/// Union the two tool sources, de-duplicated by name with first-seen
/// precedence (public tools precede discovered ones). A role left with no
/// tools falls back to the single generic web-search capability, unless
/// the role opted out of the fallback.
pub fn assemble_tool_set(
    public: Vec<ToolSchema>,
    discovered: Vec<ToolSchema>,
    allow_fallback: bool,
) -> Vec<ToolSchema> {
    let mut tools = public;
    tools.extend(discovered);

    if tools.is_empty() && allow_fallback {
        tools.push(ToolSchema::web_search());
    }

    let mut seen = HashSet::new();
    tools.retain(|tool| seen.insert(tool.name.clone()));
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatcher() -> ToolDispatcher {
        let config = OrchestratorConfig {
            tool_servers: std::collections::HashMap::new(),
            ..OrchestratorConfig::default()
        };
        ToolDispatcher::new(&config)
    }

    #[tokio::test]
    async fn unknown_namespaced_tool_degrades_to_error_string() {
        let result = dispatcher().invoke("nowhere__lookup", &json!({})).await;
        let value: Value = serde_json::from_str(&result).unwrap();
        assert!(value["error"].as_str().unwrap().contains("Unknown server"));
    }

    #[test]
    fn duplicate_names_keep_first_seen() {
        let public = vec![ToolSchema::new("search_pubmed", "public", json!({}))];
        let discovered = vec![
            ToolSchema::new("search_pubmed", "shadowed", json!({})),
            ToolSchema::new("biorxiv__search_preprints", "", json!({})),
        ];
        let tools = assemble_tool_set(public, discovered, true);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "search_pubmed");
        assert_eq!(tools[0].description, "public");
    }

    #[test]
    fn empty_set_falls_back_to_web_search() {
        let tools = assemble_tool_set(vec![], vec![], true);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "web_search");

        // Strategist-style opt-out stays empty.
        assert!(assemble_tool_set(vec![], vec![], false).is_empty());
    }

    #[test]
    fn fallback_not_added_when_any_tool_exists() {
        let public = vec![ToolSchema::new("search_pubmed", "", json!({}))];
        let tools = assemble_tool_set(public, vec![], true);
        assert!(tools.iter().all(|t| t.name != "web_search"));
    }

    #[tokio::test]
    async fn strategist_gets_no_tools() {
        assert!(dispatcher()
            .tools_for_role(AgentRole::Strategist)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn connector_tool_set_matches_public_allow_list() {
        let tools = dispatcher().tools_for_role(AgentRole::Connector).await;
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search_pubmed", "search_clinical_trials"]);
    }
}
