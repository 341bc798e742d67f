use lodestar::config::OrchestratorConfig;
use lodestar::dispatcher::{assemble_tool_set, ToolDispatcher};
use lodestar::tool_protocol::ToolSchema;
use lodestar::AgentRole;
use serde_json::{json, Value};
use std::collections::HashMap;

fn offline_dispatcher() -> ToolDispatcher {
    let config = OrchestratorConfig {
        tool_servers: HashMap::new(),
        ..OrchestratorConfig::default()
    };
    ToolDispatcher::new(&config)
}

#[tokio::test]
async fn invoke_unknown_tool_returns_structured_error_not_panic() {
    let dispatcher = offline_dispatcher();

    for name in ["ghost__search", "not_even_namespaced"] {
        let result = dispatcher.invoke(name, &json!({})).await;
        let value: Value = serde_json::from_str(&result)
            .unwrap_or_else(|_| panic!("result for {} was not JSON: {}", name, result));
        assert!(value.get("error").is_some(), "no error field for {}", name);
    }
}

#[tokio::test]
async fn same_name_from_two_sources_yields_one_entry() {
    let public = vec![ToolSchema::new("search_pubmed", "public variant", json!({}))];
    let discovered = vec![ToolSchema::new("search_pubmed", "server variant", json!({}))];

    let tools = assemble_tool_set(public, discovered, true);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].description, "public variant");
}

#[tokio::test]
async fn discovered_tools_join_a_roles_set_in_allow_list_order() {
    let dispatcher = offline_dispatcher();
    dispatcher
        .register_schema(ToolSchema::new(
            "npi_registry__npi_search",
            "Find providers",
            json!({"type": "object"}),
        ))
        .await;

    let tools = dispatcher.tools_for_role(AgentRole::Connector).await;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "search_pubmed",
            "search_clinical_trials",
            "npi_registry__npi_search"
        ]
    );
    assert_eq!(dispatcher.discovered_tool_count().await, 1);
}

#[tokio::test]
async fn every_role_has_a_deterministic_tool_set() {
    let dispatcher = offline_dispatcher();
    for role in AgentRole::ALL {
        let tools = dispatcher.tools_for_role(role).await;
        // No duplicates in any role's set.
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before, "duplicate tool for {}", role);
    }
}
