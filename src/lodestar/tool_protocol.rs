//! Tool schema and error types shared by the registry, the dispatcher and
//! the conversation engine.
//!
//! A [`ToolSchema`] is the unit of currency for everything tool-related:
//! discovery caches them, per-role allow-lists select them, and the
//! reasoning client serializes them into the model request. Schemas are
//! immutable after discovery.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Separator between a server namespace and the tool name it exported,
/// e.g. `clinical_trials__search_trials`.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// How a tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Dispatched by this process: a built-in public lookup or a proxied
    /// tool-server call.
    Custom,
    /// Executed server-side by the model provider; never routed through
    /// the dispatcher.
    WebSearch,
}

/// Declared interface of a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments, kept as raw JSON since it is
    /// only ever relayed, never interpreted here.
    pub input_schema: serde_json::Value,
    pub kind: ToolKind,
}

impl ToolSchema {
    /// Schema for a dispatcher-routed tool.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            kind: ToolKind::Custom,
        }
    }

    /// The generic open-ended search capability handed to roles with no
    /// allow-listed tools.
    pub fn web_search() -> Self {
        Self {
            name: "web_search".to_string(),
            description: "Open-ended web search".to_string(),
            input_schema: serde_json::json!({ "max_uses": 8 }),
            kind: ToolKind::WebSearch,
        }
    }
}

/// Join a server namespace and tool name into the registry key.
///
/// Dashes in the server name are normalized to underscores so the combined
/// name stays a valid model-facing identifier.
pub fn namespaced(server: &str, tool: &str) -> String {
    format!("{}{}{}", server.replace('-', "_"), NAMESPACE_SEPARATOR, tool)
}

/// Split a namespaced tool name back into `(server, tool)`.
///
/// The returned server name has underscores restored to dashes, matching
/// the configured server map. Returns `None` when the name carries no
/// namespace.
pub fn split_namespaced(name: &str) -> Option<(String, &str)> {
    let (ns, tool) = name.split_once(NAMESPACE_SEPARATOR)?;
    Some((ns.replace('_', "-"), tool))
}

/// Failures on the tool path. These never escape the dispatcher: they are
/// rendered into a structured error string and handed back to the model as
/// the tool result.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// The tool name matches neither a public tool nor a namespaced form.
    UnknownTool(String),
    /// The namespace does not map to any configured tool server.
    UnknownServer(String),
    /// Network-level failure talking to an upstream server.
    Transport(String),
    /// Upstream answered with a non-success HTTP status.
    UpstreamStatus(String),
    /// Upstream payload could not be decoded or violated the protocol.
    Malformed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "Unknown tool: {}", name),
            ToolError::UnknownServer(server) => write!(f, "Unknown server: {}", server),
            ToolError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ToolError::UpstreamStatus(msg) => write!(f, "Upstream returned {}", msg),
            ToolError::Malformed(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl Error for ToolError {}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        ToolError::Transport(err.to_string())
    }
}

/// Render a tool failure as the JSON error string returned to the model.
pub fn error_payload(tool_name: &str, err: &ToolError) -> String {
    serde_json::json!({ "error": err.to_string(), "tool": tool_name }).to_string()
}

/// Truncate a string to at most `limit` bytes, backing off to the nearest
/// char boundary. Tool results, prompt context and error snippets all get
/// clipped through here before entering a prompt.
pub fn truncate_in_place(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespacing_round_trip() {
        let key = namespaced("clinical-trials", "search_trials");
        assert_eq!(key, "clinical_trials__search_trials");

        let (server, tool) = split_namespaced(&key).unwrap();
        assert_eq!(server, "clinical-trials");
        assert_eq!(tool, "search_trials");
    }

    #[test]
    fn split_rejects_plain_names() {
        assert!(split_namespaced("search_pubmed").is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut text = "αβγδ".to_string();
        truncate_in_place(&mut text, 3);
        assert_eq!(text, "α");
    }

    #[test]
    fn error_payload_is_json() {
        let payload = error_payload("x__y", &ToolError::UnknownServer("x".into()));
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["tool"], "x__y");
        assert!(value["error"].as_str().unwrap().contains("Unknown server"));
    }
}
