//! Anthropic Messages API client.
//!
//! Speaks the native tool-use wire format: tool schemas go up with the
//! request, `tool_use` blocks come back down, and `tool_result` blocks are
//! sent on the next turn. Unknown block types in the response (server-side
//! search results and the like) are skipped rather than rejected, since the
//! conversation engine only ever consumes text and tool-invocation blocks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lodestar::client_wrapper::{Message, ReasoningClient};
//! use lodestar::clients::anthropic::AnthropicClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = AnthropicClient::new(std::env::var("ANTHROPIC_API_KEY").ok());
//! let turn = client
//!     .send(
//!         "claude-haiku-4-5",
//!         1024,
//!         &[Message::user("One sentence on CLN3.")],
//!         &[],
//!     )
//!     .await?;
//! println!("{}", turn.text());
//! # Ok(())
//! # }
//! ```

use crate::lodestar::client_wrapper::{ContentBlock, Message, ModelTurn, ReasoningClient};
use crate::lodestar::tool_protocol::{ToolKind, ToolSchema};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Failure talking to the Messages API.
#[derive(Debug)]
pub enum AnthropicError {
    Transport(String),
    Status { code: u16, body: String },
    Malformed(String),
}

impl fmt::Display for AnthropicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnthropicError::Transport(msg) => write!(f, "Anthropic transport error: {}", msg),
            AnthropicError::Status { code, body } => {
                write!(f, "Anthropic API returned {}: {}", code, body)
            }
            AnthropicError::Malformed(msg) => write!(f, "Malformed Anthropic response: {}", msg),
        }
    }
}

impl Error for AnthropicError {}

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicClient {
    /// Create a client. With `None` the key is read from the
    /// `ANTHROPIC_API_KEY` environment variable at call time, so a
    /// caller-supplied key always wins over the server's own.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a custom Messages-compatible base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Share an existing connection pool instead of building a fresh one.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn resolve_key(&self) -> Result<String, AnthropicError> {
        match &self.api_key {
            Some(key) => Ok(key.clone()),
            None => std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
                AnthropicError::Transport("no API key configured and ANTHROPIC_API_KEY unset".into())
            }),
        }
    }

    fn tool_payload(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| match tool.kind {
                ToolKind::Custom => json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                }),
                // Server-side tool: declared by type, executed by the
                // provider, never routed back through the dispatcher.
                ToolKind::WebSearch => json!({
                    "type": WEB_SEARCH_TOOL_TYPE,
                    "name": tool.name,
                    "max_uses": tool.input_schema.get("max_uses").cloned().unwrap_or(json!(8)),
                }),
            })
            .collect()
    }

    fn parse_content(body: &Value) -> Result<Vec<ContentBlock>, AnthropicError> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| AnthropicError::Malformed("missing content array".into()))?;

        let mut content = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        content.push(ContentBlock::Text {
                            text: text.to_string(),
                        });
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| AnthropicError::Malformed("tool_use without id".into()))?;
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| AnthropicError::Malformed("tool_use without name".into()))?;
                    content.push(ContentBlock::ToolUse {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: block.get("input").cloned().unwrap_or(json!({})),
                    });
                }
                // Server tool traffic, thinking blocks, future types.
                _ => continue,
            }
        }
        Ok(content)
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    async fn send(
        &self,
        model: &str,
        max_tokens: u32,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>> {
        let key = self.resolve_key()?;

        let mut payload = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": messages,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(Self::tool_payload(tools));
        }

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AnthropicError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            crate::lodestar::tool_protocol::truncate_in_place(&mut body, 500);
            return Err(Box::new(AnthropicError::Status {
                code: status.as_u16(),
                body,
            }));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AnthropicError::Malformed(e.to_string()))?;

        Ok(ModelTurn {
            content: Self::parse_content(&body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_to_wire_format() {
        let msg = Message::tool_results(vec![("toolu_1".into(), "{\"total\":0}".into())]);
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn parse_content_skips_unknown_blocks() {
        let body = json!({
            "content": [
                {"type": "server_tool_use", "id": "srvtoolu_1", "name": "web_search"},
                {"type": "text", "text": "answer"},
                {"type": "tool_use", "id": "toolu_2", "name": "search_pubmed", "input": {"query": "x"}},
            ]
        });
        let content = AnthropicClient::parse_content(&body).unwrap();
        assert_eq!(content.len(), 2);
        match &content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "answer"),
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[test]
    fn web_search_tool_serializes_by_type() {
        let tools = vec![ToolSchema::web_search()];
        let payload = AnthropicClient::tool_payload(&tools);
        assert_eq!(payload[0]["type"], WEB_SEARCH_TOOL_TYPE);
        assert_eq!(payload[0]["max_uses"], 8);
    }
}
