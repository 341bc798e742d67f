//! The reasoning-model seam.
//!
//! A [`ReasoningClient`] is a wrapper around one model provider. It takes a
//! message transcript plus the tool schemas the agent is allowed to use and
//! returns a single [`ModelTurn`]: either plain text, or one or more
//! tool-invocation requests that the conversation engine must answer before
//! the exchange can continue. The wrapper holds no conversation state; the
//! transcript lives in the engine.

use crate::lodestar::tool_protocol::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Message author, as understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of a message. Assistant turns mix `Text` and `ToolUse`;
/// tool answers travel back as `ToolResult` blocks in a user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A single transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// A plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// An assistant message carrying the blocks the model produced.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// A user message answering earlier tool invocations, one result block
    /// per `(tool_use_id, result_text)` pair, order preserved.
    pub fn tool_results(results: Vec<(String, String)>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|(tool_use_id, content)| ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                })
                .collect(),
        }
    }
}

/// A parsed tool-invocation request from the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Correlation id; the answering `ToolResult` block must echo it.
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// What the model produced for one turn.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: Vec<ContentBlock>,
}

impl ModelTurn {
    /// Tool-invocation requests in the order the model emitted them.
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of the turn's plain-text segments. Non-text blocks
    /// (server-side search results and the like) are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Interface to one reasoning-model provider.
///
/// Implementations are stateless per call and must be cheap to share
/// behind an `Arc` across concurrently running agents.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send the transcript and allowed tool set, get back one turn.
    async fn send(
        &self,
        model: &str,
        max_tokens: u32,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_text_joins_only_text_blocks() {
        let turn = ModelTurn {
            content: vec![
                ContentBlock::Text {
                    text: "first".into(),
                },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "search_pubmed".into(),
                    input: serde_json::json!({"query": "CLN3"}),
                },
                ContentBlock::Text {
                    text: "second".into(),
                },
            ],
        };
        assert_eq!(turn.text(), "first\nsecond");
        assert_eq!(turn.tool_invocations().len(), 1);
        assert_eq!(turn.tool_invocations()[0].id, "t1");
    }

    #[test]
    fn tool_results_preserve_order() {
        let msg = Message::tool_results(vec![
            ("a".to_string(), "one".to_string()),
            ("b".to_string(), "two".to_string()),
        ]);
        assert_eq!(msg.content.len(), 2);
        match &msg.content[0] {
            ContentBlock::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "a"),
            other => panic!("unexpected block: {:?}", other),
        }
    }
}
