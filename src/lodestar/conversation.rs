//! The per-agent conversation engine.
//!
//! Drives one bounded multi-turn exchange with the reasoning model. Each
//! turn sends the running transcript plus the agent's allowed tool set;
//! tool-invocation requests are dispatched in the order received, their
//! results truncated and appended as correlated tool-result blocks, and
//! the loop continues until the model answers with text only or the turn
//! cap runs out.

use crate::lodestar::client_wrapper::{Message, ReasoningClient};
use crate::lodestar::dispatcher::ToolDispatcher;
use crate::lodestar::roles::AgentRole;
use crate::lodestar::tool_protocol::truncate_in_place;
use std::error::Error;
use std::sync::Arc;

/// Hard cap on model turns per agent iteration.
pub const MAX_TURNS: usize = 15;
/// Cap on a single tool result entering the transcript.
pub const TOOL_RESULT_LIMIT: usize = 15_000;
/// Non-fatal sentinel returned when the cap is exhausted without a final
/// text-only response.
pub const MAX_TURNS_SENTINEL: &str = "(max tool turns reached)";
/// Completion budget per model call.
const MAX_COMPLETION_TOKENS: u32 = 16_384;

/// Result of one agent iteration.
#[derive(Debug, Clone)]
pub struct ConversationResult {
    pub final_text: String,
    pub tool_calls: u64,
}

/// Runs bounded tool-use conversations against a shared dispatcher.
pub struct ConversationEngine {
    client: Arc<dyn ReasoningClient>,
    dispatcher: Arc<ToolDispatcher>,
}

impl ConversationEngine {
    pub fn new(client: Arc<dyn ReasoningClient>, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { client, dispatcher }
    }

    /// Run one agent iteration to completion.
    ///
    /// Tool failures never surface here: the dispatcher degrades them to
    /// error strings the model can react to. An `Err` from this method
    /// means the model call itself failed; the caller decides what that
    /// does to the agent.
    pub async fn run(
        &self,
        role: AgentRole,
        prompt: String,
        model: &str,
    ) -> Result<ConversationResult, Box<dyn Error + Send + Sync>> {
        let tools = self.dispatcher.tools_for_role(role).await;
        log::info!(
            "{}: starting conversation with {} tools on {}",
            role,
            tools.len(),
            model
        );

        let mut messages = vec![Message::user(prompt)];
        let mut tool_calls: u64 = 0;

        for turn in 0..MAX_TURNS {
            let response = self
                .client
                .send(model, MAX_COMPLETION_TOKENS, &messages, &tools)
                .await?;

            let invocations = response.tool_invocations();
            if invocations.is_empty() {
                log::info!(
                    "{}: finished after {} turns, {} tool calls",
                    role,
                    turn + 1,
                    tool_calls
                );
                return Ok(ConversationResult {
                    final_text: response.text(),
                    tool_calls,
                });
            }

            tool_calls += invocations.len() as u64;
            messages.push(Message::assistant(response.content));

            // Dispatch in the order received; each result is truncated and
            // correlated back to its invocation id.
            let mut results = Vec::with_capacity(invocations.len());
            for invocation in invocations {
                log::debug!("{}: tool call {} ({})", role, invocation.name, invocation.id);
                let mut result = self.dispatcher.invoke(&invocation.name, &invocation.input).await;
                truncate_in_place(&mut result, TOOL_RESULT_LIMIT);
                results.push((invocation.id, result));
            }
            messages.push(Message::tool_results(results));
        }

        log::warn!("{}: turn cap reached with {} tool calls", role, tool_calls);
        Ok(ConversationResult {
            final_text: MAX_TURNS_SENTINEL.to_string(),
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lodestar::client_wrapper::{ContentBlock, ModelTurn};
    use crate::lodestar::config::OrchestratorConfig;
    use crate::lodestar::tool_protocol::ToolSchema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A model that demands the same tool call on every turn.
    struct RelentlessToolCaller {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningClient for RelentlessToolCaller {
        async fn send(
            &self,
            _model: &str,
            _max_tokens: u32,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModelTurn {
                content: vec![ContentBlock::ToolUse {
                    id: format!("toolu_{}", n),
                    name: "nowhere__lookup".to_string(),
                    input: serde_json::json!({}),
                }],
            })
        }
    }

    /// A model that answers with text once it sees a tool result.
    struct OneShotToolCaller;

    #[async_trait]
    impl ReasoningClient for OneShotToolCaller {
        async fn send(
            &self,
            _model: &str,
            _max_tokens: u32,
            messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>> {
            let saw_tool_result = messages.iter().any(|m| {
                m.content
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
            });
            if saw_tool_result {
                // Echo the result id back as text so the test can check
                // correlation survived the round trip.
                let id = messages
                    .iter()
                    .rev()
                    .find_map(|m| {
                        m.content.iter().find_map(|b| match b {
                            ContentBlock::ToolResult { tool_use_id, .. } => {
                                Some(tool_use_id.clone())
                            }
                            _ => None,
                        })
                    })
                    .unwrap_or_default();
                Ok(ModelTurn {
                    content: vec![ContentBlock::Text {
                        text: format!("done after {}", id),
                    }],
                })
            } else {
                Ok(ModelTurn {
                    content: vec![ContentBlock::ToolUse {
                        id: "toolu_first".to_string(),
                        name: "nowhere__lookup".to_string(),
                        input: serde_json::json!({"q": 1}),
                    }],
                })
            }
        }
    }

    fn engine(client: Arc<dyn ReasoningClient>) -> ConversationEngine {
        let config = OrchestratorConfig {
            tool_servers: std::collections::HashMap::new(),
            ..OrchestratorConfig::default()
        };
        ConversationEngine::new(client, Arc::new(ToolDispatcher::new(&config)))
    }

    #[tokio::test]
    async fn relentless_tool_caller_hits_sentinel_not_hang() {
        let engine = engine(Arc::new(RelentlessToolCaller {
            calls: AtomicUsize::new(0),
        }));
        let result = engine
            .run(AgentRole::Scout, "go".into(), "mock-model")
            .await
            .unwrap();
        assert_eq!(result.final_text, MAX_TURNS_SENTINEL);
        assert_eq!(result.tool_calls, MAX_TURNS as u64);
    }

    #[tokio::test]
    async fn tool_result_is_correlated_by_invocation_id() {
        let engine = engine(Arc::new(OneShotToolCaller));
        let result = engine
            .run(AgentRole::Scout, "go".into(), "mock-model")
            .await
            .unwrap();
        assert_eq!(result.final_text, "done after toolu_first");
        assert_eq!(result.tool_calls, 1);
    }

    #[tokio::test]
    async fn plain_text_response_ends_on_first_turn() {
        struct TextOnly;
        #[async_trait]
        impl ReasoningClient for TextOnly {
            async fn send(
                &self,
                _model: &str,
                _max_tokens: u32,
                _messages: &[Message],
                _tools: &[ToolSchema],
            ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>> {
                Ok(ModelTurn {
                    content: vec![
                        ContentBlock::Text { text: "part one".into() },
                        ContentBlock::Text { text: "part two".into() },
                    ],
                })
            }
        }

        let engine = engine(Arc::new(TextOnly));
        let result = engine
            .run(AgentRole::Strategist, "go".into(), "mock-model")
            .await
            .unwrap();
        assert_eq!(result.final_text, "part one\npart two");
        assert_eq!(result.tool_calls, 0);
    }
}
