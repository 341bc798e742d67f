//! # Lodestar
//!
//! Lodestar is a mission-orchestration core for a fixed roster of
//! LLM-driven research agents that run concurrently against a shared,
//! mutable knowledge base. One mission launch spawns every agent role at
//! once; each agent iterates a bounded tool-use conversation with its
//! reasoning model, and its output is folded tolerantly back into
//! knowledge the other agents read on their next pass.
//!
//! The crate provides carefully layered abstractions for:
//!
//! * **Mission control**: [`mission::MissionController`] owns mission
//!   identity and the agent task pool. Launching a new mission atomically
//!   supersedes the previous one; superseded work cancels cooperatively
//!   through generation-token checks, never by forced termination.
//! * **Conversations with tools**: [`conversation::ConversationEngine`]
//!   drives one agent's bounded multi-turn exchange, answering every
//!   tool-invocation request through the shared dispatcher.
//! * **Tool routing**: [`dispatcher::ToolDispatcher`] unions built-in
//!   public biomedical lookups ([`public_tools`]) with tools discovered
//!   from JSON-RPC tool servers ([`mcp`]), and degrades every failure to
//!   a structured error string the model can react to.
//! * **Knowledge merging**: [`knowledge`] recovers JSON from messy model
//!   output through an explicit extraction pipeline and projects it into
//!   per-role knowledge slots.
//! * **Shared state**: [`state::SharedState`] is the single owner of all
//!   mutable mission data, guarded by one critical section per access.
//! * **Derived narratives**: [`summary::SummaryEngine`] computes cached
//!   per-mission summaries from whatever knowledge exists so far.
//!
//! The HTTP layer, prompt template text and model inference itself are
//! external collaborators: the reasoning model hides behind the
//! [`client_wrapper::ReasoningClient`] trait, with an Anthropic Messages
//! API implementation in [`clients::anthropic`].
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use lodestar::config::OrchestratorConfig;
//! use lodestar::mission::{LaunchRequest, MissionController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     lodestar::init_logger();
//!
//!     let controller = MissionController::new(OrchestratorConfig::from_env());
//!     controller.discover_tools().await;
//!
//!     let receipt = controller
//!         .launch(LaunchRequest {
//!             topic: "CLN3 Batten Disease".into(),
//!             api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
//!             ..LaunchRequest::default()
//!         })
//!         .await?;
//!     println!("launched {} agents", receipt.agent_roles.len());
//!
//!     // Poll the read surfaces while agents work.
//!     let view = controller.state().state_snapshot().await;
//!     println!("{} agents tracked", view.agents.len());
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Lightweight so embedding applications can opt in to `RUST_LOG` driven
/// diagnostics without committing to a logging backend of their own.
///
/// ```rust
/// lodestar::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `lodestar` module.
pub mod lodestar;

// Re-exporting key items for easier external access.
pub use crate::lodestar::client_wrapper;
pub use crate::lodestar::client_wrapper::{
    ContentBlock, Message, ModelTurn, ReasoningClient, Role, ToolInvocation,
};
pub use crate::lodestar::clients;
pub use crate::lodestar::config;
pub use crate::lodestar::config::OrchestratorConfig;
pub use crate::lodestar::conversation;
pub use crate::lodestar::conversation::{ConversationEngine, ConversationResult};
pub use crate::lodestar::dispatcher;
pub use crate::lodestar::dispatcher::ToolDispatcher;
pub use crate::lodestar::knowledge;
pub use crate::lodestar::mcp;
pub use crate::lodestar::mission;
pub use crate::lodestar::mission::{LaunchError, LaunchRequest, MissionController};
pub use crate::lodestar::public_tools;
pub use crate::lodestar::roles;
pub use crate::lodestar::roles::AgentRole;
pub use crate::lodestar::state;
pub use crate::lodestar::state::{GenerationToken, SharedState};
pub use crate::lodestar::summary;
pub use crate::lodestar::tool_protocol;
pub use crate::lodestar::tool_protocol::{ToolError, ToolSchema};
