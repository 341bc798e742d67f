//! The mission controller.
//!
//! Owns mission identity and the agent task pool. `launch` authorizes the
//! caller, allocates a fresh generation token, atomically replaces all
//! shared state and spawns one conversation task per agent role plus a
//! supervisor. The token is the cancellation mechanism: superseding a
//! mission silently invalidates every write still in flight from the
//! previous one. In-flight model and tool calls run to completion; their
//! results are simply discarded.

use crate::lodestar::client_wrapper::{Message, ReasoningClient};
use crate::lodestar::clients::anthropic::AnthropicClient;
use crate::lodestar::config::OrchestratorConfig;
use crate::lodestar::conversation::ConversationEngine;
use crate::lodestar::dispatcher::ToolDispatcher;
use crate::lodestar::roles::{build_prompt, AgentRole, SYNTHESIS_MODEL};
use crate::lodestar::state::{
    AgentStatus, GenerationToken, Jurisdiction, Mission, MissionStage, NarrativeStatus,
    SharedState, SynthesisState, UpdateKind,
};
use crate::lodestar::summary::{
    estimate_tokens, render_knowledge, synthesis_prompt, SummaryEngine, SYNTHESIS_INPUT_LIMIT,
};
use crate::lodestar::tool_protocol::truncate_in_place;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

/// Prefix a caller-supplied API key must carry to be accepted.
const API_KEY_PREFIX: &str = "sk-ant-";
/// Completion budget for the synthesis call.
const SYNTHESIS_MAX_TOKENS: u32 = 4_096;
/// Cap on error text recorded into an agent's update stream.
const ERROR_MESSAGE_LIMIT: usize = 100;
/// Soft-dependency wait: poll interval and attempt bound. The wait is
/// advisory; on timeout the agent proceeds with whatever exists.
const UPSTREAM_POLL_INTERVAL: Duration = Duration::from_secs(5);
const UPSTREAM_POLL_ATTEMPTS: usize = 6;

/// Parameters of a mission launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub topic: String,
    pub priorities: Vec<String>,
    pub journey_stage: String,
    pub patient: String,
    pub jurisdiction: Jurisdiction,
    pub demo: bool,
    /// Shared-secret token, checked against the configured secret.
    pub token: Option<String>,
    /// Caller-supplied API key, accepted when it matches the known prefix.
    pub api_key: Option<String>,
}

impl Default for LaunchRequest {
    fn default() -> Self {
        Self {
            topic: "CLN3 Batten Disease".to_string(),
            priorities: vec![
                "research".to_string(),
                "experts".to_string(),
                "regulatory".to_string(),
                "funding".to_string(),
            ],
            journey_stage: "just-diagnosed".to_string(),
            patient: String::new(),
            jurisdiction: Jurisdiction::Us,
            demo: true,
            token: None,
            api_key: None,
        }
    }
}

/// Accepted launch: the roster that was started and the mission identity.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReceipt {
    pub status: String,
    pub agent_roles: Vec<AgentRole>,
    pub generation: GenerationToken,
}

/// Liveness view: process status plus discovered tool count.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub tools: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// Neither a valid shared-secret token nor an acceptable API key was
    /// supplied. No state was mutated.
    Unauthorized,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::Unauthorized => {
                write!(f, "Provide a valid token or API key to launch agents")
            }
        }
    }
}

impl Error for LaunchError {}

/// Builds the reasoning client for a mission, honoring a caller-supplied
/// key. The seam exists so tests can inject scripted clients.
pub trait ClientFactory: Send + Sync {
    fn client(&self, api_key: Option<&str>) -> Arc<dyn ReasoningClient>;
}

/// Production factory: Anthropic Messages API clients.
pub struct AnthropicFactory;

impl ClientFactory for AnthropicFactory {
    fn client(&self, api_key: Option<&str>) -> Arc<dyn ReasoningClient> {
        Arc::new(AnthropicClient::new(api_key.map(str::to_string)))
    }
}

/// Coordinates the whole mission lifecycle. Cloning is cheap: clones
/// share the same state, dispatcher and caches.
#[derive(Clone)]
pub struct MissionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: OrchestratorConfig,
    state: Arc<SharedState>,
    dispatcher: Arc<ToolDispatcher>,
    summaries: Arc<SummaryEngine>,
    factory: Arc<dyn ClientFactory>,
}

impl MissionController {
    /// Controller with the production Anthropic client factory.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_factory(config, Arc::new(AnthropicFactory))
    }

    /// Controller with a custom client factory.
    pub fn with_factory(config: OrchestratorConfig, factory: Arc<dyn ClientFactory>) -> Self {
        let state = Arc::new(SharedState::new());
        let dispatcher = Arc::new(ToolDispatcher::new(&config));
        let summaries = Arc::new(SummaryEngine::new(state.clone()));
        Self {
            inner: Arc::new(ControllerInner {
                config,
                state,
                dispatcher,
                summaries,
                factory,
            }),
        }
    }

    /// The shared-state owner, for the read surfaces.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.inner.state
    }

    /// The derived-summary engine.
    pub fn summaries(&self) -> &Arc<SummaryEngine> {
        &self.inner.summaries
    }

    /// Startup tool discovery across all configured servers.
    pub async fn discover_tools(&self) {
        self.inner.dispatcher.discover().await;
    }

    /// Liveness plus discovered tool count.
    pub async fn health(&self) -> Health {
        Health {
            status: "ok",
            tools: self.inner.dispatcher.discovered_tool_count().await,
        }
    }

    /// Launch a mission: authorize, supersede any running mission, start
    /// one task per agent role plus a supervisor, and return immediately.
    pub async fn launch(&self, req: LaunchRequest) -> Result<LaunchReceipt, LaunchError> {
        let resolved_key = self.inner.authorize(&req)?;

        let generation = GenerationToken::fresh();
        let mission = Mission {
            topic: req.topic,
            priorities: req.priorities,
            journey_stage: req.journey_stage,
            patient: req.patient,
            jurisdiction: req.jurisdiction,
            stage: MissionStage::Launch,
            created_at: Utc::now(),
            generation: generation.clone(),
        };
        log::info!("launching mission {} for '{}'", generation, mission.topic);
        self.inner.state.begin_mission(mission).await;

        let client = self.inner.factory.client(resolved_key.as_deref());
        self.inner.summaries.set_client(client.clone()).await;

        let inner = Arc::clone(&self.inner);
        let supervisor_generation = generation.clone();
        let demo = req.demo;
        tokio::spawn(async move {
            inner.run_all(supervisor_generation, demo, client).await;
        });

        Ok(LaunchReceipt {
            status: "launched".to_string(),
            agent_roles: AgentRole::ALL.to_vec(),
            generation,
        })
    }
}

impl ControllerInner {
    /// Check the caller's credential before touching any state. Returns
    /// the resolved API key: `None` means "use the server's own".
    fn authorize(&self, req: &LaunchRequest) -> Result<Option<String>, LaunchError> {
        if let (Some(secret), Some(token)) = (&self.config.shared_secret, &req.token) {
            // Constant-time compare on digests; raw comparison would leak
            // a timing oracle on the secret.
            let expected = Sha256::digest(secret.as_bytes());
            let provided = Sha256::digest(token.as_bytes());
            if bool::from(expected.ct_eq(&provided)) {
                return Ok(None);
            }
        }
        if let Some(key) = &req.api_key {
            if key.starts_with(API_KEY_PREFIX) {
                return Ok(Some(key.clone()));
            }
        }
        Err(LaunchError::Unauthorized)
    }

    /// Supervisor: run every agent to completion, then the synthesis pass
    /// and summary pre-generation, then advance the mission stage.
    async fn run_all(
        self: Arc<Self>,
        generation: GenerationToken,
        demo: bool,
        client: Arc<dyn ReasoningClient>,
    ) {
        let engine = Arc::new(ConversationEngine::new(
            client.clone(),
            self.dispatcher.clone(),
        ));

        let handles: Vec<_> = AgentRole::ALL
            .iter()
            .map(|role| {
                let inner = Arc::clone(&self);
                let engine = Arc::clone(&engine);
                let generation = generation.clone();
                let role = *role;
                (
                    role,
                    tokio::spawn(async move {
                        inner
                            .run_agent_iterations(role, &generation, demo, &engine)
                            .await
                    }),
                )
            })
            .collect();

        for (role, handle) in handles {
            let failure = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(join_err) => Some(join_err.to_string()),
            };
            if let Some(mut message) = failure {
                // Per-agent isolation: one failure never aborts siblings.
                log::error!("{} failed: {}", role, message);
                truncate_in_place(&mut message, ERROR_MESSAGE_LIMIT);
                self.state
                    .set_agent_status(&generation, role, AgentStatus::Error, None)
                    .await;
                self.state
                    .push_update(
                        &generation,
                        role,
                        UpdateKind::Status,
                        format!("Error: {}", message),
                        false,
                    )
                    .await;
            }
        }

        if !self.state.is_current(&generation).await {
            log::info!("mission {} superseded, skipping synthesis", generation);
            return;
        }

        // Synthesis and summary pre-generation run concurrently; both are
        // staleness-guarded internally.
        let pre_generate = async {
            self.summaries.lab_summary().await;
            self.summaries.researcher_briefing().await;
        };
        tokio::join!(self.run_synthesis(&generation, &client), pre_generate);

        if self.state.advance_to_roadmap(&generation).await {
            log::info!("mission {} complete", generation);
        }
    }

    /// One agent's full run: all iterations, with a staleness re-check
    /// before and after every suspension point.
    async fn run_agent_iterations(
        &self,
        role: AgentRole,
        generation: &GenerationToken,
        demo: bool,
        engine: &ConversationEngine,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self
            .state
            .set_agent_status(
                generation,
                role,
                AgentStatus::Working,
                Some(role.task_description()),
            )
            .await
        {
            return Ok(());
        }
        self.state
            .push_update(
                generation,
                role,
                UpdateKind::Status,
                format!("Starting {} agent...", role),
                false,
            )
            .await;

        let iterations = role.iterations(demo);
        let model = role.model(demo);

        for iteration in 0..iterations {
            if !self.state.is_current(generation).await {
                log::info!("{} aborted, mission changed", role);
                return Ok(());
            }

            // The strategist's later passes lean on upstream knowledge;
            // wait for some to exist, but never indefinitely.
            if role == AgentRole::Strategist && iteration > 0 {
                self.state
                    .push_update(
                        generation,
                        role,
                        UpdateKind::Status,
                        "Waiting for more agent data...",
                        false,
                    )
                    .await;
                self.wait_for_upstream(generation, role).await;
            }

            if !self
                .state
                .push_update(
                    generation,
                    role,
                    UpdateKind::Status,
                    format!("Iteration {}/{}...", iteration + 1, iterations),
                    false,
                )
                .await
            {
                return Ok(());
            }

            // One acquisition for the whole prompt context snapshot.
            let plan = self.state.plan_snapshot().await;
            let mission = match plan.mission {
                Some(mission) if mission.generation == *generation => mission,
                _ => return Ok(()),
            };
            let prompt = build_prompt(role, &mission, &plan.knowledge, iteration, iterations);

            let result = engine.run(role, prompt, model).await?;

            // The conversation can run for minutes; re-check before writing.
            if !self.state.is_current(generation).await {
                log::info!("{} aborted after model call, mission changed", role);
                return Ok(());
            }

            let outcome = match self
                .state
                .merge_agent_output(generation, role, &result.final_text)
                .await
            {
                Some(outcome) => outcome,
                None => return Ok(()),
            };
            self.state
                .add_tool_calls(generation, role, result.tool_calls)
                .await;

            if outcome.parsed {
                if let Some(line) = outcome.summary.status_line {
                    self.state
                        .push_update(generation, role, UpdateKind::Status, line, true)
                        .await;
                }
                for finding in outcome.summary.findings {
                    self.state
                        .push_update(generation, role, UpdateKind::Finding, finding, true)
                        .await;
                }
            } else {
                self.state
                    .push_update(
                        generation,
                        role,
                        UpdateKind::Status,
                        "Output was not structured; kept for review",
                        false,
                    )
                    .await;
            }

            log::info!(
                "{} iteration {}/{} complete",
                role,
                iteration + 1,
                iterations
            );
        }

        if self.state.is_current(generation).await {
            self.state
                .set_agent_status(generation, role, AgentStatus::Complete, None)
                .await;
        }
        Ok(())
    }

    /// Bounded poll until any other role has merged knowledge. Timing out
    /// is fine; partial upstream data must never stall the mission.
    async fn wait_for_upstream(&self, generation: &GenerationToken, role: AgentRole) {
        for _ in 0..UPSTREAM_POLL_ATTEMPTS {
            if !self.state.is_current(generation).await {
                return;
            }
            if self.state.has_foreign_knowledge(role).await {
                return;
            }
            tokio::time::sleep(UPSTREAM_POLL_INTERVAL).await;
        }
        log::warn!("{}: upstream wait timed out, proceeding", role);
    }

    /// The synthesis pass: all knowledge, one model call, one narrative.
    async fn run_synthesis(&self, generation: &GenerationToken, client: &Arc<dyn ReasoningClient>) {
        if !self
            .state
            .set_synthesis(
                generation,
                SynthesisState {
                    status: NarrativeStatus::Generating,
                    result: None,
                    token_estimate: None,
                },
            )
            .await
        {
            return;
        }

        let plan = self.state.plan_snapshot().await;
        let mission = match plan.mission {
            Some(mission) if mission.generation == *generation => mission,
            _ => return,
        };

        let knowledge_json =
            render_knowledge(&plan.knowledge, &AgentRole::ALL, SYNTHESIS_INPUT_LIMIT);
        let estimate = estimate_tokens(&knowledge_json);
        log::info!(
            "synthesis pass: ~{} tokens from {} agents",
            estimate,
            plan.knowledge.len()
        );

        let prompt = synthesis_prompt(&mission.topic, &knowledge_json);
        let synthesis = match client
            .send(
                SYNTHESIS_MODEL,
                SYNTHESIS_MAX_TOKENS,
                &[Message::user(prompt)],
                &[],
            )
            .await
        {
            Ok(turn) => SynthesisState {
                status: NarrativeStatus::Complete,
                result: Some(turn.text()),
                token_estimate: Some(estimate),
            },
            Err(err) => {
                log::error!("synthesis failed: {}", err);
                let mut message = err.to_string();
                truncate_in_place(&mut message, 200);
                SynthesisState {
                    status: NarrativeStatus::Error,
                    result: Some(message),
                    token_estimate: Some(estimate),
                }
            }
        };

        // set_synthesis re-checks the token, so a mission launched while
        // the model call was in flight silently discards this result.
        self.state.set_synthesis(generation, synthesis).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lodestar::client_wrapper::{ContentBlock, ModelTurn};
    use crate::lodestar::tool_protocol::ToolSchema;
    use async_trait::async_trait;

    struct EchoClient;

    #[async_trait]
    impl ReasoningClient for EchoClient {
        async fn send(
            &self,
            _model: &str,
            _max_tokens: u32,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>> {
            Ok(ModelTurn {
                content: vec![ContentBlock::Text { text: "{}".into() }],
            })
        }
    }

    struct EchoFactory;

    impl ClientFactory for EchoFactory {
        fn client(&self, _api_key: Option<&str>) -> Arc<dyn ReasoningClient> {
            Arc::new(EchoClient)
        }
    }

    fn controller_with_secret(secret: Option<&str>) -> MissionController {
        let config = OrchestratorConfig {
            tool_servers: std::collections::HashMap::new(),
            shared_secret: secret.map(str::to_string),
            ..OrchestratorConfig::default()
        };
        MissionController::with_factory(config, Arc::new(EchoFactory))
    }

    #[tokio::test]
    async fn launch_without_credentials_is_rejected_before_mutation() {
        let controller = controller_with_secret(Some("s3cret"));
        let err = controller
            .launch(LaunchRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err, LaunchError::Unauthorized);
        assert!(controller.state().mission_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn wrong_token_and_malformed_key_are_rejected() {
        let controller = controller_with_secret(Some("s3cret"));
        let req = LaunchRequest {
            token: Some("guess".into()),
            api_key: Some("sk-openai-nope".into()),
            ..LaunchRequest::default()
        };
        assert!(controller.launch(req).await.is_err());
    }

    #[tokio::test]
    async fn shared_secret_launches_with_server_key() {
        let controller = controller_with_secret(Some("s3cret"));
        let receipt = controller
            .launch(LaunchRequest {
                token: Some("s3cret".into()),
                ..LaunchRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(receipt.status, "launched");
        assert_eq!(receipt.agent_roles.len(), 8);
    }

    #[tokio::test]
    async fn caller_key_with_known_prefix_is_accepted() {
        let controller = controller_with_secret(None);
        let receipt = controller
            .launch(LaunchRequest {
                api_key: Some("sk-ant-api03-abc".into()),
                ..LaunchRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(receipt.status, "launched");
    }

    #[tokio::test]
    async fn health_reports_discovered_tools() {
        let controller = controller_with_secret(None);
        let health = controller.health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.tools, 0);
    }
}
