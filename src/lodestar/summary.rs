//! Derived narrative summaries over the shared knowledge base.
//!
//! Two on-demand narratives, the lab summary and the researcher briefing,
//! are computed from whatever knowledge has been merged so far and cached
//! per generation token; superseding the mission invalidates both caches
//! automatically. The final synthesis prompt used by the mission
//! supervisor is built here too, so every narrative cap lives in one
//! place.

use crate::lodestar::client_wrapper::{Message, ReasoningClient};
use crate::lodestar::roles::{AgentRole, SUMMARY_MODEL};
use crate::lodestar::state::{GenerationToken, KnowledgeSlot, NarrativeStatus, SharedState};
use crate::lodestar::tool_protocol::truncate_in_place;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Cap on serialized knowledge entering the synthesis prompt.
pub const SYNTHESIS_INPUT_LIMIT: usize = 200_000;
/// Cap on lab data entering the lab-summary prompt.
const LAB_INPUT_LIMIT: usize = 50_000;
/// Cap on agent data entering the researcher-briefing prompt.
const BRIEFING_INPUT_LIMIT: usize = 60_000;

const LAB_MAX_TOKENS: u32 = 1_500;
const BRIEFING_MAX_TOKENS: u32 = 2_000;

/// Rough char-to-token ratio used for logging prompt sizes.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Serialize a subset of knowledge slots, clipped to `limit` bytes.
pub(crate) fn render_knowledge(
    knowledge: &BTreeMap<AgentRole, KnowledgeSlot>,
    roles: &[AgentRole],
    limit: usize,
) -> String {
    let subset: BTreeMap<&str, &KnowledgeSlot> = roles
        .iter()
        .filter_map(|role| knowledge.get(role).map(|slot| (role.as_str(), slot)))
        .collect();
    let mut rendered = serde_json::to_string_pretty(&subset).unwrap_or_default();
    truncate_in_place(&mut rendered, limit);
    rendered
}

/// Prompt for the final synthesis pass over all knowledge slots.
pub fn synthesis_prompt(topic: &str, knowledge_json: &str) -> String {
    format!(
        "You are the Chief Strategist for a rare disease family support team.\n\
         Below is the complete output from {count} specialist AI agents who have been \
         researching {topic}.\n\
         Synthesize ALL findings into a clear, actionable 1-page family briefing with these sections:\n\
         1. **Key Discovery** — The single most important finding\n\
         2. **Treatment Pathways** — Ranked options with status\n\
         3. **Immediate Actions** — 3-5 things the family should do this week\n\
         4. **Research Landscape** — Brief overview of active trials and research groups\n\
         5. **Funding & Regulatory** — Grant opportunities and pathway status\n\n\
         Write for a non-expert family member. Be warm, clear, and action-oriented.\n\n\
         === AGENT OUTPUTS ===\n{knowledge}",
        count = AgentRole::ALL.len(),
        topic = topic,
        knowledge = knowledge_json,
    )
}

fn lab_summary_prompt(topic: &str, lab_data: &str) -> String {
    format!(
        "You are writing for a family member (non-scientist) whose child has {topic}.\n\n\
         Below is technical data from our drug discovery agents (biologist, chemist, \
         preclinician) about potential treatments.\n\n\
         Write a warm, clear 3-4 paragraph summary that:\n\
         1. Explains what the team found in plain language\n\
         2. Highlights the most actionable finding\n\
         3. Lists 2-3 concrete next steps the family could take\n\
         4. Notes any safety considerations in reassuring language\n\n\
         Keep it under 300 words. No jargon. No markdown headers.\n\n\
         === LAB DATA ===\n{data}",
        topic = topic,
        data = lab_data,
    )
}

fn researcher_briefing_prompt(topic: &str, agent_data: &str) -> String {
    format!(
        "Write a professional research briefing document about {topic} that a patient's \
         family can forward to a researcher or specialist.\n\n\
         The briefing should:\n\
         1. Open with a concise clinical summary of the condition\n\
         2. Summarize the computational drug discovery analysis performed\n\
         3. Present the top 2-3 drug repurposing candidates with mechanisms and evidence\n\
         4. Include relevant clinical trial matches\n\
         5. End with specific questions for the researcher\n\n\
         Write in professional scientific language with data points where available.\n\
         Start with: \"RESEARCH BRIEFING: {topic} — Computational Drug Discovery Analysis\"\n\n\
         === AGENT DATA ===\n{data}",
        topic = topic,
        data = agent_data,
    )
}

/// A cached narrative and its progress, as returned to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryView {
    pub status: NarrativeStatus,
    pub result: Option<String>,
    pub generation: Option<GenerationToken>,
}

#[derive(Default)]
struct CacheSlot {
    generation: Option<GenerationToken>,
    status: Option<NarrativeStatus>,
    result: Option<String>,
}

impl CacheSlot {
    fn view(&self) -> SummaryView {
        SummaryView {
            status: self.status.unwrap_or(NarrativeStatus::Idle),
            result: self.result.clone(),
            generation: self.generation.clone(),
        }
    }
}

/// Computes and caches the two derived narratives.
pub struct SummaryEngine {
    state: Arc<SharedState>,
    /// Client for the current mission; replaced on every launch so a
    /// caller-supplied key carries through to summary generation.
    client: RwLock<Option<Arc<dyn ReasoningClient>>>,
    lab: Mutex<CacheSlot>,
    researcher: Mutex<CacheSlot>,
}

impl SummaryEngine {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            state,
            client: RwLock::new(None),
            lab: Mutex::new(CacheSlot::default()),
            researcher: Mutex::new(CacheSlot::default()),
        }
    }

    /// Install the reasoning client for the current mission.
    pub async fn set_client(&self, client: Arc<dyn ReasoningClient>) {
        *self.client.write().await = Some(client);
    }

    /// Family-friendly summary of the drug-discovery findings. Returns a
    /// waiting view until the lab roles have merged data.
    pub async fn lab_summary(&self) -> SummaryView {
        let roles = [
            AgentRole::Biologist,
            AgentRole::Chemist,
            AgentRole::Preclinician,
        ];
        self.generate(
            &self.lab,
            &roles,
            LAB_INPUT_LIMIT,
            LAB_MAX_TOKENS,
            |knowledge| {
                // Lab data exists once targets or candidates landed.
                slot_list_nonempty(knowledge, AgentRole::Biologist, "targets")
                    || slot_list_nonempty(knowledge, AgentRole::Chemist, "repurposing_candidates")
            },
            lab_summary_prompt,
        )
        .await
    }

    /// Technical briefing a family can forward to a researcher.
    pub async fn researcher_briefing(&self) -> SummaryView {
        let roles = [
            AgentRole::Scout,
            AgentRole::Biologist,
            AgentRole::Chemist,
            AgentRole::Preclinician,
            AgentRole::Connector,
        ];
        self.generate(
            &self.researcher,
            &roles,
            BRIEFING_INPUT_LIMIT,
            BRIEFING_MAX_TOKENS,
            |knowledge| {
                slot_list_nonempty(knowledge, AgentRole::Biologist, "targets")
                    || slot_list_nonempty(knowledge, AgentRole::Scout, "findings")
            },
            researcher_briefing_prompt,
        )
        .await
    }

    async fn generate(
        &self,
        cache: &Mutex<CacheSlot>,
        roles: &[AgentRole],
        input_limit: usize,
        max_tokens: u32,
        has_data: impl Fn(&BTreeMap<AgentRole, KnowledgeSlot>) -> bool,
        prompt_for: impl Fn(&str, &str) -> String,
    ) -> SummaryView {
        let current = self.state.current_generation().await;

        {
            let slot = cache.lock().await;
            if slot.generation == current && slot.result.is_some() {
                return slot.view();
            }
        }

        let Some(mission) = self.state.mission_snapshot().await else {
            return SummaryView {
                status: NarrativeStatus::Idle,
                result: None,
                generation: None,
            };
        };
        let knowledge = self.state.knowledge_snapshot().await;
        if !has_data(&knowledge) {
            return SummaryView {
                status: NarrativeStatus::Waiting,
                result: None,
                generation: current,
            };
        }

        let client = match self.client.read().await.clone() {
            Some(client) => client,
            None => {
                return SummaryView {
                    status: NarrativeStatus::Waiting,
                    result: None,
                    generation: current,
                }
            }
        };

        {
            let mut slot = cache.lock().await;
            slot.generation = current.clone();
            slot.status = Some(NarrativeStatus::Generating);
            slot.result = None;
        }

        let data = render_knowledge(&knowledge, roles, input_limit);
        let prompt = prompt_for(&mission.topic, &data);
        let outcome = client
            .send(SUMMARY_MODEL, max_tokens, &[Message::user(prompt)], &[])
            .await;

        // Discard the result if a new mission superseded us mid-call.
        if self.state.current_generation().await != current {
            return SummaryView {
                status: NarrativeStatus::Idle,
                result: None,
                generation: None,
            };
        }

        let mut slot = cache.lock().await;
        match outcome {
            Ok(turn) => {
                slot.status = Some(NarrativeStatus::Complete);
                slot.result = Some(turn.text());
            }
            Err(err) => {
                log::error!("summary generation failed: {}", err);
                let mut message = err.to_string();
                truncate_in_place(&mut message, 100);
                slot.status = Some(NarrativeStatus::Error);
                slot.result = Some(format!("Summary unavailable: {}", message));
            }
        }
        slot.view()
    }
}

fn slot_list_nonempty(
    knowledge: &BTreeMap<AgentRole, KnowledgeSlot>,
    role: AgentRole,
    key: &str,
) -> bool {
    knowledge
        .get(&role)
        .and_then(|slot| slot.fields.get(key))
        .and_then(serde_json::Value::as_array)
        .map(|list| !list.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lodestar::client_wrapper::{ContentBlock, ModelTurn};
    use crate::lodestar::state::{Jurisdiction, Mission, MissionStage};
    use crate::lodestar::tool_protocol::ToolSchema;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::error::Error;

    struct CannedClient(String);

    #[async_trait]
    impl ReasoningClient for CannedClient {
        async fn send(
            &self,
            _model: &str,
            _max_tokens: u32,
            _messages: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<ModelTurn, Box<dyn Error + Send + Sync>> {
            Ok(ModelTurn {
                content: vec![ContentBlock::Text {
                    text: self.0.clone(),
                }],
            })
        }
    }

    async fn seeded_state() -> (Arc<SharedState>, GenerationToken) {
        let state = Arc::new(SharedState::new());
        let generation = GenerationToken::fresh();
        state
            .begin_mission(Mission {
                topic: "CLN3 Batten Disease".into(),
                priorities: vec![],
                journey_stage: "just-diagnosed".into(),
                patient: String::new(),
                jurisdiction: Jurisdiction::Us,
                stage: MissionStage::Launch,
                created_at: Utc::now(),
                generation: generation.clone(),
            })
            .await;
        (state, generation)
    }

    #[tokio::test]
    async fn lab_summary_waits_until_lab_data_exists() {
        let (state, generation) = seeded_state().await;
        let engine = SummaryEngine::new(state.clone());
        engine
            .set_client(Arc::new(CannedClient("briefing text".into())))
            .await;

        assert_eq!(engine.lab_summary().await.status, NarrativeStatus::Waiting);

        state
            .merge_agent_output(
                &generation,
                AgentRole::Biologist,
                "{\"targets\": [{\"gene\": \"CLN3\"}]}",
            )
            .await
            .unwrap();

        let view = engine.lab_summary().await;
        assert_eq!(view.status, NarrativeStatus::Complete);
        assert_eq!(view.result.as_deref(), Some("briefing text"));
    }

    #[tokio::test]
    async fn summary_is_cached_per_generation() {
        let (state, generation) = seeded_state().await;
        let engine = SummaryEngine::new(state.clone());
        engine
            .set_client(Arc::new(CannedClient("first".into())))
            .await;

        state
            .merge_agent_output(&generation, AgentRole::Scout, "{\"findings\": [1]}")
            .await
            .unwrap();

        let first = engine.researcher_briefing().await;
        assert_eq!(first.result.as_deref(), Some("first"));

        // A different canned answer would appear if the cache missed.
        engine
            .set_client(Arc::new(CannedClient("second".into())))
            .await;
        let cached = engine.researcher_briefing().await;
        assert_eq!(cached.result.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn cache_invalidates_when_generation_changes() {
        let (state, generation) = seeded_state().await;
        let engine = SummaryEngine::new(state.clone());
        engine
            .set_client(Arc::new(CannedClient("first".into())))
            .await;
        state
            .merge_agent_output(&generation, AgentRole::Scout, "{\"findings\": [1]}")
            .await
            .unwrap();
        assert_eq!(
            engine.researcher_briefing().await.result.as_deref(),
            Some("first")
        );

        // Supersede: fresh mission, fresh knowledge, fresh client.
        let next = GenerationToken::fresh();
        state
            .begin_mission(Mission {
                topic: "CLN3 Batten Disease".into(),
                priorities: vec![],
                journey_stage: "just-diagnosed".into(),
                patient: String::new(),
                jurisdiction: Jurisdiction::Us,
                stage: MissionStage::Launch,
                created_at: Utc::now(),
                generation: next.clone(),
            })
            .await;
        engine
            .set_client(Arc::new(CannedClient("second".into())))
            .await;
        state
            .merge_agent_output(&next, AgentRole::Scout, "{\"findings\": [2]}")
            .await
            .unwrap();

        assert_eq!(
            engine.researcher_briefing().await.result.as_deref(),
            Some("second")
        );
    }
}
