//! The closed roster of agent roles and their per-role tables.
//!
//! Every role-specific decision (model tier, iteration count, tool
//! allow-lists, task description, prompt preamble) is a match on
//! [`AgentRole`], so adding a role is a localized extension rather than an
//! edit to scattered branch chains.

use crate::lodestar::state::{KnowledgeSlot, Mission};
use crate::lodestar::tool_protocol::truncate_in_place;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reasoning tier used for the final synthesis pass.
pub const SYNTHESIS_MODEL: &str = "claude-opus-4-6";
/// Mid tier used for the derived narrative summaries.
pub const SUMMARY_MODEL: &str = "claude-sonnet-4-5-20250929";

const OPUS: &str = "claude-opus-4-6";
const HAIKU: &str = "claude-haiku-4-5-20251001";

/// Per-foreign-role cap on knowledge context embedded into a prompt.
const KNOWLEDGE_CONTEXT_LIMIT: usize = 4_000;

/// One of the fixed agent roles. The set is closed: mission state, tool
/// routing and knowledge slots are all keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Scout,
    Connector,
    Navigator,
    Mobilizer,
    Strategist,
    Biologist,
    Chemist,
    Preclinician,
}

impl AgentRole {
    /// Every role, in launch order.
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Scout,
        AgentRole::Connector,
        AgentRole::Navigator,
        AgentRole::Mobilizer,
        AgentRole::Strategist,
        AgentRole::Biologist,
        AgentRole::Chemist,
        AgentRole::Preclinician,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Scout => "scout",
            AgentRole::Connector => "connector",
            AgentRole::Navigator => "navigator",
            AgentRole::Mobilizer => "mobilizer",
            AgentRole::Strategist => "strategist",
            AgentRole::Biologist => "biologist",
            AgentRole::Chemist => "chemist",
            AgentRole::Preclinician => "preclinician",
        }
    }

    /// Model tier for this role. Demo mode pushes everything but the two
    /// synthesis-heavy roles down to the fast tier.
    pub fn model(&self, demo: bool) -> &'static str {
        if demo {
            match self {
                AgentRole::Strategist | AgentRole::Chemist => OPUS,
                _ => HAIKU,
            }
        } else {
            match self {
                AgentRole::Connector | AgentRole::Mobilizer | AgentRole::Preclinician => HAIKU,
                _ => OPUS,
            }
        }
    }

    /// How many research iterations this role runs. One each in demo mode.
    pub fn iterations(&self, demo: bool) -> usize {
        if demo {
            return 1;
        }
        match self {
            AgentRole::Navigator | AgentRole::Mobilizer => 1,
            _ => 2,
        }
    }

    /// Human-readable task line shown while the agent is working.
    pub fn task_description(&self) -> &'static str {
        match self {
            AgentRole::Scout => "Searching medical literature and clinical trials",
            AgentRole::Connector => "Identifying researchers and drafting outreach",
            AgentRole::Navigator => "Mapping regulatory pathways",
            AgentRole::Mobilizer => "Finding grants and funding opportunities",
            AgentRole::Strategist => "Synthesizing findings and building roadmap",
            AgentRole::Biologist => "Analyzing disease mechanism and identifying drug targets",
            AgentRole::Chemist => "Screening compounds and evaluating drug candidates",
            AgentRole::Preclinician => "Evaluating ADMET profiles and designing experiments",
        }
    }

    /// Discovered tools this role may call, by namespaced name.
    pub fn discovered_allow_list(&self) -> &'static [&'static str] {
        match self {
            AgentRole::Scout => &[
                "biorxiv__search_preprints",
                "biorxiv__get_preprint",
                "clinical_trials__search_trials",
                "clinical_trials__get_trial_details",
                "chembl__compound_search",
                "chembl__target_search",
                "chembl__drug_search",
                "chembl__get_mechanism",
            ],
            AgentRole::Connector => &[
                "npi_registry__npi_search",
                "npi_registry__npi_lookup",
                "clinical_trials__search_investigators",
            ],
            AgentRole::Navigator => &[
                "cms_coverage__search_national_coverage",
                "cms_coverage__search_local_coverage",
                "clinical_trials__search_by_eligibility",
            ],
            AgentRole::Mobilizer => &[
                "clinical_trials__search_by_sponsor",
                "biorxiv__search_by_funder",
            ],
            AgentRole::Strategist => &[],
            AgentRole::Biologist => &[
                "chembl__target_search",
                "chembl__get_bioactivity",
                "biorxiv__search_preprints",
                "biorxiv__get_preprint",
            ],
            AgentRole::Chemist => &[
                "chembl__get_bioactivity",
                "chembl__drug_search",
                "chembl__compound_search",
                "chembl__get_mechanism",
            ],
            AgentRole::Preclinician => &[
                "chembl__get_admet",
                "chembl__get_bioactivity",
                "chembl__compound_search",
            ],
        }
    }

    /// Built-in public tools this role may call.
    pub fn public_allow_list(&self) -> &'static [&'static str] {
        match self {
            AgentRole::Scout => &[
                "search_clinical_trials",
                "get_trial_details",
                "search_pubmed",
                "search_chembl_compound",
            ],
            AgentRole::Connector => &["search_pubmed", "search_clinical_trials"],
            AgentRole::Navigator => &["search_clinical_trials", "search_openfda_orphan"],
            AgentRole::Mobilizer => &["search_clinical_trials", "search_pubmed"],
            AgentRole::Strategist => &[],
            AgentRole::Biologist => &[
                "search_chembl_target",
                "search_chembl_bioactivity",
                "search_open_targets",
                "search_pubmed",
            ],
            AgentRole::Chemist => &[
                "search_chembl_compound",
                "search_chembl_target",
                "search_chembl_bioactivity",
            ],
            AgentRole::Preclinician => &[
                "search_chembl_compound",
                "search_chembl_bioactivity",
                "search_pubmed",
            ],
        }
    }

    /// The strategist synthesizes from shared knowledge only; it never
    /// receives the generic search fallback either.
    pub fn allows_search_fallback(&self) -> bool {
        !matches!(self, AgentRole::Strategist)
    }

    /// One-paragraph persona used as the prompt preamble.
    fn persona(&self) -> &'static str {
        match self {
            AgentRole::Scout => {
                "You are the Scout: you survey preprints, publications and clinical \
                 trials to map what is known about the disease. Report findings with \
                 sources and flag promising leads for the other agents."
            }
            AgentRole::Connector => {
                "You are the Connector: you identify researchers, clinicians and \
                 investigators worth contacting, and draft the outreach for each."
            }
            AgentRole::Navigator => {
                "You are the Navigator: you map the regulatory pathways available to \
                 this family, including orphan designations and coverage decisions."
            }
            AgentRole::Mobilizer => {
                "You are the Mobilizer: you find grants, funders, advocacy groups and \
                 partnership opportunities that could finance the research program."
            }
            AgentRole::Strategist => {
                "You are the Strategist: you weigh everything the other agents found \
                 and produce a weekly briefing with a master roadmap, ranked \
                 priorities and open questions for the family."
            }
            AgentRole::Biologist => {
                "You are the Biologist: you analyze the disease mechanism and rank \
                 therapeutic targets with the supporting evidence."
            }
            AgentRole::Chemist => {
                "You are the Chemist: you screen compounds against the identified \
                 targets and rank repurposing and novel candidates."
            }
            AgentRole::Preclinician => {
                "You are the Preclinician: you evaluate candidate safety and ADMET \
                 profiles and design the validation experiments."
            }
        }
    }

    /// The keys this role is expected to emit, spelled out so the model's
    /// JSON lands in the projection's shape.
    fn output_contract(&self) -> &'static str {
        match self {
            AgentRole::Scout => "findings, knowledgeGraph, handoffs, approvalItems",
            AgentRole::Connector => "contacts (each optionally with email_draft), approvalItems",
            AgentRole::Navigator => "regulatoryPathways, approvalItems",
            AgentRole::Mobilizer => {
                "grantOpportunities, fundraisingStrategy, advocacyConnections, \
                 draftApplications, experimentFundingMatches, pharmaPartnerships, \
                 entityFormation, approvalItems"
            }
            AgentRole::Strategist => {
                "weeklyBriefing (masterRoadmap, topPriorities, questionsForFamily), approvalItems"
            }
            AgentRole::Biologist => {
                "targets, disease_mechanism, target_ranking, pathway_map, handoffs, approvalItems"
            }
            AgentRole::Chemist => {
                "screening_summary, repurposing_candidates, novel_candidates, \
                 candidate_ranking, handoffs, approvalItems"
            }
            AgentRole::Preclinician => {
                "candidate_evaluations, experiment_design, cro_requirements, approvalItems"
            }
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the full prompt for one agent iteration: persona, mission context,
/// iteration guidance and every *other* role's knowledge (size-capped per
/// role so one verbose agent cannot blow the prompt budget).
pub fn build_prompt(
    role: AgentRole,
    mission: &Mission,
    knowledge: &BTreeMap<AgentRole, KnowledgeSlot>,
    iteration: usize,
    num_iterations: usize,
) -> String {
    let mut knowledge_context = String::new();
    for (other, slot) in knowledge {
        if *other == role {
            continue;
        }
        let mut rendered = serde_json::to_string_pretty(&slot.fields).unwrap_or_default();
        truncate_in_place(&mut rendered, KNOWLEDGE_CONTEXT_LIMIT);
        knowledge_context.push_str(&format!(
            "\n=== {} FINDINGS ===\n{}\n",
            other.as_str().to_uppercase(),
            rendered
        ));
    }

    let priorities = if mission.priorities.is_empty() {
        "all".to_string()
    } else {
        mission.priorities.join(", ")
    };
    let patient = if mission.patient.is_empty() {
        "not specified"
    } else {
        mission.patient.as_str()
    };
    let iteration_guidance = if iteration == 0 {
        "This is your first pass. Do broad initial research."
    } else {
        "Build on previous findings and other agents' discoveries. Go deeper on promising leads."
    };
    let context_section = if knowledge_context.is_empty() {
        "No other agent data available yet (you are running in parallel).".to_string()
    } else {
        format!("=== CONTEXT FROM OTHER AGENTS ==={}", knowledge_context)
    };

    format!(
        "{persona}\n\n\
         The disease is: {topic}\n\
         Journey stage: {stage}\n\
         Patient: {patient}\n\
         Regulatory jurisdiction: {jurisdiction}\n\
         Focus areas: {priorities}\n\n\
         ITERATION: {iteration} of {last} (0-indexed)\n\
         {guidance}\n\n\
         {context}\n\n\
         Output ONLY a valid JSON object with these keys: {contract}.\n\
         No markdown fences, no explanation.",
        persona = role.persona(),
        topic = mission.topic,
        stage = mission.journey_stage,
        patient = patient,
        jurisdiction = mission.jurisdiction.display_name(),
        priorities = priorities,
        iteration = iteration,
        last = num_iterations.saturating_sub(1),
        guidance = iteration_guidance,
        context = context_section,
        contract = role.output_contract(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lodestar::state::{GenerationToken, Jurisdiction, Mission, MissionStage};
    use chrono::Utc;

    fn mission() -> Mission {
        Mission {
            topic: "CLN3 Batten Disease".into(),
            priorities: vec!["research".into(), "funding".into()],
            journey_stage: "just-diagnosed".into(),
            patient: String::new(),
            jurisdiction: Jurisdiction::Us,
            stage: MissionStage::Launch,
            created_at: Utc::now(),
            generation: GenerationToken::fresh(),
        }
    }

    #[test]
    fn demo_mode_runs_single_iterations() {
        for role in AgentRole::ALL {
            assert_eq!(role.iterations(true), 1);
        }
        assert_eq!(AgentRole::Scout.iterations(false), 2);
        assert_eq!(AgentRole::Navigator.iterations(false), 1);
    }

    #[test]
    fn strategist_has_no_tools_and_no_fallback() {
        assert!(AgentRole::Strategist.discovered_allow_list().is_empty());
        assert!(AgentRole::Strategist.public_allow_list().is_empty());
        assert!(!AgentRole::Strategist.allows_search_fallback());
    }

    #[test]
    fn prompt_excludes_own_knowledge_and_caps_foreign_context() {
        let mut knowledge = BTreeMap::new();
        knowledge.insert(
            AgentRole::Scout,
            KnowledgeSlot::from_fields(
                serde_json::json!({"findings": ["x".repeat(10_000)]})
                    .as_object()
                    .unwrap()
                    .clone(),
            ),
        );
        knowledge.insert(
            AgentRole::Biologist,
            KnowledgeSlot::from_fields(
                serde_json::json!({"targets": []}).as_object().unwrap().clone(),
            ),
        );

        let prompt = build_prompt(AgentRole::Scout, &mission(), &knowledge, 1, 2);
        assert!(!prompt.contains("SCOUT FINDINGS"));
        assert!(prompt.contains("BIOLOGIST FINDINGS"));
        assert!(prompt.contains("Go deeper"));
    }
}
