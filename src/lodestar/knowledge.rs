//! Tolerant parsing and projection of agent output.
//!
//! Agents are asked for bare JSON but routinely wrap it in prose or code
//! fences. Extraction is an explicit ordered pipeline (envelope unwrap,
//! fence strip, direct parse, bracket scan, verbatim fallback) with each
//! stage independently testable. A verbatim fallback is a valid, if
//! degraded, outcome: it is logged and surfaced as a status update, never
//! an error.
//!
//! The locked knowledge-slot write itself lives with the state owner in
//! [`state`](crate::lodestar::state); this module is pure functions.

use crate::lodestar::roles::AgentRole;
use serde_json::{json, Map, Value};
use std::borrow::Cow;

/// Outcome of the extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A JSON document was recovered.
    Parsed(Value),
    /// Nothing parseable; the original text, unchanged.
    Verbatim(String),
}

/// Run the full extraction pipeline over raw agent output.
pub fn extract(raw: &str) -> Extraction {
    let unwrapped = unwrap_envelope(raw);
    let candidate = strip_fence(&unwrapped).unwrap_or(&unwrapped);

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Extraction::Parsed(value);
    }
    if let Some(value) = bracket_scan(candidate) {
        return Extraction::Parsed(value);
    }
    Extraction::Verbatim(raw.to_string())
}

/// Stage 1: a known response envelope is a JSON object whose `result`
/// field holds the actual output as a string. Unwrap it if present.
fn unwrap_envelope(raw: &str) -> Cow<'_, str> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(inner)) = map.get("result") {
            return Cow::Owned(inner.clone());
        }
    }
    Cow::Borrowed(raw)
}

/// Stage 2: extract the first fenced code block, preferring an explicit
/// json-tagged fence over a bare one.
fn strip_fence(text: &str) -> Option<&str> {
    let after_open = if let Some(rest) = text.split_once("```json").map(|(_, rest)| rest) {
        rest
    } else {
        text.split_once("```").map(|(_, rest)| rest)?
    };
    let content = after_open
        .split_once("```")
        .map(|(content, _)| content)
        .unwrap_or(after_open);
    Some(content.trim())
}

/// Stage 4: last-resort scan from the first opening bracket to the last
/// matching closing bracket, for both objects and arrays.
fn bracket_scan(text: &str) -> Option<Value> {
    for (open, close) in [('{', '}'), ('[', ']')] {
        let start = match text.find(open) {
            Some(idx) => idx,
            None => continue,
        };
        let end = match text.rfind(close) {
            Some(idx) if idx > start => idx,
            _ => continue,
        };
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Some(value);
        }
    }
    None
}

fn list(data: &Value, key: &str) -> Value {
    data.get(key).cloned().unwrap_or_else(|| json!([]))
}

fn object(data: &Value, key: &str) -> Value {
    data.get(key).cloned().unwrap_or_else(|| json!({}))
}

fn string(data: &Value, key: &str) -> Value {
    data.get(key).cloned().unwrap_or_else(|| json!(""))
}

/// Project a parsed document into the fixed field subset for one role,
/// defensively defaulting anything absent. This is the only place role
/// schemas are spelled out.
pub fn project(role: AgentRole, data: &Value) -> Map<String, Value> {
    let projected = match role {
        AgentRole::Scout => json!({
            "findings": list(data, "findings"),
            "knowledge_graph": object(data, "knowledgeGraph"),
            "handoffs": list(data, "handoffs"),
        }),
        AgentRole::Connector => {
            let contacts = list(data, "contacts");
            let drafts: Vec<Value> = contacts
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter_map(|contact| contact.get("email_draft"))
                        .filter(|draft| !draft.is_null())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            json!({ "contacts": contacts, "drafts": drafts })
        }
        AgentRole::Navigator => json!({
            "pathways": object(data, "regulatoryPathways"),
        }),
        AgentRole::Mobilizer => json!({
            "grants": list(data, "grantOpportunities"),
            "fundraisingStrategy": object(data, "fundraisingStrategy"),
            "advocacyConnections": list(data, "advocacyConnections"),
            "draftApplications": list(data, "draftApplications"),
            "experimentFundingMatches": object(data, "experimentFundingMatches"),
            "pharmaPartnerships": list(data, "pharmaPartnerships"),
            "entityFormation": object(data, "entityFormation"),
        }),
        AgentRole::Strategist => {
            let briefing = object(data, "weeklyBriefing");
            json!({
                "roadmap": object(&briefing, "masterRoadmap"),
                "priorities": list(&briefing, "topPriorities"),
                "questionsForFamily": list(&briefing, "questionsForFamily"),
            })
        }
        AgentRole::Biologist => json!({
            "targets": list(data, "targets"),
            "disease_mechanism": string(data, "disease_mechanism"),
            "target_ranking": list(data, "target_ranking"),
            "pathway_map": object(data, "pathway_map"),
            "handoffs": list(data, "handoffs"),
        }),
        AgentRole::Chemist => json!({
            "screening_summary": object(data, "screening_summary"),
            "repurposing_candidates": list(data, "repurposing_candidates"),
            "novel_candidates": list(data, "novel_candidates"),
            "candidate_ranking": list(data, "candidate_ranking"),
            "handoffs": list(data, "handoffs"),
        }),
        AgentRole::Preclinician => json!({
            "candidate_evaluations": list(data, "candidate_evaluations"),
            "experiment_design": object(data, "experiment_design"),
            "cro_requirements": object(data, "cro_requirements"),
        }),
    };
    match projected {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// The one cross-cutting field every role may populate: action items
/// requiring human sign-off.
pub fn approval_items(data: &Value) -> Vec<Value> {
    data.get("approvalItems")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Post-merge progress lines derived from a role's projected fields.
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    /// Status-kind update, e.g. "Found 4 research findings".
    pub status_line: Option<String>,
    /// Finding-kind updates, e.g. the top finding titles.
    pub findings: Vec<String>,
}

fn count(fields: &Map<String, Value>, key: &str) -> usize {
    fields.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

/// Summarize a freshly merged slot for the agent's update stream.
pub fn summarize(role: AgentRole, fields: &Map<String, Value>) -> MergeSummary {
    match role {
        AgentRole::Scout => {
            let findings = fields
                .get("findings")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .take(3)
                        .map(|finding| {
                            finding
                                .get("title")
                                .and_then(Value::as_str)
                                .unwrap_or("Finding")
                                .to_string()
                        })
                        .collect()
                })
                .unwrap_or_default();
            MergeSummary {
                status_line: Some(format!(
                    "Found {} research findings",
                    count(fields, "findings")
                )),
                findings,
            }
        }
        AgentRole::Connector => MergeSummary {
            status_line: Some(format!(
                "Identified {} outreach targets",
                count(fields, "contacts")
            )),
            findings: Vec::new(),
        },
        AgentRole::Navigator => MergeSummary {
            status_line: Some("Regulatory pathway mapping complete".to_string()),
            findings: Vec::new(),
        },
        AgentRole::Mobilizer => MergeSummary {
            status_line: Some(format!(
                "Found {} grant opportunities",
                count(fields, "grants")
            )),
            findings: Vec::new(),
        },
        AgentRole::Strategist => MergeSummary {
            status_line: None,
            findings: vec!["Weekly briefing ready".to_string()],
        },
        AgentRole::Biologist => MergeSummary {
            status_line: Some(format!(
                "Identified {} therapeutic targets",
                count(fields, "targets")
            )),
            findings: Vec::new(),
        },
        AgentRole::Chemist => MergeSummary {
            status_line: Some(format!(
                "Found {} repurposing candidates",
                count(fields, "repurposing_candidates")
            )),
            findings: Vec::new(),
        },
        AgentRole::Preclinician => MergeSummary {
            status_line: Some(format!(
                "Evaluated {} candidates",
                count(fields, "candidate_evaluations")
            )),
            findings: Vec::new(),
        },
    }
}
