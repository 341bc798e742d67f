use chrono::Utc;
use lodestar::knowledge::{self, Extraction};
use lodestar::state::{
    GenerationToken, Jurisdiction, Mission, MissionStage, SharedState,
};
use lodestar::AgentRole;
use serde_json::json;

fn mission(generation: GenerationToken) -> Mission {
    Mission {
        topic: "CLN3 Batten Disease".into(),
        priorities: vec!["research".into()],
        journey_stage: "just-diagnosed".into(),
        patient: String::new(),
        jurisdiction: Jurisdiction::Us,
        stage: MissionStage::Launch,
        created_at: Utc::now(),
        generation,
    }
}

#[test]
fn fenced_output_merges_to_parsed_object() {
    // The canonical messy case: valid JSON wrapped in a json fence.
    match knowledge::extract("```json\n{\"findings\":[]}\n```") {
        Extraction::Parsed(value) => {
            assert_eq!(value, json!({"findings": []}));
            assert!(!value.to_string().contains("```"));
        }
        other => panic!("expected parse, got {:?}", other),
    }
}

#[test]
fn non_json_prose_returns_unchanged() {
    let prose = "After extensive searching I found no eligible trials.";
    assert_eq!(
        knowledge::extract(prose),
        Extraction::Verbatim(prose.to_string())
    );
}

#[tokio::test]
async fn repeated_merges_keep_updated_at_monotonic() {
    let state = SharedState::new();
    let generation = GenerationToken::fresh();
    state.begin_mission(mission(generation.clone())).await;

    let mut previous = None;
    for payload in [
        "{\"findings\": []}",
        "{\"findings\": [{\"title\": \"A\"}]}",
        "{\"findings\": [{\"title\": \"A\"}, {\"title\": \"B\"}]}",
    ] {
        state
            .merge_agent_output(&generation, AgentRole::Scout, payload)
            .await
            .unwrap();
        let stamp = state.knowledge_snapshot().await[&AgentRole::Scout].updated_at;
        if let Some(previous) = previous {
            assert!(stamp >= previous);
        }
        previous = Some(stamp);
    }
}

#[tokio::test]
async fn connector_scenario_lands_contacts_and_one_audit_entry() {
    let state = SharedState::new();
    let generation = GenerationToken::fresh();
    state.begin_mission(mission(generation.clone())).await;

    state
        .merge_agent_output(
            &generation,
            AgentRole::Connector,
            "{\"contacts\":[{\"name\":\"Dr. A\"}]}",
        )
        .await
        .unwrap();

    let plan = state.plan_snapshot().await;
    assert_eq!(
        plan.knowledge[&AgentRole::Connector].fields["contacts"],
        json!([{"name": "Dr. A"}])
    );
    let connector_entries: Vec<_> = plan
        .log
        .iter()
        .filter(|entry| entry.agent == "connector")
        .collect();
    assert_eq!(connector_entries.len(), 1);
}

#[tokio::test]
async fn approval_items_accumulate_across_roles() {
    let state = SharedState::new();
    let generation = GenerationToken::fresh();
    state.begin_mission(mission(generation.clone())).await;

    state
        .merge_agent_output(
            &generation,
            AgentRole::Scout,
            "{\"findings\": [], \"approvalItems\": [{\"action\": \"contact PI\"}]}",
        )
        .await
        .unwrap();
    state
        .merge_agent_output(
            &generation,
            AgentRole::Mobilizer,
            "{\"grantOpportunities\": [], \"approvalItems\": [{\"action\": \"apply\"}, {\"action\": \"call\"}]}",
        )
        .await
        .unwrap();

    let plan = state.plan_snapshot().await;
    assert_eq!(plan.approvals.len(), 3);
    // Order is accumulation order; the core never removes items.
    assert_eq!(plan.approvals[0]["action"], "contact PI");
}
