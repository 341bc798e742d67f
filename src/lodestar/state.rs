//! The shared-state owner.
//!
//! All mission, agent, knowledge, approval and audit data lives behind one
//! `tokio::sync::Mutex` inside [`SharedState`]. Every operation locks,
//! reads or mutates, and releases, never holding the lock across I/O,
//! and every mutating operation takes the caller's generation token,
//! silently refusing the write when the token is no longer current.
//! Callers get cloned snapshots, never references into the interior.

use crate::lodestar::knowledge::{self, Extraction, MergeSummary};
use crate::lodestar::roles::AgentRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::Mutex;

/// Opaque identity of one mission launch; the basis for cooperative
/// cancellation. Comparing tokens is the staleness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationToken(String);

impl GenerationToken {
    /// Allocate a fresh, unique token.
    pub fn fresh() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        GenerationToken(id[..8].to_string())
    }
}

impl fmt::Display for GenerationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Regulatory jurisdiction for the mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    Us,
    Eu,
    Other,
}

impl Jurisdiction {
    pub fn display_name(&self) -> &'static str {
        match self {
            Jurisdiction::Us => "FDA (United States)",
            Jurisdiction::Eu => "EMA (Europe)",
            Jurisdiction::Other => "International",
        }
    }
}

/// Mission lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStage {
    Launch,
    Roadmap,
}

/// One end-to-end research task spanning all agent roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub topic: String,
    pub priorities: Vec<String>,
    pub journey_stage: String,
    pub patient: String,
    pub jurisdiction: Jurisdiction,
    pub stage: MissionStage,
    pub created_at: DateTime<Utc>,
    pub generation: GenerationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Working,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Status,
    Finding,
}

/// One append-only progress line in an agent's update stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub timestamp: DateTime<Utc>,
    pub kind: UpdateKind,
    pub message: String,
    pub completed: bool,
}

/// Mutable per-agent bookkeeping, owned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub current_task: String,
    pub updates: Vec<Update>,
    pub tool_calls: u64,
    pub last_run: Option<DateTime<Utc>>,
}

impl AgentState {
    fn pending() -> Self {
        Self {
            status: AgentStatus::Pending,
            current_task: String::new(),
            updates: Vec::new(),
            tool_calls: 0,
            last_run: None,
        }
    }
}

/// Latest structured extraction from one role, replaced whole on merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSlot {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeSlot {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            updated_at: Utc::now(),
        }
    }
}

/// One strictly append-only audit line; ordering is completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

/// Progress of a derived narrative (synthesis or summary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeStatus {
    Idle,
    Waiting,
    Generating,
    Complete,
    Error,
}

/// The final synthesis narrative and its progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisState {
    pub status: NarrativeStatus,
    pub result: Option<String>,
    pub token_estimate: Option<usize>,
}

impl SynthesisState {
    fn idle() -> Self {
        Self {
            status: NarrativeStatus::Idle,
            result: None,
            token_estimate: None,
        }
    }
}

/// Everything a merge produced, handed back so the caller can post
/// progress updates without re-entering the lock.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// False when extraction fell through to the verbatim fallback.
    pub parsed: bool,
    pub summary: MergeSummary,
    pub approvals_added: usize,
}

/// Read-only snapshot of mission control state.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub mission: Option<Mission>,
    pub agents: BTreeMap<AgentRole, AgentState>,
    pub approvals: Vec<Value>,
    pub synthesis: SynthesisState,
}

/// Read-only snapshot of the shared knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub mission: Option<Mission>,
    pub knowledge: BTreeMap<AgentRole, KnowledgeSlot>,
    pub approvals: Vec<Value>,
    pub log: Vec<AuditLogEntry>,
}

struct StateInner {
    generation: Option<GenerationToken>,
    mission: Option<Mission>,
    agents: BTreeMap<AgentRole, AgentState>,
    knowledge: BTreeMap<AgentRole, KnowledgeSlot>,
    approvals: Vec<Value>,
    audit_log: Vec<AuditLogEntry>,
    synthesis: SynthesisState,
}

/// Owner of all shared mutable state. Cheap to share behind an `Arc`.
pub struct SharedState {
    inner: Mutex<StateInner>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                generation: None,
                mission: None,
                agents: BTreeMap::new(),
                knowledge: BTreeMap::new(),
                approvals: Vec::new(),
                audit_log: Vec::new(),
                synthesis: SynthesisState::idle(),
            }),
        }
    }

    /// Atomically supersede whatever mission was running: install the new
    /// mission, reset every agent to pending, clear knowledge, approvals
    /// and the audit log. In-flight work tagged with the old token finds
    /// its writes refused from here on.
    pub async fn begin_mission(&self, mission: Mission) {
        let mut inner = self.inner.lock().await;
        inner.generation = Some(mission.generation.clone());
        inner.agents = AgentRole::ALL
            .iter()
            .map(|role| (*role, AgentState::pending()))
            .collect();
        inner.knowledge = BTreeMap::new();
        inner.approvals = Vec::new();
        inner.synthesis = SynthesisState::idle();
        inner.audit_log = vec![AuditLogEntry {
            agent: "orchestrator".to_string(),
            timestamp: Utc::now(),
            summary: format!("Mission initialized for {}", mission.topic),
        }];
        inner.mission = Some(mission);
    }

    /// The currently active generation token, if a mission is running.
    pub async fn current_generation(&self) -> Option<GenerationToken> {
        self.inner.lock().await.generation.clone()
    }

    /// Staleness check for callers about to do non-state work.
    pub async fn is_current(&self, generation: &GenerationToken) -> bool {
        self.inner.lock().await.generation.as_ref() == Some(generation)
    }

    /// Set an agent's status (and optionally its task line). Returns false
    /// without writing when the token is stale.
    pub async fn set_agent_status(
        &self,
        generation: &GenerationToken,
        role: AgentRole,
        status: AgentStatus,
        current_task: Option<&str>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation.as_ref() != Some(generation) {
            return false;
        }
        let agent = inner.agents.entry(role).or_insert_with(AgentState::pending);
        agent.status = status;
        agent.last_run = Some(Utc::now());
        if let Some(task) = current_task {
            agent.current_task = task.to_string();
        }
        true
    }

    /// Append one update to an agent's stream. Returns false when stale.
    pub async fn push_update(
        &self,
        generation: &GenerationToken,
        role: AgentRole,
        kind: UpdateKind,
        message: impl Into<String>,
        completed: bool,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation.as_ref() != Some(generation) {
            return false;
        }
        let agent = inner.agents.entry(role).or_insert_with(AgentState::pending);
        agent.updates.push(Update {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            completed,
        });
        true
    }

    /// Accumulate tool calls an agent made this iteration.
    pub async fn add_tool_calls(
        &self,
        generation: &GenerationToken,
        role: AgentRole,
        count: u64,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation.as_ref() != Some(generation) {
            return false;
        }
        let agent = inner.agents.entry(role).or_insert_with(AgentState::pending);
        agent.tool_calls += count;
        true
    }

    /// Fold one agent's raw output into the knowledge base: tolerant
    /// extraction, role projection, full-replace slot write, cross-cutting
    /// approval extraction and exactly one audit entry, all inside a
    /// single critical-section acquisition. Returns `None` when stale.
    pub async fn merge_agent_output(
        &self,
        generation: &GenerationToken,
        role: AgentRole,
        raw_output: &str,
    ) -> Option<MergeOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.generation.as_ref() != Some(generation) {
            return None;
        }

        let (parsed, fields, approvals) = match knowledge::extract(raw_output) {
            Extraction::Parsed(data) => {
                let fields = knowledge::project(role, &data);
                let approvals = knowledge::approval_items(&data);
                (true, Some(fields), approvals)
            }
            Extraction::Verbatim(_) => {
                log::warn!("{}: output not parseable, keeping verbatim", role);
                (false, None, Vec::new())
            }
        };

        let summary = match &fields {
            Some(fields) => knowledge::summarize(role, fields),
            None => MergeSummary::default(),
        };
        let approvals_added = approvals.len();

        if let Some(fields) = fields {
            inner
                .knowledge
                .insert(role, KnowledgeSlot::from_fields(fields));
            inner.approvals.extend(approvals);
            // Exactly one audit entry per successful merge; a verbatim
            // fallback is reported through the update stream instead.
            inner.audit_log.push(AuditLogEntry {
                agent: role.to_string(),
                timestamp: Utc::now(),
                summary: format!("{} completed update", role),
            });
        }

        Some(MergeOutcome {
            parsed,
            summary,
            approvals_added,
        })
    }

    /// Snapshot of every knowledge slot.
    pub async fn knowledge_snapshot(&self) -> BTreeMap<AgentRole, KnowledgeSlot> {
        self.inner.lock().await.knowledge.clone()
    }

    /// True when any role other than `role` has merged knowledge.
    pub async fn has_foreign_knowledge(&self, role: AgentRole) -> bool {
        self.inner
            .lock()
            .await
            .knowledge
            .keys()
            .any(|other| *other != role)
    }

    /// Snapshot of the current mission, if any.
    pub async fn mission_snapshot(&self) -> Option<Mission> {
        self.inner.lock().await.mission.clone()
    }

    /// Record synthesis progress. Returns false when stale.
    pub async fn set_synthesis(
        &self,
        generation: &GenerationToken,
        synthesis: SynthesisState,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation.as_ref() != Some(generation) {
            return false;
        }
        inner.synthesis = synthesis;
        true
    }

    /// Advance the mission lifecycle to the roadmap stage.
    pub async fn advance_to_roadmap(&self, generation: &GenerationToken) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation.as_ref() != Some(generation) {
            return false;
        }
        if let Some(mission) = inner.mission.as_mut() {
            mission.stage = MissionStage::Roadmap;
            return true;
        }
        false
    }

    /// Full mission/agent/status view. Safe to poll at any time.
    pub async fn state_snapshot(&self) -> StateView {
        let inner = self.inner.lock().await;
        StateView {
            mission: inner.mission.clone(),
            agents: inner.agents.clone(),
            approvals: inner.approvals.clone(),
            synthesis: inner.synthesis.clone(),
        }
    }

    /// Full shared-knowledge view. Safe to poll at any time.
    pub async fn plan_snapshot(&self) -> PlanView {
        let inner = self.inner.lock().await;
        PlanView {
            mission: inner.mission.clone(),
            knowledge: inner.knowledge.clone(),
            approvals: inner.approvals.clone(),
            log: inner.audit_log.clone(),
        }
    }
}
