//! Persisted data model for a troubleshooting case.
//!
//! Everything in here is plain data with serde derives; behaviour lives in the
//! sibling modules. Maps are ordered so that serializing a state twice yields
//! identical bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Enumerations
// ============================================================================

/// Strategic lifecycle phase.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Phase 0: consultant-mode intake.
    #[default]
    Intake,
    /// Phase 1: detect and define the anomaly.
    ProblemDefinition,
    /// Phase 2: triage and hypothesis generation.
    Triage,
    /// Phase 3: mitigation (active incidents only).
    Mitigation,
    /// Phase 4: root-cause analysis.
    RootCause,
    /// Phase 5: permanent solution.
    Solution,
    /// Phase 6: documentation and closure.
    Documentation,
}

impl Phase {
    /// All phases in lifecycle order.
    pub const ALL: [Phase; 7] = [
        Phase::Intake,
        Phase::ProblemDefinition,
        Phase::Triage,
        Phase::Mitigation,
        Phase::RootCause,
        Phase::Solution,
        Phase::Documentation,
    ];

    /// Numeric index (0..=6).
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Phase for a numeric index.
    pub fn from_index(index: u8) -> Option<Phase> {
        Phase::ALL.get(index as usize).copied()
    }

    /// The phase immediately after this one.
    pub fn next(&self) -> Option<Phase> {
        Phase::from_index(self.index() + 1)
    }

    /// Phases that run OODA cycles.
    pub fn is_investigative(&self) -> bool {
        !matches!(self, Phase::Intake | Phase::Documentation)
    }

    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::ProblemDefinition => "problem_definition",
            Phase::Triage => "triage",
            Phase::Mitigation => "mitigation",
            Phase::RootCause => "root_cause",
            Phase::Solution => "solution",
            Phase::Documentation => "documentation",
        }
    }

    /// Human-readable objective for prompts and responses.
    pub fn objective(&self) -> &'static str {
        match self {
            Phase::Intake => "understand the question and decide whether an investigation is needed",
            Phase::ProblemDefinition => "frame the anomaly: what is broken, where, and how widely",
            Phase::Triage => "generate and rank candidate hypotheses",
            Phase::Mitigation => "restore service while the root cause is still open",
            Phase::RootCause => "test hypotheses until the root cause is established with confidence",
            Phase::Solution => "define and verify a permanent fix",
            Phase::Documentation => "produce the incident record and close the case",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        if let Ok(index) = normalized.parse::<u8>() {
            return Phase::from_index(index).ok_or_else(|| format!("Unknown phase: {}", s));
        }
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("Unknown phase: {}", s))
    }
}

/// Who leads the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationalMode {
    /// Answer questions; no investigation state machine.
    #[default]
    Consultant,
    /// Drive the phased investigation.
    LeadInvestigator,
}

impl std::fmt::Display for ConversationalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationalMode::Consultant => write!(f, "consultant"),
            ConversationalMode::LeadInvestigator => write!(f, "lead_investigator"),
        }
    }
}

/// Whether the incident is live or already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationMode {
    /// Live incident; mitigation comes before root cause.
    ActiveIncident,
    /// Resolved incident; mitigation is skipped.
    PostMortem,
}

impl std::fmt::Display for InvestigationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvestigationMode::ActiveIncident => write!(f, "active_incident"),
            InvestigationMode::PostMortem => write!(f, "post_mortem"),
        }
    }
}

/// Case urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    /// No user impact yet.
    Low,
    /// Degraded but usable.
    Medium,
    /// Significant user impact.
    High,
    /// Outage or data loss.
    Critical,
}

impl UrgencyLevel {
    /// High or critical urgency.
    pub fn is_elevated(&self) -> bool {
        matches!(self, UrgencyLevel::High | UrgencyLevel::Critical)
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrgencyLevel::Low => write!(f, "low"),
            UrgencyLevel::Medium => write!(f, "medium"),
            UrgencyLevel::High => write!(f, "high"),
            UrgencyLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Hypothesis category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisCategory {
    /// A release or rollout.
    Deployment,
    /// Hosts, network or storage.
    Infrastructure,
    /// Application logic.
    Code,
    /// Settings or flags.
    Configuration,
    /// Third-party dependency.
    External,
}

impl HypothesisCategory {
    /// All categories.
    pub const ALL: [HypothesisCategory; 5] = [
        HypothesisCategory::Deployment,
        HypothesisCategory::Infrastructure,
        HypothesisCategory::Code,
        HypothesisCategory::Configuration,
        HypothesisCategory::External,
    ];

    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            HypothesisCategory::Deployment => "deployment",
            HypothesisCategory::Infrastructure => "infrastructure",
            HypothesisCategory::Code => "code",
            HypothesisCategory::Configuration => "configuration",
            HypothesisCategory::External => "external",
        }
    }
}

impl std::fmt::Display for HypothesisCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Evidence category; six categories feed the complexity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    /// What is observed.
    Symptoms,
    /// When things happened.
    Timeline,
    /// What changed recently.
    Changes,
    /// Settings in effect.
    Configuration,
    /// Who and what is affected.
    Scope,
    /// Measurements.
    Metrics,
}

impl EvidenceCategory {
    /// Number of distinct evidence categories.
    pub const COUNT: usize = 6;

    /// Deterministic best-effort category for free text.
    pub fn infer(text: &str) -> EvidenceCategory {
        let lower = text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["deploy", "release", "rollout", "rolled out", "upgrade", "changed", "merged", "migration"]) {
            EvidenceCategory::Changes
        } else if has(&["config", "setting", "env var", "environment variable", "flag", "timeout="]) {
            EvidenceCategory::Configuration
        } else if has(&["latency", "cpu", "memory", "p99", "p95", "error rate", "%", "ms ", "qps", "rps"]) {
            EvidenceCategory::Metrics
        } else if has(&["since", "started at", "yesterday", "ago", "this morning", "last night", "timeline"]) {
            EvidenceCategory::Timeline
        } else if has(&["all users", "some users", "region", "customers", "only in", "every ", "subset"]) {
            EvidenceCategory::Scope
        } else {
            EvidenceCategory::Symptoms
        }
    }

    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceCategory::Symptoms => "symptoms",
            EvidenceCategory::Timeline => "timeline",
            EvidenceCategory::Changes => "changes",
            EvidenceCategory::Configuration => "configuration",
            EvidenceCategory::Scope => "scope",
            EvidenceCategory::Metrics => "metrics",
        }
    }
}

impl std::fmt::Display for EvidenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an evidence item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// Supplied by the user in a turn.
    User,
    /// Extracted during an OODA step.
    Analysis,
}

/// How a piece of evidence bears on the hypotheses it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    /// Supports the matched hypotheses.
    Supportive,
    /// Contradicts the matched hypotheses.
    Refuting,
    /// Bears on none of them.
    Neutral,
}

/// Outcome of testing a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    /// The test confirmed the hypothesis.
    Supports,
    /// The test ruled it out.
    Refutes,
    /// The test was not decisive.
    Inconclusive,
}

/// Hypothesis lifecycle status. Hypotheses are never deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    /// Still under consideration.
    #[default]
    Active,
    /// Ruled out, kept for the record.
    Retired,
}

/// The five tactical steps, executed in this order when selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OodaStep {
    /// Frame or reframe the anomaly.
    Frame,
    /// Observe: gather and extract evidence.
    Scan,
    /// Orient: generate and rank hypotheses.
    Branch,
    /// Decide: test hypotheses against evidence.
    Test,
    /// Act: draw conclusions.
    Conclude,
}

/// OODA stage a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OodaStage {
    /// Gather.
    Observe,
    /// Interpret.
    Orient,
    /// Choose.
    Decide,
    /// Do.
    Act,
}

impl OodaStep {
    /// Canonical execution order.
    pub const ORDER: [OodaStep; 5] = [
        OodaStep::Frame,
        OodaStep::Scan,
        OodaStep::Branch,
        OodaStep::Test,
        OodaStep::Conclude,
    ];

    /// The four steps of a full OODA loop.
    pub const FULL_LOOP: [OodaStep; 4] = [
        OodaStep::Scan,
        OodaStep::Branch,
        OodaStep::Test,
        OodaStep::Conclude,
    ];

    /// OODA stage for this step. Framing is part of observing.
    pub fn stage(&self) -> OodaStage {
        match self {
            OodaStep::Frame | OodaStep::Scan => OodaStage::Observe,
            OodaStep::Branch => OodaStage::Orient,
            OodaStep::Test => OodaStage::Decide,
            OodaStep::Conclude => OodaStage::Act,
        }
    }

    /// Get the step name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            OodaStep::Frame => "frame",
            OodaStep::Scan => "scan",
            OodaStep::Branch => "branch",
            OodaStep::Test => "test",
            OodaStep::Conclude => "conclude",
        }
    }
}

impl std::fmt::Display for OodaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much OODA work a phase iteration gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    /// No OODA steps.
    None,
    /// The phase focus steps.
    Light,
    /// Focus steps plus a scan.
    Medium,
    /// The whole loop.
    Full,
}

// ============================================================================
// Records
// ============================================================================

/// A candidate explanation for the anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Stable identifier.
    pub id: String,
    /// Proposed cause.
    pub statement: String,
    /// Cause category.
    pub category: HypothesisCategory,
    /// Likelihood in [0, 1].
    pub likelihood: f64,
    /// Evidence ids classified as supportive.
    pub supporting_evidence: Vec<String>,
    /// Evidence ids classified as refuting.
    pub contradicting_evidence: Vec<String>,
    /// Set once a test result is recorded.
    pub tested: bool,
    /// Latest test outcome.
    pub test_result: Option<TestResult>,
    /// Active or retired.
    #[serde(default)]
    pub status: HypothesisStatus,
    /// Why it was retired.
    #[serde(default)]
    pub retired_reason: Option<String>,
    /// When it was proposed.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl Hypothesis {
    /// Create a new untested hypothesis
    pub fn new(
        statement: impl Into<String>,
        category: HypothesisCategory,
        likelihood: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            statement: statement.into(),
            category,
            likelihood: likelihood.clamp(0.0, 1.0),
            supporting_evidence: Vec::new(),
            contradicting_evidence: Vec::new(),
            tested: false,
            test_result: None,
            status: HypothesisStatus::Active,
            retired_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the hypothesis is still in play.
    pub fn is_active(&self) -> bool {
        self.status == HypothesisStatus::Active
    }

    /// Whether any evidence has been classified against this hypothesis.
    pub fn has_evidence(&self) -> bool {
        !self.supporting_evidence.is_empty() || !self.contradicting_evidence.is_empty()
    }
}

/// A piece of (sanitized) evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Stable identifier.
    pub id: String,
    /// Short label.
    pub label: String,
    /// Evidence category.
    pub category: EvidenceCategory,
    /// Sanitized evidence text.
    pub content: String,
    /// Where it came from.
    pub source: EvidenceSource,
    /// When it was recorded.
    pub collected_at: DateTime<Utc>,
    /// Relevance in [0, 1].
    pub relevance_score: f64,
    /// Hypotheses it was classified against.
    pub related_hypotheses: Vec<String>,
    /// Classifier verdict.
    #[serde(default)]
    pub classification: Option<EvidenceType>,
}

impl EvidenceItem {
    /// Create a new unclassified evidence item
    pub fn new(
        label: impl Into<String>,
        category: EvidenceCategory,
        content: impl Into<String>,
        source: EvidenceSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            category,
            content: content.into(),
            source,
            collected_at: Utc::now(),
            relevance_score: 0.5,
            related_hypotheses: Vec::new(),
            classification: None,
        }
    }

    /// Set the relevance score
    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance_score = relevance.clamp(0.0, 1.0);
        self
    }
}

/// One historical version of the anomaly frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRevision {
    /// Statement before the revision.
    pub statement: String,
    /// Confidence before the revision.
    pub confidence: f64,
    /// Turn the revision happened in.
    pub turn: u32,
    /// When it was revised.
    pub revised_at: DateTime<Utc>,
}

/// Current best statement of the problem and its blast radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFrame {
    /// Current problem statement.
    pub statement: String,
    /// Components named as affected.
    pub affected_components: Vec<String>,
    /// Who or what is impacted.
    pub blast_radius: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Earlier versions of the frame.
    pub revisions: Vec<FrameRevision>,
}

impl AnomalyFrame {
    /// Create a frame from an initial problem statement
    pub fn new(statement: impl Into<String>, confidence: f64) -> Self {
        Self {
            statement: statement.into(),
            affected_components: Vec::new(),
            blast_radius: None,
            confidence: confidence.clamp(0.0, 1.0),
            revisions: Vec::new(),
        }
    }
}

/// Established root cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    /// Concluded cause.
    pub statement: String,
    /// Confidence at conclusion.
    pub confidence: f64,
    /// Hypothesis it rests on.
    pub hypothesis_id: Option<String>,
    /// When it was concluded.
    pub concluded_at: DateTime<Utc>,
}

/// Record of one OODA iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OodaIteration {
    /// Case-wide iteration number, from 1.
    pub iteration_number: u32,
    /// Phase it ran in.
    pub phase: Phase,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub completed_at: DateTime<Utc>,
    /// Steps in execution order.
    pub steps_executed: Vec<OodaStep>,
    /// Evidence ids recorded or classified.
    pub evidence_analyzed: Vec<String>,
    /// Hypothesis ids proposed.
    pub hypotheses_generated: Vec<String>,
    /// Hypothesis ids tested for the first time.
    pub hypotheses_tested: Vec<String>,
    /// Takeaway, if any.
    pub key_insight: Option<String>,
    /// Investigation confidence before and after each step.
    pub confidence_progression: Vec<f64>,
    /// Whether the iteration made progress.
    pub made_progress: bool,
}

/// Record of time spent in a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecution {
    /// The phase.
    pub phase: Phase,
    /// Turn it was entered.
    pub entered_turn: u32,
    /// Turn it was left.
    pub exited_turn: Option<u32>,
    /// Whether its objectives were met on exit.
    pub objectives_met: bool,
    /// Set when the phase was jumped over rather than executed.
    pub skip_reason: Option<String>,
    /// Entry time.
    pub entered_at: DateTime<Utc>,
    /// Exit time.
    pub exited_at: Option<DateTime<Utc>>,
}

/// Audit entry for a user-authorized transition that broke lifecycle rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOverride {
    /// Phase before.
    pub from: Phase,
    /// Phase after.
    pub to: Phase,
    /// Phases jumped over.
    pub skipped_phases: Vec<Phase>,
    /// Reason the user gave.
    pub reason: String,
    /// Why the transition would have been rejected without the override.
    pub warning: String,
    /// Turn of the override.
    pub turn: u32,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Data the engine asked the user for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRequest {
    /// Stable identifier.
    pub id: String,
    /// Short label.
    pub label: String,
    /// What to collect and how.
    pub description: String,
    /// Evidence category expected.
    pub category: EvidenceCategory,
    /// Turn it was issued.
    pub requested_turn: u32,
    /// Evidence item that answered this request.
    pub fulfilled_by: Option<String>,
}

impl EvidenceRequest {
    /// Create a new open request
    pub fn new(
        label: impl Into<String>,
        description: impl Into<String>,
        category: EvidenceCategory,
        requested_turn: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            description: description.into(),
            category,
            requested_turn,
            fulfilled_by: None,
        }
    }

    /// Whether evidence has answered this request.
    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled_by.is_some()
    }
}

/// Proposal to switch conversational mode, awaiting user confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransitionProposal {
    /// Current mode.
    pub from: ConversationalMode,
    /// Proposed mode.
    pub to: ConversationalMode,
    /// Detection confidence.
    pub confidence: f64,
    /// Signals that triggered the offer.
    pub signals: Vec<String>,
    /// Estimated urgency.
    pub urgency_estimate: UrgencyLevel,
    /// Post-mortem or live incident hint.
    pub investigation_mode: Option<InvestigationMode>,
    /// Sanitized user text that triggered the proposal.
    pub problem_statement: String,
}

/// Proposal to move to another phase, awaiting user confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransitionProposal {
    /// Current phase.
    pub from: Phase,
    /// Proposed phase.
    pub to: Phase,
    /// Whether the current phase is complete.
    pub objectives_met: bool,
    /// Phases the move jumps over.
    pub skipped_phases: Vec<Phase>,
    /// Why the move is proposed.
    pub reason: String,
}

/// A supported hypothesis was retired by refuting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictNotice {
    /// Hypothesis that was retired.
    pub hypothesis_id: String,
    /// Its statement.
    pub statement: String,
    /// Evidence that contradicted it.
    pub evidence_id: String,
}

/// Outstanding question the next user turn answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingConfirmation {
    /// Offer to lead an investigation.
    ModeTransition(ModeTransitionProposal),
    /// Offer to change phase.
    PhaseTransition(PhaseTransitionProposal),
    /// A supported hypothesis was refuted.
    HypothesisConflict(ConflictNotice),
    /// Documentation artifacts await accept/decline.
    Closure,
}

/// Closing record produced in the documentation phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationArtifacts {
    /// One-paragraph summary.
    pub incident_summary: String,
    /// Root cause with its confidence.
    pub root_cause: Option<String>,
    /// Mitigation applied.
    pub mitigation: Option<String>,
    /// Permanent fix.
    pub solution: Option<String>,
    /// One line per phase execution.
    pub phase_timeline: Vec<String>,
    /// Ruled-out hypotheses with reasons.
    pub retired_hypotheses: Vec<String>,
    /// Evidence items collected.
    pub evidence_count: usize,
    /// When the record was built.
    pub generated_at: DateTime<Utc>,
    /// None until the user answers.
    pub accepted: Option<bool>,
}

// ============================================================================
// Investigation state
// ============================================================================

/// Complete persisted state of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationState {
    /// Case identifier.
    pub case_id: String,
    /// Session of the latest turn.
    pub session_id: String,
    /// Owning user, if known.
    pub user_id: Option<String>,

    /// Consultant or lead investigator.
    pub conversational_mode: ConversationalMode,
    /// Lifecycle phase.
    pub current_phase: Phase,
    /// Live incident or post-mortem; `None` until determined.
    pub investigation_mode: Option<InvestigationMode>,
    /// Highest urgency seen.
    pub urgency_level: Option<UrgencyLevel>,
    /// Current problem frame.
    pub anomaly_frame: Option<AnomalyFrame>,

    /// Hypotheses by id.
    pub hypotheses: BTreeMap<String, Hypothesis>,
    /// Evidence by id.
    pub evidence_items: BTreeMap<String, EvidenceItem>,

    /// Every iteration run.
    pub ooda_iterations: Vec<OodaIteration>,
    /// Compressed view of the iterations.
    pub memory: super::memory::HierarchicalMemory,
    /// Phase executions in order.
    pub phase_history: Vec<PhaseExecution>,
    /// Overrides that broke the regular rules.
    pub phase_overrides: Vec<PhaseOverride>,

    /// Concluded root cause.
    pub root_cause: Option<RootCause>,
    /// Permanent fix.
    pub solution: Option<String>,
    /// Mitigation applied.
    pub mitigation_applied: Option<String>,

    /// Whether escalation is advised.
    pub escalation_recommended: bool,
    /// Why escalation is advised.
    pub escalation_reason: Option<String>,
    /// Consecutive no-progress iterations.
    pub iterations_without_progress: u32,
    /// Tested-hypothesis count per category name.
    pub same_category_test_count: BTreeMap<String, u32>,

    /// Turns processed.
    pub turn_count: u32,
    /// Overall confidence, 0.0 to 1.0.
    pub investigation_confidence: f64,
    /// Every request issued.
    pub evidence_requests: Vec<EvidenceRequest>,
    /// Question awaiting the user.
    pub pending: Option<PendingConfirmation>,
    /// Whether phase moves need a yes.
    pub user_confirmation_required: bool,
    /// Closing record.
    pub artifacts: Option<DocumentationArtifacts>,

    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last save.
    pub updated_at: DateTime<Utc>,
    /// Set while archived.
    pub closed_at: Option<DateTime<Utc>>,
}

impl InvestigationState {
    /// Create a fresh consultant-mode case at phase 0
    pub fn new(case_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            case_id: case_id.into(),
            session_id: session_id.into(),
            user_id: None,
            conversational_mode: ConversationalMode::Consultant,
            current_phase: Phase::Intake,
            investigation_mode: None,
            urgency_level: None,
            anomaly_frame: None,
            hypotheses: BTreeMap::new(),
            evidence_items: BTreeMap::new(),
            ooda_iterations: Vec::new(),
            memory: Default::default(),
            phase_history: Vec::new(),
            phase_overrides: Vec::new(),
            root_cause: None,
            solution: None,
            mitigation_applied: None,
            escalation_recommended: false,
            escalation_reason: None,
            iterations_without_progress: 0,
            same_category_test_count: BTreeMap::new(),
            turn_count: 0,
            investigation_confidence: 0.0,
            evidence_requests: Vec::new(),
            pending: None,
            user_confirmation_required: true,
            artifacts: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Set the owning user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether the case has been archived.
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}
