//! Per-case entry point.
//!
//! Every turn loads the case, works on that copy, and commits it with a
//! single upsert at the end. Turns on the same case are serialized through a
//! per-case mutex; different cases run in parallel.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::detector::{detect_signal, parse_confirmation, Confirmation};
use super::intensity::select_intensity;
use super::lifecycle;
use super::ooda::{OodaEngine, STALL_LIMIT, STALL_REASON};
use super::types::{
    AnomalyFrame, ConflictNotice, ConversationalMode, DocumentationArtifacts, EvidenceCategory,
    EvidenceItem, EvidenceRequest, EvidenceSource, HypothesisCategory, Intensity,
    InvestigationMode, InvestigationState, ModeTransitionProposal, OodaStep, PendingConfirmation,
    Phase, PhaseTransitionProposal, UrgencyLevel,
};
use crate::collaborators::{
    invoke, CallPolicy, CompletionPurpose, EvidenceClassifier, Sanitizer, TextCompletion,
};
use crate::config::EngineConfig;
use crate::error::{AppResult, EngineError, EngineResult, StorageError};
use crate::langbase::Message;
use crate::prompts::CONSULTANT_PROMPT;
use crate::storage::{CaseSummary, StateStore};

/// Evidence response rate below which a stalled case disengages.
pub const DISENGAGE_RESPONSE_RATE: f64 = 0.3;

/// Escalation reason when root-cause analysis runs out of iterations.
pub const ROOT_CAUSE_BUDGET_REASON: &str = "root_cause_budget_exhausted";

const INITIAL_FRAME_CONFIDENCE: f64 = 0.3;
const MAX_ID_LEN: usize = 128;

/// What the UI layer should render for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Plain answer.
    Answer,
    /// Phase plan with evidence requests.
    PlanProposal,
    /// The reply was ambiguous.
    ClarificationRequest,
    /// Yes or no needed (hypothesis conflict).
    ConfirmationRequest,
    /// New evidence requests.
    NeedsMoreData,
    /// Stalled or out of budget.
    EscalationRequired,
    /// Closing record ready for acceptance.
    SolutionReady,
    /// Offer to lead an investigation.
    ModeTransitionRequest,
    /// Offer to move to the next phase.
    PhaseTransitionProposal,
}

impl ResponseType {
    /// Wire name of the response type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Answer => "answer",
            ResponseType::PlanProposal => "plan_proposal",
            ResponseType::ClarificationRequest => "clarification_request",
            ResponseType::ConfirmationRequest => "confirmation_request",
            ResponseType::NeedsMoreData => "needs_more_data",
            ResponseType::EscalationRequired => "escalation_required",
            ResponseType::SolutionReady => "solution_ready",
            ResponseType::ModeTransitionRequest => "mode_transition_request",
            ResponseType::PhaseTransitionProposal => "phase_transition_proposal",
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a case sits in the turn-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Answering questions.
    Consultant,
    /// Waiting on the mode offer.
    AwaitingTransitionConfirmation,
    /// Running the investigation.
    LeadInvestigator,
    /// A phase transition or the closing artifacts await an answer.
    AwaitingPhaseConfirmation,
    /// Waiting on a hypothesis conflict.
    AwaitingConflictConfirmation,
    /// Archived.
    Closed,
}

/// Derive the turn state from persisted fields.
pub fn turn_state(state: &InvestigationState) -> TurnState {
    if state.is_closed() {
        return TurnState::Closed;
    }
    match (&state.pending, state.conversational_mode) {
        (Some(PendingConfirmation::ModeTransition(_)), _) => {
            TurnState::AwaitingTransitionConfirmation
        }
        (Some(PendingConfirmation::PhaseTransition(_)), _)
        | (Some(PendingConfirmation::Closure), _) => TurnState::AwaitingPhaseConfirmation,
        (Some(PendingConfirmation::HypothesisConflict(_)), _) => {
            TurnState::AwaitingConflictConfirmation
        }
        (None, ConversationalMode::LeadInvestigator) => TurnState::LeadInvestigator,
        (None, ConversationalMode::Consultant) => TurnState::Consultant,
    }
}

/// OODA bookkeeping reported with investigation turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OodaProgress {
    /// Iteration just run.
    pub iteration_number: u32,
    /// Depth used.
    pub intensity: Intensity,
    /// Steps run.
    pub steps_executed: Vec<OodaStep>,
    /// Iterations spent in the current phase.
    pub iterations_in_phase: u32,
    /// Phase budget.
    pub max_iterations: u32,
    /// Whether the iteration made progress.
    pub made_progress: bool,
    /// Whether the stall limit was hit.
    pub halted: bool,
    /// Overall confidence after the iteration.
    pub investigation_confidence: f64,
    /// Anchored category, if any.
    pub anchoring_category: Option<HypothesisCategory>,
}

/// Structured result of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    /// Case the turn belongs to.
    pub case_id: String,
    /// Text for the user.
    pub content: String,
    /// How to render the reply.
    pub response_type: ResponseType,
    /// Phase after the turn.
    pub phase: Phase,
    /// Mode after the turn.
    pub conversational_mode: ConversationalMode,
    /// Turn-level state after the turn.
    pub turn_state: TurnState,
    /// Present when an OODA iteration ran.
    pub ooda_progress: Option<OodaProgress>,
    /// Requests issued by this turn (all open requests on escalation).
    pub evidence_requests: Vec<EvidenceRequest>,
    /// Pending mode offer.
    pub mode_transition_proposal: Option<ModeTransitionProposal>,
    /// Pending phase move.
    pub phase_transition_proposal: Option<PhaseTransitionProposal>,
    /// Whether escalation is advised.
    pub escalation_recommended: bool,
    /// Closing record, when offered or closed.
    pub artifacts: Option<DocumentationArtifacts>,
}

struct Reply {
    content: String,
    response_type: ResponseType,
    ooda_progress: Option<OodaProgress>,
    evidence_requests: Vec<EvidenceRequest>,
}

impl Reply {
    fn new(content: impl Into<String>, response_type: ResponseType) -> Self {
        Self {
            content: content.into(),
            response_type,
            ooda_progress: None,
            evidence_requests: Vec::new(),
        }
    }

    fn answer(content: impl Into<String>) -> Self {
        Self::new(content, ResponseType::Answer)
    }

    fn with_progress(mut self, progress: Option<OodaProgress>) -> Self {
        self.ooda_progress = progress;
        self
    }

    fn with_requests(mut self, requests: Vec<EvidenceRequest>) -> Self {
        self.evidence_requests = requests;
        self
    }

    fn prefixed(mut self, preface: Option<String>) -> Self {
        if let Some(preface) = preface {
            self.content = format!("{}\n\n{}", preface, self.content);
        }
        self
    }

    /// Attach proposals and artifacts from the final state.
    ///
    /// A response type whose payload is missing falls back to `Answer`.
    fn into_result(self, state: &InvestigationState) -> TurnResult {
        let mode_transition_proposal = match &state.pending {
            Some(PendingConfirmation::ModeTransition(p)) => Some(p.clone()),
            _ => None,
        };
        let phase_transition_proposal = match &state.pending {
            Some(PendingConfirmation::PhaseTransition(p)) => Some(p.clone()),
            _ => None,
        };
        let artifacts = match state.pending {
            Some(PendingConfirmation::Closure) => state.artifacts.clone(),
            _ if state.is_closed() => state.artifacts.clone(),
            _ => None,
        };

        let missing = match self.response_type {
            ResponseType::ModeTransitionRequest if mode_transition_proposal.is_none() => {
                Some("mode transition proposal")
            }
            ResponseType::PhaseTransitionProposal if phase_transition_proposal.is_none() => {
                Some("phase transition proposal")
            }
            ResponseType::SolutionReady if artifacts.is_none() => Some("documentation record"),
            _ => None,
        };

        let (response_type, content) = match missing {
            Some(what) => {
                warn!(
                    case_id = %state.case_id,
                    response_type = %self.response_type,
                    "Reply has no {}, answering instead",
                    what
                );
                (
                    ResponseType::Answer,
                    format!(
                        "{}\n\n(No {} is attached to this reply, so it is shown as a plain answer.)",
                        self.content, what
                    ),
                )
            }
            None => (self.response_type, self.content),
        };

        TurnResult {
            case_id: state.case_id.clone(),
            content,
            response_type,
            phase: state.current_phase,
            conversational_mode: state.conversational_mode,
            turn_state: turn_state(state),
            ooda_progress: self.ooda_progress,
            evidence_requests: self.evidence_requests,
            mode_transition_proposal,
            phase_transition_proposal,
            escalation_recommended: state.escalation_recommended,
            artifacts,
        }
    }
}

/// Drives cases through the investigation lifecycle.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    engine: OodaEngine,
    completion: Arc<dyn TextCompletion>,
    sanitizer: Arc<dyn Sanitizer>,
    config: EngineConfig,
    policy: CallPolicy,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        store: Arc<dyn StateStore>,
        completion: Arc<dyn TextCompletion>,
        classifier: Arc<dyn EvidenceClassifier>,
        sanitizer: Arc<dyn Sanitizer>,
        config: EngineConfig,
    ) -> Self {
        let policy = CallPolicy::from(&config);
        let engine = OodaEngine::new(
            Arc::clone(&completion),
            classifier,
            Arc::clone(&sanitizer),
            policy,
        );
        Self {
            store,
            engine,
            completion,
            sanitizer,
            config,
            policy,
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// The store cases are persisted in.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    async fn case_lock(&self, case_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(case_id) {
                return Arc::clone(lock);
            }
        }
        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(case_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the registry entry once no other turn holds or waits on it.
    async fn release_case_lock(&self, case_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.write().await;
        let registered = locks
            .get(case_id)
            .is_some_and(|current| Arc::ptr_eq(current, &lock));
        // One reference in the registry, one in `lock`
        if registered && Arc::strong_count(&lock) <= 2 {
            locks.remove(case_id);
        }
    }

    /// Process one user turn for a case.
    ///
    /// The case is created on its first turn. Nothing is persisted unless the
    /// whole turn succeeds.
    pub async fn process_turn(
        &self,
        case_id: &str,
        session_id: &str,
        user_text: &str,
    ) -> AppResult<TurnResult> {
        validate_id("case_id", case_id)?;
        validate_id("session_id", session_id)?;
        if user_text.trim().is_empty() {
            return Err(EngineError::Validation {
                field: "user_text".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        let lock = self.case_lock(case_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.turn_locked(case_id, session_id, user_text).await
        };
        self.release_case_lock(case_id, lock).await;
        result
    }

    async fn turn_locked(
        &self,
        case_id: &str,
        session_id: &str,
        user_text: &str,
    ) -> AppResult<TurnResult> {
        let start = Instant::now();

        let mut state = self
            .store
            .load_state(case_id)
            .await?
            .unwrap_or_else(|| InvestigationState::new(case_id, session_id));

        if state.is_closed() {
            debug!(case_id, "Turn on closed case");
            return Ok(Reply::answer(format!(
                "Case {} is closed and read-only. Reopen it to continue investigating.",
                case_id
            ))
            .into_result(&state));
        }

        state.session_id = session_id.to_string();
        state.turn_count += 1;

        let reply = self.dispatch(&mut state, user_text).await?;

        state.updated_at = Utc::now();
        self.store.save_state(&state).await?;

        info!(
            case_id,
            turn = state.turn_count,
            phase = %state.current_phase,
            mode = %state.conversational_mode,
            response_type = %reply.response_type,
            latency_ms = start.elapsed().as_millis() as u64,
            "Processed investigation turn"
        );

        Ok(reply.into_result(&state))
    }

    /// Move a case to `target` on the user's authority.
    pub async fn override_phase(
        &self,
        case_id: &str,
        target: Phase,
        reason: &str,
    ) -> AppResult<TurnResult> {
        validate_id("case_id", case_id)?;
        if reason.trim().is_empty() {
            return Err(EngineError::Validation {
                field: "reason".to_string(),
                reason: "an override needs a reason".to_string(),
            }
            .into());
        }

        let lock = self.case_lock(case_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.override_locked(case_id, target, reason).await
        };
        self.release_case_lock(case_id, lock).await;
        result
    }

    async fn override_locked(
        &self,
        case_id: &str,
        target: Phase,
        reason: &str,
    ) -> AppResult<TurnResult> {

        let mut state = self.load_existing(case_id).await?;
        if state.is_closed() {
            return Err(EngineError::CaseClosed {
                case_id: case_id.to_string(),
            }
            .into());
        }
        if state.conversational_mode != ConversationalMode::LeadInvestigator {
            return Err(EngineError::Validation {
                field: "conversational_mode".to_string(),
                reason: "phase overrides need an active investigation".to_string(),
            }
            .into());
        }

        let outcome = lifecycle::transition_with_override(&mut state, target, reason)?;
        state.pending = None;

        let preface = match &outcome.warning {
            Some(warning) => {
                warn!(
                    case_id,
                    from = %outcome.from,
                    to = %outcome.to,
                    warning = %warning,
                    "Phase override bypassed lifecycle rules"
                );
                format!(
                    "Moved from {} to {} by override ({}). Note: {}.",
                    outcome.from, outcome.to, reason, warning
                )
            }
            None => format!("Moved from {} to {} by override ({}).", outcome.from, outcome.to, reason),
        };

        let reply = self.enter_phase_reply(&mut state).prefixed(Some(preface));

        state.updated_at = Utc::now();
        self.store.save_state(&state).await?;

        info!(case_id, phase = %state.current_phase, "Applied phase override");
        Ok(reply.into_result(&state))
    }

    /// Load a case for inspection.
    pub async fn load_case(&self, case_id: &str) -> AppResult<InvestigationState> {
        validate_id("case_id", case_id)?;
        self.load_existing(case_id).await
    }

    /// Make a closed case writable again.
    pub async fn reopen_case(&self, case_id: &str) -> AppResult<TurnResult> {
        validate_id("case_id", case_id)?;

        let lock = self.case_lock(case_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.reopen_locked(case_id).await
        };
        self.release_case_lock(case_id, lock).await;
        result
    }

    async fn reopen_locked(
        &self,
        case_id: &str,
    ) -> AppResult<TurnResult> {

        let mut state = self.load_existing(case_id).await?;
        if !state.is_closed() {
            return Err(EngineError::Validation {
                field: "case_id".to_string(),
                reason: "case is not closed".to_string(),
            }
            .into());
        }

        lifecycle::reopen_case(&mut state);
        state.updated_at = Utc::now();
        self.store.save_state(&state).await?;

        info!(case_id, "Reopened case");
        Ok(Reply::answer(format!(
            "Case {} is reopened in the documentation phase. Override to an earlier phase to keep investigating, or continue to review the closing record.",
            case_id
        ))
        .into_result(&state))
    }

    /// Most recently updated cases first.
    pub async fn list_cases(&self, limit: u32) -> AppResult<Vec<CaseSummary>> {
        Ok(self.store.list_cases(limit).await?)
    }

    async fn load_existing(&self, case_id: &str) -> AppResult<InvestigationState> {
        self.store
            .load_state(case_id)
            .await?
            .ok_or_else(|| {
                StorageError::CaseNotFound {
                    case_id: case_id.to_string(),
                }
                .into()
            })
    }

    async fn dispatch(&self, state: &mut InvestigationState, text: &str) -> EngineResult<Reply> {
        debug!(case_id = %state.case_id, turn_state = ?turn_state(state), "Dispatching turn");

        match state.pending.clone() {
            Some(PendingConfirmation::ModeTransition(proposal)) => {
                self.on_mode_confirmation(state, proposal, text).await
            }
            Some(PendingConfirmation::PhaseTransition(proposal)) => {
                self.on_phase_confirmation(state, proposal, text).await
            }
            Some(PendingConfirmation::HypothesisConflict(notice)) => {
                self.on_conflict_confirmation(state, notice, text).await
            }
            Some(PendingConfirmation::Closure) => Ok(on_closure(state, text)),
            None => match state.conversational_mode {
                ConversationalMode::Consultant => self.consultant_turn(state, text).await,
                ConversationalMode::LeadInvestigator => self.investigation_turn(state, text).await,
            },
        }
    }

    async fn consultant_turn(
        &self,
        state: &mut InvestigationState,
        text: &str,
    ) -> EngineResult<Reply> {
        let detection = detect_signal(text, ConversationalMode::Consultant);
        let sanitized = self.sanitizer.sanitize(text);

        if detection.should_request_transition {
            let proposal = ModeTransitionProposal {
                from: ConversationalMode::Consultant,
                to: ConversationalMode::LeadInvestigator,
                confidence: detection.confidence,
                signals: detection.signals,
                urgency_estimate: detection.urgency_estimate,
                investigation_mode: detection.investigation_mode_hint,
                problem_statement: sanitized,
            };
            let content = mode_transition_prompt(state, &proposal);
            info!(
                case_id = %state.case_id,
                confidence = proposal.confidence,
                urgency = %proposal.urgency_estimate,
                "Proposing lead-investigator mode"
            );
            state.pending = Some(PendingConfirmation::ModeTransition(proposal));
            return Ok(Reply::new(content, ResponseType::ModeTransitionRequest));
        }

        let answer = self.consult(sanitized).await?;
        let content = match detection.suggested_mode {
            Some(_) => format!(
                "{}\n\nIf this is affecting a running system, I can lead a structured investigation. Just say so.",
                answer
            ),
            None => answer,
        };
        Ok(Reply::answer(content))
    }

    async fn consult(&self, question: String) -> EngineResult<String> {
        let messages = vec![Message::system(CONSULTANT_PROMPT), Message::user(question)];
        let completion = Arc::clone(&self.completion);
        invoke("text_completion", self.policy, || {
            let completion = Arc::clone(&completion);
            let messages = messages.clone();
            async move {
                completion
                    .complete(CompletionPurpose::Consultant, messages)
                    .await
            }
        })
        .await
    }

    async fn on_mode_confirmation(
        &self,
        state: &mut InvestigationState,
        proposal: ModeTransitionProposal,
        text: &str,
    ) -> EngineResult<Reply> {
        state.pending = None;
        match parse_confirmation(text) {
            Confirmation::Affirmative => Ok(self.start_investigation(state, proposal)),
            Confirmation::Negative => Ok(Reply::answer(
                "Understood, staying in consultant mode. Tell me if the situation changes.",
            )),
            Confirmation::Unclear => self.consultant_turn(state, text).await,
        }
    }

    fn start_investigation(
        &self,
        state: &mut InvestigationState,
        proposal: ModeTransitionProposal,
    ) -> Reply {
        let resuming = state.current_phase != Phase::Intake;

        if state.investigation_mode.is_none() {
            state.investigation_mode = proposal.investigation_mode;
        }
        state.urgency_level = Some(
            state
                .urgency_level
                .map_or(proposal.urgency_estimate, |u| u.max(proposal.urgency_estimate)),
        );

        if state.anomaly_frame.is_none() {
            state.anomaly_frame = Some(AnomalyFrame::new(
                proposal.problem_statement.clone(),
                INITIAL_FRAME_CONFIDENCE,
            ));
            state.add_evidence(EvidenceItem::new(
                "Initial report",
                EvidenceCategory::Symptoms,
                proposal.problem_statement.clone(),
                EvidenceSource::User,
            ));
        }

        if resuming {
            state.iterations_without_progress = 0;
            if state.escalation_reason.as_deref() == Some(STALL_REASON) {
                state.escalation_recommended = false;
                state.escalation_reason = None;
            }
        }

        refresh_confirmation_policy(state, &self.config);
        let phase = lifecycle::begin_investigation(state);
        let requests = issue_entry_requests(state, phase);

        info!(
            case_id = %state.case_id,
            phase = %phase,
            investigation_mode = ?state.investigation_mode,
            urgency = ?state.urgency_level,
            resuming,
            "Investigation started"
        );

        let intro = if resuming {
            format!("Resuming the investigation in the {} phase.", phase)
        } else if state.investigation_mode == Some(InvestigationMode::PostMortem) {
            "Starting a post-mortem. Problem definition, triage and mitigation are skipped because the incident is already resolved.".to_string()
        } else {
            "Taking the lead on this investigation.".to_string()
        };

        Reply::new(plan_text(&intro, phase, &requests), ResponseType::PlanProposal)
            .with_requests(requests)
    }

    async fn investigation_turn(
        &self,
        state: &mut InvestigationState,
        text: &str,
    ) -> EngineResult<Reply> {
        if state.investigation_mode != Some(InvestigationMode::PostMortem) {
            let detection = detect_signal(text, ConversationalMode::LeadInvestigator);
            if !detection.signals.is_empty() {
                let raised = state
                    .urgency_level
                    .map_or(detection.urgency_estimate, |u| u.max(detection.urgency_estimate));
                state.urgency_level = Some(raised);
                refresh_confirmation_policy(state, &self.config);
            }
        }

        if state.current_phase == Phase::Documentation {
            return Ok(offer_closure(state));
        }

        self.run_cycle(state, text).await
    }

    async fn run_cycle(&self, state: &mut InvestigationState, text: &str) -> EngineResult<Reply> {
        let phase = state.current_phase;
        let plan = select_intensity(phase, state);
        let result = self.engine.execute_cycle(state, &plan, text).await?;

        let progress = Some(OodaProgress {
            iteration_number: result.iteration_number,
            intensity: plan.intensity,
            steps_executed: result.steps_executed.clone(),
            iterations_in_phase: state.iterations_in_phase(phase),
            max_iterations: plan.max_iterations,
            made_progress: result.made_progress,
            halted: result.halted,
            investigation_confidence: state.investigation_confidence,
            anchoring_category: result.anchoring_category,
        });

        if let Some(conflict) = result.conflicts.first().cloned() {
            let content = format!(
                "New evidence contradicts \"{}\", which earlier testing supported. I have retired it. Keep it retired? Answer no to reinstate it.",
                conflict.statement
            );
            state.pending = Some(PendingConfirmation::HypothesisConflict(conflict));
            return Ok(Reply::new(content, ResponseType::ConfirmationRequest)
                .with_progress(progress)
                .with_requests(result.new_evidence_requests));
        }

        if result.halted {
            return Ok(self.stalled_reply(state).with_progress(progress));
        }

        if lifecycle::determine_completion(state) {
            return Ok(self.propose_or_advance(state, true)?.with_progress(progress));
        }

        if lifecycle::budget_exhausted(state, plan.max_iterations) {
            if phase == Phase::RootCause {
                state.escalation_recommended = true;
                state.escalation_reason = Some(ROOT_CAUSE_BUDGET_REASON.to_string());
                warn!(case_id = %state.case_id, "Root-cause budget exhausted");
                let content = format!(
                    "Root-cause analysis used its budget of {} iterations without reaching confidence {:.2}. I recommend escalating to the owning team.\n{}",
                    plan.max_iterations,
                    lifecycle::root_cause_threshold(state),
                    hypothesis_summary(state)
                );
                return Ok(Reply::new(content, ResponseType::EscalationRequired)
                    .with_progress(progress)
                    .with_requests(open_requests(state)));
            }
            return Ok(self.propose_or_advance(state, false)?.with_progress(progress));
        }

        if !result.new_evidence_requests.is_empty() {
            let mut content = String::from("To narrow this down I need more information:");
            for request in &result.new_evidence_requests {
                content.push_str(&format!("\n- {}: {}", request.label, request.description));
            }
            return Ok(Reply::new(content, ResponseType::NeedsMoreData)
                .with_progress(progress)
                .with_requests(result.new_evidence_requests));
        }

        let headline = result
            .key_insight
            .unwrap_or_else(|| format!("Iteration {} of the {} phase is done.", result.iteration_number, phase));
        Ok(Reply::answer(format!("{}\n{}", headline, hypothesis_summary(state))).with_progress(progress))
    }

    fn stalled_reply(&self, state: &mut InvestigationState) -> Reply {
        let phase = state.current_phase;
        let requests = open_requests(state);

        if state.evidence_response_rate() < DISENGAGE_RESPONSE_RATE
            && state.iterations_without_progress >= STALL_LIMIT
        {
            state.conversational_mode = ConversationalMode::Consultant;
            info!(case_id = %state.case_id, phase = %phase, "Disengaging stalled investigation");
            return Reply::new(
                format!(
                    "The investigation has stalled and most evidence requests are unanswered. I am stepping back to consultant mode. The {} phase and everything gathered so far is kept, so we can resume when new information arrives.",
                    phase
                ),
                ResponseType::EscalationRequired,
            )
            .with_requests(requests);
        }

        let mut content = format!(
            "No progress in {} consecutive iterations of the {} phase. I recommend escalating to someone with direct access to the affected systems.",
            state.iterations_without_progress, phase
        );
        for request in &requests {
            content.push_str(&format!("\n- Still needed: {}", request.label));
        }

        // Escalation alone completes triage
        if lifecycle::determine_completion(state) {
            if let Some(proposal) = self.phase_proposal(state, true) {
                content.push_str(&format!(
                    "\n\nThe {} objectives are met with this escalation. Move on to {} ({})?",
                    proposal.from,
                    proposal.to,
                    proposal.to.objective()
                ));
                state.pending = Some(PendingConfirmation::PhaseTransition(proposal));
            }
        }
        Reply::new(content, ResponseType::EscalationRequired).with_requests(requests)
    }

    /// The transition a completed or exhausted phase leads to, if any.
    fn phase_proposal(
        &self,
        state: &mut InvestigationState,
        objectives_met: bool,
    ) -> Option<PhaseTransitionProposal> {
        let from = state.current_phase;
        if from == Phase::Triage && state.investigation_mode.is_none() {
            let mode = lifecycle::settle_mode(state);
            info!(case_id = %state.case_id, investigation_mode = %mode, "Investigation mode settled at end of triage");
        }
        let to = lifecycle::next_phase(state)?;

        let skipped_phases: Vec<Phase> = Phase::ALL
            .into_iter()
            .filter(|p| *p > from && *p < to)
            .collect();
        let reason = if objectives_met {
            format!("{} objectives met", from)
        } else {
            format!(
                "{} iteration budget used without meeting its objectives",
                from
            )
        };
        Some(PhaseTransitionProposal {
            from,
            to,
            objectives_met,
            skipped_phases,
            reason,
        })
    }

    fn propose_or_advance(
        &self,
        state: &mut InvestigationState,
        objectives_met: bool,
    ) -> EngineResult<Reply> {
        let from = state.current_phase;
        let Some(proposal) = self.phase_proposal(state, objectives_met) else {
            return Ok(Reply::answer(format!("The {} phase is complete.", from)));
        };

        if objectives_met && !state.user_confirmation_required {
            let to = proposal.to;
            lifecycle::transition(state, to, true)?;
            info!(case_id = %state.case_id, from = %from, to = %to, "Advanced phase automatically");
            let preface = format!("The {} objectives are met. Moving on.", from);
            return Ok(self.enter_phase_reply(state).prefixed(Some(preface)));
        }

        let content = format!(
            "{}. Move on to {} ({})?",
            capitalize(&proposal.reason),
            proposal.to,
            proposal.to.objective()
        );
        state.pending = Some(PendingConfirmation::PhaseTransition(proposal));
        Ok(Reply::new(content, ResponseType::PhaseTransitionProposal))
    }

    async fn on_phase_confirmation(
        &self,
        state: &mut InvestigationState,
        proposal: PhaseTransitionProposal,
        text: &str,
    ) -> EngineResult<Reply> {
        state.pending = None;
        match parse_confirmation(text) {
            Confirmation::Affirmative => {
                lifecycle::transition(state, proposal.to, proposal.objectives_met)?;
                info!(case_id = %state.case_id, from = %proposal.from, to = %proposal.to, "Phase transition confirmed");
                Ok(self.enter_phase_reply(state))
            }
            Confirmation::Negative => Ok(Reply::answer(format!(
                "Staying in the {} phase. Share anything new and I will keep going.",
                state.current_phase
            ))),
            Confirmation::Unclear => self.run_cycle(state, text).await,
        }
    }

    async fn on_conflict_confirmation(
        &self,
        state: &mut InvestigationState,
        notice: ConflictNotice,
        text: &str,
    ) -> EngineResult<Reply> {
        state.pending = None;
        match parse_confirmation(text) {
            Confirmation::Affirmative => Ok(Reply::answer(format!(
                "\"{}\" stays retired.\n{}",
                notice.statement,
                hypothesis_summary(state)
            ))),
            Confirmation::Negative => {
                state.reinstate_hypothesis(&notice.hypothesis_id);
                Ok(Reply::answer(format!(
                    "Reinstated \"{}\". Its test result is now inconclusive.\n{}",
                    notice.statement,
                    hypothesis_summary(state)
                )))
            }
            Confirmation::Unclear => self.run_cycle(state, text).await,
        }
    }

    fn enter_phase_reply(&self, state: &mut InvestigationState) -> Reply {
        let phase = state.current_phase;
        if phase == Phase::Documentation {
            return offer_closure(state);
        }
        let requests = issue_entry_requests(state, phase);
        Reply::new(
            plan_text(&format!("Entering the {} phase.", phase), phase, &requests),
            ResponseType::PlanProposal,
        )
        .with_requests(requests)
    }
}

fn on_closure(state: &mut InvestigationState, text: &str) -> Reply {
    match parse_confirmation(text) {
        Confirmation::Affirmative => {
            lifecycle::close_case(state, true);
            info!(case_id = %state.case_id, accepted = true, "Case closed");
            Reply::answer("Findings accepted. The case is closed and archived.")
        }
        Confirmation::Negative => {
            lifecycle::close_case(state, false);
            info!(case_id = %state.case_id, accepted = false, "Case closed");
            Reply::answer(
                "The case is closed with the findings marked as not accepted. Reopen it to keep investigating.",
            )
        }
        Confirmation::Unclear => Reply::new(
            "Answer yes to accept the findings and close the case, or no to close it without accepting them.",
            ResponseType::ClarificationRequest,
        ),
    }
}

fn offer_closure(state: &mut InvestigationState) -> Reply {
    let artifacts = lifecycle::build_artifacts(state);

    let mut content = format!("Investigation complete.\n\n{}", artifacts.incident_summary);
    if let Some(root_cause) = &artifacts.root_cause {
        content.push_str(&format!("\nRoot cause: {}", root_cause));
    }
    if let Some(mitigation) = &artifacts.mitigation {
        content.push_str(&format!("\nMitigation: {}", mitigation));
    }
    if let Some(solution) = &artifacts.solution {
        content.push_str(&format!("\nSolution: {}", solution));
    }
    content.push_str("\n\nDo you accept these findings and close the case?");

    state.artifacts = Some(artifacts);
    state.pending = Some(PendingConfirmation::Closure);
    Reply::new(content, ResponseType::SolutionReady)
}

/// Critical live incidents advance phases without asking when fast-tracking is on.
fn refresh_confirmation_policy(state: &mut InvestigationState, config: &EngineConfig) {
    let fast_track = config.fast_track_critical
        && state.investigation_mode == Some(InvestigationMode::ActiveIncident)
        && state.urgency_level == Some(UrgencyLevel::Critical);
    state.user_confirmation_required = config.require_phase_confirmation && !fast_track;
}

fn entry_requests(phase: Phase) -> &'static [(&'static str, &'static str, EvidenceCategory)] {
    match phase {
        Phase::ProblemDefinition => &[
            (
                "Onset",
                "When did the problem start, and is it still happening?",
                EvidenceCategory::Timeline,
            ),
            (
                "Affected scope",
                "Which services, regions or users are affected?",
                EvidenceCategory::Scope,
            ),
        ],
        Phase::Triage => &[
            (
                "Recent changes",
                "What was deployed or changed shortly before the problem started?",
                EvidenceCategory::Changes,
            ),
            (
                "Error metrics",
                "Error rate, latency or saturation metrics around the onset.",
                EvidenceCategory::Metrics,
            ),
        ],
        Phase::Mitigation => &[(
            "Rollback options",
            "Can the most recent change be rolled back or switched off by a flag?",
            EvidenceCategory::Changes,
        )],
        Phase::RootCause => &[
            (
                "Logs around onset",
                "Logs or stack traces from the affected components around the onset.",
                EvidenceCategory::Symptoms,
            ),
            (
                "Incident timeline",
                "A timeline of events from the first alert to recovery.",
                EvidenceCategory::Timeline,
            ),
        ],
        Phase::Solution => &[(
            "Fix verification",
            "How will the permanent fix be verified (tests, canary, metrics)?",
            EvidenceCategory::Metrics,
        )],
        Phase::Intake | Phase::Documentation => &[],
    }
}

fn issue_entry_requests(state: &mut InvestigationState, phase: Phase) -> Vec<EvidenceRequest> {
    let turn = state.turn_count;
    entry_requests(phase)
        .iter()
        .filter_map(|(label, description, category)| {
            state.issue_request(EvidenceRequest::new(*label, *description, *category, turn))
        })
        .collect()
}

fn open_requests(state: &InvestigationState) -> Vec<EvidenceRequest> {
    state.open_requests().into_iter().cloned().collect()
}

fn plan_text(intro: &str, phase: Phase, requests: &[EvidenceRequest]) -> String {
    let mut text = format!(
        "{}\n\nPhase {} ({}): {}.",
        intro,
        phase.index(),
        phase,
        phase.objective()
    );
    if !requests.is_empty() {
        text.push_str("\nTo start, please share:");
        for request in requests {
            text.push_str(&format!("\n- {}: {}", request.label, request.description));
        }
    }
    text
}

fn mode_transition_prompt(state: &InvestigationState, proposal: &ModeTransitionProposal) -> String {
    if state.current_phase != Phase::Intake {
        return format!(
            "This looks related to the investigation paused in the {} phase. Shall I resume leading it from there?",
            state.current_phase
        );
    }
    match proposal.investigation_mode {
        Some(InvestigationMode::PostMortem) => "This sounds like a resolved incident. Shall I lead a post-mortem? We would start at root-cause analysis.".to_string(),
        _ => format!(
            "This looks like an incident ({} urgency; signals: {}). Shall I switch to lead-investigator mode and drive a structured investigation?",
            proposal.urgency_estimate,
            proposal.signals.join(", ")
        ),
    }
}

fn hypothesis_summary(state: &InvestigationState) -> String {
    let mut active = state.active_hypotheses();
    if active.is_empty() {
        return "No active hypotheses yet.".to_string();
    }
    active.sort_by(|a, b| {
        b.likelihood
            .partial_cmp(&a.likelihood)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut text = String::from("Active hypotheses:");
    for h in active.into_iter().take(3) {
        text.push_str(&format!(
            "\n- {} [{}, likelihood {:.2}]",
            h.statement, h.category, h.likelihood
        ));
    }
    text
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn validate_id(field: &str, value: &str) -> EngineResult<()> {
    let valid = !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(EngineError::Validation {
            field: field.to_string(),
            reason: format!(
                "must be 1-{} characters of letters, digits, '-', '_', '.' or ':'",
                MAX_ID_LEN
            ),
        })
    }
}
