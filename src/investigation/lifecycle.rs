//! Seven-phase lifecycle: completion predicates, transitions and overrides.

use chrono::Utc;

use super::types::{
    ConversationalMode, DocumentationArtifacts, InvestigationMode, InvestigationState,
    PhaseExecution, PhaseOverride, Phase, RootCause,
};
use crate::error::{EngineError, EngineResult};

/// Root-cause confidence required for live incidents.
pub const ROOT_CAUSE_THRESHOLD: f64 = 0.70;

/// Root-cause confidence required for post-mortems.
pub const POST_MORTEM_ROOT_CAUSE_THRESHOLD: f64 = 0.75;

/// Skip reason for phases 1 to 3 when a post-mortem enters at root cause.
pub const RESOLVED_SKIP_REASON: &str = "incident already resolved";

/// Skip reason for mitigation on the 2 to 4 post-mortem path.
pub const POST_MORTEM_MITIGATION_SKIP_REASON: &str = "mitigation not applicable to post-mortem";

/// Minimum frame confidence to finish problem definition.
pub const FRAME_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// What an override did.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideOutcome {
    /// Phase before the override.
    pub from: Phase,
    /// Phase after the override.
    pub to: Phase,
    /// Phases jumped over.
    pub skipped_phases: Vec<Phase>,
    /// Set when the regular rules would have rejected the transition.
    pub warning: Option<String>,
}

/// Confidence a root cause needs for this case.
pub fn root_cause_threshold(state: &InvestigationState) -> f64 {
    if state.investigation_mode == Some(InvestigationMode::PostMortem) {
        POST_MORTEM_ROOT_CAUSE_THRESHOLD
    } else {
        ROOT_CAUSE_THRESHOLD
    }
}

/// Whether the investigation mode may still be decided.
///
/// The mode settles once the case leaves triage or a root cause is recorded,
/// so neither the mitigation path nor the root-cause gate can change under it.
pub fn mode_open(state: &InvestigationState) -> bool {
    state.investigation_mode.is_none()
        && state.current_phase <= Phase::Triage
        && state.root_cause.is_none()
}

/// Decide an undetermined mode before the case moves past triage.
///
/// Without a post-mortem signal the incident is treated as live.
pub fn settle_mode(state: &mut InvestigationState) -> InvestigationMode {
    *state
        .investigation_mode
        .get_or_insert(InvestigationMode::ActiveIncident)
}

/// Whether the established root cause passes the confidence gate.
pub fn root_cause_established(state: &InvestigationState) -> bool {
    state
        .root_cause
        .as_ref()
        .is_some_and(|rc| rc.confidence >= root_cause_threshold(state))
}

/// Record a root cause if it clears the threshold. This is the only place
/// `root_cause` is written.
pub fn conclude_root_cause(
    state: &mut InvestigationState,
    statement: impl Into<String>,
    confidence: f64,
    hypothesis_id: Option<String>,
) -> bool {
    if confidence < root_cause_threshold(state) || confidence > 1.0 {
        return false;
    }
    state.root_cause = Some(RootCause {
        statement: statement.into(),
        confidence,
        hypothesis_id,
        concluded_at: Utc::now(),
    });
    true
}

/// Whether `phase`'s objectives are met for this state.
pub fn phase_complete(phase: Phase, state: &InvestigationState) -> bool {
    match phase {
        Phase::Intake => state.anomaly_frame.is_some() && state.urgency_level.is_some(),
        Phase::ProblemDefinition => {
            state
                .anomaly_frame
                .as_ref()
                .is_some_and(|f| f.confidence >= FRAME_CONFIDENCE_THRESHOLD)
                && state.evidence_items.len() >= 2
        }
        Phase::Triage => state.hypotheses.len() >= 2 || state.escalation_recommended,
        Phase::Mitigation => state.mitigation_applied.is_some(),
        Phase::RootCause => root_cause_established(state),
        Phase::Solution => state.solution.is_some(),
        Phase::Documentation => true,
    }
}

/// Whether the current phase's objectives are met.
pub fn determine_completion(state: &InvestigationState) -> bool {
    phase_complete(state.current_phase, state)
}

/// The phase a regular transition leads to.
///
/// Triage has no successor until the investigation mode is known.
pub fn next_phase(state: &InvestigationState) -> Option<Phase> {
    match (state.current_phase, state.investigation_mode) {
        (Phase::Triage, Some(InvestigationMode::PostMortem)) => Some(Phase::RootCause),
        (Phase::Triage, None) => None,
        (phase, _) => phase.next(),
    }
}

fn mitigation_blocked(state: &InvestigationState) -> Option<&'static str> {
    match state.investigation_mode {
        Some(InvestigationMode::ActiveIncident) => None,
        Some(InvestigationMode::PostMortem) => {
            Some("mitigation is not reachable in a post-mortem investigation")
        }
        None => Some("mitigation requires an active incident and the investigation mode is undetermined"),
    }
}

/// Check a regular (non-override) transition from the current phase.
pub fn validate_transition(state: &InvestigationState, to: Phase) -> EngineResult<()> {
    let from = state.current_phase;
    let post_mortem = state.investigation_mode == Some(InvestigationMode::PostMortem);
    let invalid = |reason: String| EngineError::InvalidTransition { from, to, reason };

    if to == from {
        return Err(invalid("already in this phase".to_string()));
    }
    if to < from {
        return Err(invalid("backward transitions require an override".to_string()));
    }
    if to == Phase::Mitigation {
        if let Some(reason) = mitigation_blocked(state) {
            return Err(invalid(reason.to_string()));
        }
    }

    let post_mortem_skip = post_mortem && from == Phase::Triage && to == Phase::RootCause;
    if !post_mortem_skip && to.index() != from.index() + 1 {
        return Err(invalid(format!(
            "transition skips {} phase(s)",
            to.index() - from.index() - 1
        )));
    }
    if from == Phase::RootCause && !root_cause_established(state) {
        return Err(invalid(format!(
            "root cause not established with confidence >= {:.2}",
            root_cause_threshold(state)
        )));
    }

    Ok(())
}

/// Perform a regular transition to `to`.
///
/// Returns the phases jumped over (only mitigation, on the post-mortem path).
pub fn transition(
    state: &mut InvestigationState,
    to: Phase,
    objectives_met: bool,
) -> EngineResult<Vec<Phase>> {
    validate_transition(state, to)?;

    let skipped: Vec<Phase> = phases_between(state.current_phase, to);
    close_current_phase(state, objectives_met);
    for phase in &skipped {
        record_skipped(state, *phase, POST_MORTEM_MITIGATION_SKIP_REASON);
    }
    enter_phase(state, to);
    Ok(skipped)
}

/// Move to any phase on the user's authority.
///
/// Rule violations are logged in `phase_overrides` and reported as a warning.
/// Entering mitigation outside an active incident is refused even here.
pub fn transition_with_override(
    state: &mut InvestigationState,
    to: Phase,
    reason: &str,
) -> EngineResult<OverrideOutcome> {
    let from = state.current_phase;

    if to == from {
        return Err(EngineError::InvalidTransition {
            from,
            to,
            reason: "already in this phase".to_string(),
        });
    }
    if to == Phase::Intake {
        return Err(EngineError::InvalidTransition {
            from,
            to,
            reason: "intake is only used in consultant mode".to_string(),
        });
    }
    if to > Phase::Triage {
        settle_mode(state);
    }
    if to == Phase::Mitigation {
        if let Some(blocked) = mitigation_blocked(state) {
            return Err(EngineError::InvalidTransition {
                from,
                to,
                reason: blocked.to_string(),
            });
        }
    }

    let warning = validate_transition(state, to).err().map(|e| match e {
        EngineError::InvalidTransition { reason, .. } => reason,
        other => other.to_string(),
    });

    let skipped = phases_between(from, to);
    close_current_phase(state, false);
    for phase in &skipped {
        record_skipped(state, *phase, reason);
    }
    enter_phase(state, to);

    if let Some(warning) = &warning {
        state.phase_overrides.push(PhaseOverride {
            from,
            to,
            skipped_phases: skipped.clone(),
            reason: reason.to_string(),
            warning: warning.clone(),
            turn: state.turn_count,
            at: Utc::now(),
        });
    }

    Ok(OverrideOutcome {
        from,
        to,
        skipped_phases: skipped,
        warning,
    })
}

/// Switch a case into lead-investigator mode and pick its entry phase.
///
/// A case that was investigated before resumes where it stopped. A fresh
/// post-mortem enters at root cause with phases 1 to 3 marked skipped.
pub fn begin_investigation(state: &mut InvestigationState) -> Phase {
    state.conversational_mode = ConversationalMode::LeadInvestigator;

    if state.current_phase != Phase::Intake {
        return state.current_phase;
    }

    close_current_phase(state, phase_complete(Phase::Intake, state));

    if state.investigation_mode == Some(InvestigationMode::PostMortem) {
        for phase in [Phase::ProblemDefinition, Phase::Triage, Phase::Mitigation] {
            record_skipped(state, phase, RESOLVED_SKIP_REASON);
        }
        enter_phase(state, Phase::RootCause);
    } else {
        enter_phase(state, Phase::ProblemDefinition);
    }

    state.current_phase
}

/// Whether the phase has used up its iteration budget without completing.
pub fn budget_exhausted(state: &InvestigationState, max_iterations: u32) -> bool {
    max_iterations > 0
        && state.iterations_in_phase(state.current_phase) >= max_iterations
        && !determine_completion(state)
}

/// Build the closing record. Depends only on the state.
pub fn build_artifacts(state: &InvestigationState) -> DocumentationArtifacts {
    let frame = state
        .anomaly_frame
        .as_ref()
        .map(|f| f.statement.clone())
        .unwrap_or_else(|| "No problem statement recorded".to_string());
    let mode = state
        .investigation_mode
        .map(|m| m.to_string())
        .unwrap_or_else(|| "undetermined".to_string());
    let urgency = state
        .urgency_level
        .map(|u| u.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let incident_summary = format!(
        "{} ({} investigation, {} urgency). {} evidence items, {} hypotheses, {} OODA iterations over {} turns.",
        frame,
        mode,
        urgency,
        state.evidence_items.len(),
        state.hypotheses.len(),
        state.ooda_iterations.len(),
        state.turn_count
    );

    let phase_timeline = state
        .phase_history
        .iter()
        .map(|p| match (&p.skip_reason, p.exited_turn) {
            (Some(reason), _) => format!("{}: skipped ({})", p.phase, reason),
            (None, Some(exit)) => format!(
                "{}: turns {}-{}{}",
                p.phase,
                p.entered_turn,
                exit,
                if p.objectives_met { "" } else { ", objectives not met" }
            ),
            (None, None) => format!("{}: entered at turn {}", p.phase, p.entered_turn),
        })
        .collect();

    let mut retired: Vec<_> = state.hypotheses.values().filter(|h| !h.is_active()).collect();
    retired.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let retired_hypotheses = retired
        .into_iter()
        .map(|h| match &h.retired_reason {
            Some(reason) => format!("{} ({})", h.statement, reason),
            None => h.statement.clone(),
        })
        .collect();

    DocumentationArtifacts {
        incident_summary,
        root_cause: state
            .root_cause
            .as_ref()
            .map(|rc| format!("{} (confidence {:.2})", rc.statement, rc.confidence)),
        mitigation: state.mitigation_applied.clone(),
        solution: state.solution.clone(),
        phase_timeline,
        retired_hypotheses,
        evidence_count: state.evidence_items.len(),
        generated_at: state.updated_at,
        accepted: None,
    }
}

/// Archive the case after the user answered the closure prompt.
pub fn close_case(state: &mut InvestigationState, accepted: bool) {
    if let Some(artifacts) = state.artifacts.as_mut() {
        artifacts.accepted = Some(accepted);
    }
    close_current_phase(state, true);
    state.pending = None;
    state.closed_at = Some(Utc::now());
}

/// Make an archived case writable again, back in documentation.
pub fn reopen_case(state: &mut InvestigationState) {
    state.closed_at = None;
    state.pending = None;
    if let Some(artifacts) = state.artifacts.as_mut() {
        artifacts.accepted = None;
    }
    state.conversational_mode = ConversationalMode::LeadInvestigator;
    enter_phase(state, Phase::Documentation);
}

fn phases_between(from: Phase, to: Phase) -> Vec<Phase> {
    if to <= from {
        return Vec::new();
    }
    Phase::ALL
        .iter()
        .copied()
        .filter(|p| *p > from && *p < to)
        .collect()
}

fn close_current_phase(state: &mut InvestigationState, objectives_met: bool) {
    let turn = state.turn_count;
    if let Some(current) = state
        .phase_history
        .iter_mut()
        .rev()
        .find(|p| p.exited_turn.is_none() && p.skip_reason.is_none())
    {
        current.exited_turn = Some(turn);
        current.exited_at = Some(Utc::now());
        current.objectives_met = objectives_met;
    }
}

fn record_skipped(state: &mut InvestigationState, phase: Phase, reason: &str) {
    let now = Utc::now();
    state.phase_history.push(PhaseExecution {
        phase,
        entered_turn: state.turn_count,
        exited_turn: Some(state.turn_count),
        objectives_met: false,
        skip_reason: Some(reason.to_string()),
        entered_at: now,
        exited_at: Some(now),
    });
}

fn enter_phase(state: &mut InvestigationState, phase: Phase) {
    state.phase_history.push(PhaseExecution {
        phase,
        entered_turn: state.turn_count,
        exited_turn: None,
        objectives_met: false,
        skip_reason: None,
        entered_at: Utc::now(),
        exited_at: None,
    });
    state.current_phase = phase;
}
