//! OODA engine: one Observe→Orient→Decide→Act iteration per call.
//!
//! The engine mutates the state it is handed. Callers pass a working copy and
//! persist it only when the whole turn succeeds.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::lifecycle;
use super::types::{
    ConflictNotice, EvidenceCategory, EvidenceItem, EvidenceRequest, EvidenceSource, Hypothesis,
    HypothesisCategory, InvestigationState, OodaIteration, OodaStep, Phase,
};
use super::{HierarchicalMemory, IntensityPlan};
use crate::collaborators::{
    invoke, CallPolicy, ClassificationResult, CompletionPurpose, EvidenceClassifier, Sanitizer,
    StepDelta, TextCompletion,
};
use crate::error::EngineResult;
use crate::langbase::Message;
use crate::prompts::OODA_STEP_PROMPT;

/// Consecutive no-progress iterations that count as a stall.
pub const STALL_LIMIT: u32 = 3;

/// Escalation reason recorded on a stall.
pub const STALL_REASON: &str = "stalled_after_3_iterations";

/// Confidence gain that counts as progress on its own.
pub const CONFIDENCE_PROGRESS_DELTA: f64 = 0.05;

const RECENT_EVIDENCE_LIMIT: usize = 10;

/// Outcome of one OODA iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OodaResult {
    /// Number of the iteration just run.
    pub iteration_number: u32,
    /// Steps in execution order.
    pub steps_executed: Vec<OodaStep>,
    /// Whether confidence, tests or evidence moved.
    pub made_progress: bool,
    /// The case has stalled; no further cycles until something changes.
    pub halted: bool,
    /// Supported hypotheses retired by refuting evidence in this iteration.
    pub conflicts: Vec<ConflictNotice>,
    /// Category the loop is anchored on, if any.
    pub anchoring_category: Option<HypothesisCategory>,
    /// Requests issued this iteration.
    pub new_evidence_requests: Vec<EvidenceRequest>,
    /// Takeaway from the last step.
    pub key_insight: Option<String>,
}

#[derive(Default)]
struct CycleTracker {
    evidence_analyzed: Vec<String>,
    hypotheses_generated: Vec<String>,
    hypotheses_tested: Vec<String>,
    substantive_evidence: usize,
    conflicts: Vec<ConflictNotice>,
    requests: Vec<EvidenceRequest>,
    confidence_progression: Vec<f64>,
    key_insight: Option<String>,
}

/// Runs OODA iterations against the collaborators.
#[derive(Clone)]
pub struct OodaEngine {
    completion: Arc<dyn TextCompletion>,
    classifier: Arc<dyn EvidenceClassifier>,
    sanitizer: Arc<dyn Sanitizer>,
    policy: CallPolicy,
}

impl OodaEngine {
    /// Create a new engine.
    pub fn new(
        completion: Arc<dyn TextCompletion>,
        classifier: Arc<dyn EvidenceClassifier>,
        sanitizer: Arc<dyn Sanitizer>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            completion,
            classifier,
            sanitizer,
            policy,
        }
    }

    /// Run one iteration of `plan` for the current phase.
    ///
    /// `user_text` is recorded as user evidence before any step runs. On error
    /// the state may be partially updated and must be discarded.
    pub async fn execute_cycle(
        &self,
        state: &mut InvestigationState,
        plan: &IntensityPlan,
        user_text: &str,
    ) -> EngineResult<OodaResult> {
        let started_at = Utc::now();
        let confidence_before = state.investigation_confidence;
        let tested_before = state.tested_count();
        let anchoring = state.anchoring_category();
        let mut tracker = CycleTracker {
            confidence_progression: vec![confidence_before],
            ..Default::default()
        };

        let user_input = self.observe(state, user_text, &mut tracker).await?;

        let steps: Vec<OodaStep> = OodaStep::ORDER
            .into_iter()
            .filter(|s| plan.steps.contains(s))
            .collect();

        for step in &steps {
            let messages = self.step_messages(*step, state, user_input.as_deref(), anchoring);
            let delta = self.run_step(messages).await?;
            debug!(
                case_id = %state.case_id,
                step = %step,
                "Applying OODA step delta"
            );
            self.apply_delta(state, delta, &mut tracker).await?;
            tracker
                .confidence_progression
                .push(state.investigation_confidence);
        }

        let made_progress = state.investigation_confidence - confidence_before
            >= CONFIDENCE_PROGRESS_DELTA - 1e-9
            || state.tested_count() > tested_before
            || tracker.substantive_evidence > 0;

        let halted = record_progress(state, made_progress);

        let iteration_number = state.ooda_iterations.len() as u32 + 1;
        state.ooda_iterations.push(OodaIteration {
            iteration_number,
            phase: state.current_phase,
            started_at,
            completed_at: Utc::now(),
            steps_executed: steps.clone(),
            evidence_analyzed: tracker.evidence_analyzed,
            hypotheses_generated: tracker.hypotheses_generated,
            hypotheses_tested: tracker.hypotheses_tested,
            key_insight: tracker.key_insight.clone(),
            confidence_progression: tracker.confidence_progression,
            made_progress,
        });
        state.memory = HierarchicalMemory::compress(&state.ooda_iterations);

        info!(
            case_id = %state.case_id,
            phase = %state.current_phase,
            iteration = iteration_number,
            made_progress,
            halted,
            confidence = state.investigation_confidence,
            "OODA iteration completed"
        );

        Ok(OodaResult {
            iteration_number,
            steps_executed: steps,
            made_progress,
            halted,
            conflicts: tracker.conflicts,
            anchoring_category: state.anchoring_category(),
            new_evidence_requests: tracker.requests,
            key_insight: tracker.key_insight,
        })
    }

    /// Record the user's turn as evidence and classify it.
    async fn observe(
        &self,
        state: &mut InvestigationState,
        user_text: &str,
        tracker: &mut CycleTracker,
    ) -> EngineResult<Option<String>> {
        let text = user_text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let sanitized = self.sanitizer.sanitize(text);
        let category = EvidenceCategory::infer(&sanitized);
        let item = EvidenceItem::new(
            format!("user report (turn {})", state.turn_count),
            category,
            sanitized.clone(),
            EvidenceSource::User,
        );
        let evidence_id = state.add_evidence(item);
        tracker.evidence_analyzed.push(evidence_id.clone());

        let fulfilled = state.fulfil_requests(&evidence_id, category);
        let linked = self.classify(state, &evidence_id, tracker).await?;

        // A reply counts as new information only if it answers something or bears on a hypothesis
        if fulfilled > 0 || linked > 0 {
            tracker.substantive_evidence += 1;
        }

        Ok(Some(sanitized))
    }

    /// Classify one evidence item; returns how many hypotheses it was linked to.
    async fn classify(
        &self,
        state: &mut InvestigationState,
        evidence_id: &str,
        tracker: &mut CycleTracker,
    ) -> EngineResult<usize> {
        let hypotheses: Vec<Hypothesis> =
            state.active_hypotheses().into_iter().cloned().collect();
        if hypotheses.is_empty() {
            return Ok(0);
        }
        let Some(item) = state.evidence_items.get(evidence_id).cloned() else {
            return Ok(0);
        };

        let classifier = Arc::clone(&self.classifier);
        let verdict: ClassificationResult = invoke("evidence_classifier", self.policy, || {
            let classifier = Arc::clone(&classifier);
            let item = item.clone();
            let hypotheses = hypotheses.clone();
            async move { classifier.classify(&item, &hypotheses).await }
        })
        .await?;

        let outcome = state.apply_classification(evidence_id, &verdict);
        for conflict in &outcome.conflicts {
            warn!(
                case_id = %state.case_id,
                hypothesis_id = %conflict.hypothesis_id,
                evidence_id = %conflict.evidence_id,
                "Supported hypothesis refuted; retired"
            );
        }
        tracker.hypotheses_tested.extend(outcome.newly_tested);
        tracker.conflicts.extend(outcome.conflicts);
        Ok(outcome.linked.len())
    }

    async fn run_step(&self, messages: Vec<Message>) -> EngineResult<StepDelta> {
        let completion = Arc::clone(&self.completion);
        invoke("text_completion", self.policy, || {
            let completion = Arc::clone(&completion);
            let messages = messages.clone();
            async move {
                let text = completion
                    .complete(CompletionPurpose::OodaStep, messages)
                    .await?;
                StepDelta::parse(&text)
            }
        })
        .await
    }

    async fn apply_delta(
        &self,
        state: &mut InvestigationState,
        delta: StepDelta,
        tracker: &mut CycleTracker,
    ) -> EngineResult<()> {
        let phase = state.current_phase;

        if let Some(frame) = delta.frame {
            state.revise_frame(
                self.sanitizer.sanitize(&frame.statement),
                frame.affected_components,
                frame.blast_radius.map(|b| self.sanitizer.sanitize(&b)),
                frame.confidence,
            );
        }

        for evidence in delta.evidence {
            let content = self.sanitizer.sanitize(evidence.content.trim());
            let duplicate = state
                .evidence_items
                .values()
                .any(|e| e.content.eq_ignore_ascii_case(&content));
            if content.is_empty() || duplicate {
                continue;
            }
            let category = evidence
                .category
                .unwrap_or_else(|| EvidenceCategory::infer(&content));
            let item = EvidenceItem::new(
                self.sanitizer.sanitize(&evidence.label),
                category,
                content,
                EvidenceSource::Analysis,
            )
            .with_relevance(evidence.relevance);
            let evidence_id = state.add_evidence(item);
            tracker.evidence_analyzed.push(evidence_id.clone());
            tracker.substantive_evidence += 1;
            self.classify(state, &evidence_id, tracker).await?;
        }

        for proposed in delta.hypotheses {
            let hypothesis = Hypothesis::new(
                self.sanitizer.sanitize(&proposed.statement),
                proposed.category,
                proposed.likelihood,
            );
            if let Some(id) = state.add_hypothesis(hypothesis) {
                tracker.hypotheses_generated.push(id);
            }
        }

        for update in delta.hypothesis_updates {
            if let Some(likelihood) = update.likelihood {
                state.update_likelihood(&update.hypothesis_id, likelihood);
            }
            if let Some(result) = update.test_result {
                let first_test = state
                    .hypotheses
                    .get(&update.hypothesis_id)
                    .is_some_and(|h| !h.tested);
                if state.mark_tested(&update.hypothesis_id, result) {
                    if first_test {
                        tracker.hypotheses_tested.push(update.hypothesis_id);
                    }
                } else {
                    debug!(
                        hypothesis_id = %update.hypothesis_id,
                        "Ignoring test result for hypothesis without classified evidence"
                    );
                }
            }
        }

        for request in delta.evidence_requests {
            let category = request.category.unwrap_or_else(|| {
                EvidenceCategory::infer(&format!("{} {}", request.label, request.description))
            });
            let issued = state.issue_request(EvidenceRequest::new(
                request.label,
                request.description,
                category,
                state.turn_count,
            ));
            if let Some(issued) = issued {
                tracker.requests.push(issued);
            }
        }

        if let Some(mode) = delta.investigation_mode {
            if lifecycle::mode_open(state) {
                state.investigation_mode = Some(mode);
            } else if state.investigation_mode != Some(mode) {
                debug!(
                    proposed = %mode,
                    phase = %phase,
                    "Ignoring investigation mode change after it was settled"
                );
            }
        }

        if let Some(root_cause) = delta.root_cause {
            if phase == Phase::RootCause {
                let accepted = lifecycle::conclude_root_cause(
                    state,
                    self.sanitizer.sanitize(&root_cause.statement),
                    root_cause.confidence,
                    root_cause.hypothesis_id,
                );
                if !accepted {
                    debug!(
                        confidence = root_cause.confidence,
                        threshold = lifecycle::root_cause_threshold(state),
                        "Root cause proposal below threshold"
                    );
                }
            }
        }

        if let Some(mitigation) = delta.mitigation {
            if phase == Phase::Mitigation {
                state.mitigation_applied = Some(self.sanitizer.sanitize(&mitigation));
            }
        }

        if let Some(solution) = delta.solution {
            if phase == Phase::Solution {
                state.solution = Some(self.sanitizer.sanitize(&solution));
            }
        }

        if let Some(change) = delta.confidence_delta {
            state.investigation_confidence =
                (state.investigation_confidence + change).clamp(0.0, 1.0);
        }

        if let Some(insight) = delta.key_insight {
            tracker.key_insight = Some(self.sanitizer.sanitize(&insight));
        }

        Ok(())
    }

    fn step_messages(
        &self,
        step: OodaStep,
        state: &InvestigationState,
        user_input: Option<&str>,
        anchoring: Option<HypothesisCategory>,
    ) -> Vec<Message> {
        let hypotheses: Vec<serde_json::Value> = state
            .active_hypotheses()
            .into_iter()
            .map(|h| {
                serde_json::json!({
                    "id": h.id,
                    "statement": h.statement,
                    "category": h.category,
                    "likelihood": h.likelihood,
                    "tested": h.tested,
                    "test_result": h.test_result,
                    "supporting_evidence": h.supporting_evidence,
                    "contradicting_evidence": h.contradicting_evidence,
                })
            })
            .collect();

        let evidence = state.evidence_chronological();
        let recent: Vec<serde_json::Value> = evidence
            .iter()
            .skip(evidence.len().saturating_sub(RECENT_EVIDENCE_LIMIT))
            .map(|e| {
                serde_json::json!({
                    "id": e.id,
                    "label": e.label,
                    "category": e.category,
                    "content": e.content,
                    "source": e.source,
                    "classification": e.classification,
                })
            })
            .collect();

        let open_requests: Vec<&str> = state
            .open_requests()
            .into_iter()
            .map(|r| r.label.as_str())
            .collect();

        let anchoring_warning = anchoring.map(|c| {
            format!(
                "{} or more {} hypotheses have been tested. Propose hypotheses from other categories.",
                super::ANCHORING_THRESHOLD,
                c
            )
        });

        let payload = serde_json::json!({
            "step": step,
            "stage": step.stage(),
            "instruction": step_instruction(step, state.current_phase),
            "phase": state.current_phase,
            "phase_objective": state.current_phase.objective(),
            "investigation_mode": state.investigation_mode,
            "urgency": state.urgency_level,
            "frame": state.anomaly_frame.as_ref().map(|f| serde_json::json!({
                "statement": f.statement,
                "affected_components": f.affected_components,
                "blast_radius": f.blast_radius,
                "confidence": f.confidence,
            })),
            "active_hypotheses": hypotheses,
            "recent_evidence": recent,
            "open_evidence_requests": open_requests,
            "root_cause_threshold": lifecycle::root_cause_threshold(state),
            "memory": state.memory.render(),
            "anchoring_warning": anchoring_warning,
            "user_input": user_input,
        });

        vec![
            Message::system(OODA_STEP_PROMPT),
            Message::user(serde_json::to_string_pretty(&payload).unwrap_or_default()),
        ]
    }
}

/// Update the stall counter. Returns true when the case has stalled.
fn record_progress(state: &mut InvestigationState, made_progress: bool) -> bool {
    if made_progress {
        state.iterations_without_progress = 0;
        if state.escalation_reason.as_deref() == Some(STALL_REASON) {
            state.escalation_recommended = false;
            state.escalation_reason = None;
        }
        return false;
    }

    state.iterations_without_progress += 1;
    if state.iterations_without_progress >= STALL_LIMIT {
        state.escalation_recommended = true;
        state.escalation_reason = Some(STALL_REASON.to_string());
        return true;
    }
    false
}

fn step_instruction(step: OodaStep, phase: Phase) -> String {
    let base = match step {
        OodaStep::Frame => {
            "Frame the anomaly: state what is broken, which components are affected and the blast radius. Revise the existing frame if the evidence changed the picture."
        }
        OodaStep::Scan => {
            "Scan the user input and known evidence. Extract concrete new evidence items and request the data that would most reduce uncertainty."
        }
        OodaStep::Branch => {
            "Generate or re-rank hypotheses that explain the anomaly. Avoid duplicating existing hypotheses."
        }
        OodaStep::Test => {
            "Test the active hypotheses against the evidence. Report likelihood changes and test results only for hypotheses with linked evidence."
        }
        OodaStep::Conclude => {
            "Draw conclusions for this phase. Report a root cause, mitigation or solution only if the evidence supports it."
        }
    };
    format!("{} Phase: {} ({}).", base, phase, phase.objective())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockEvidenceClassifier, MockTextCompletion, PatternSanitizer};
    use crate::error::{EngineError, LangbaseError};
    use crate::investigation::{
        select_intensity, ConversationalMode, EvidenceType, InvestigationMode, TestResult,
    };
    use std::collections::VecDeque;
    use std::time::Duration;

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(1),
        }
    }

    fn scripted(responses: Vec<&str>) -> MockTextCompletion {
        let mut queue: VecDeque<String> = responses.into_iter().map(String::from).collect();
        let mut mock = MockTextCompletion::new();
        mock.expect_complete()
            .returning(move |_, _| Ok(queue.pop_front().unwrap_or_else(|| "{}".to_string())));
        mock
    }

    fn neutral_classifier() -> MockEvidenceClassifier {
        let mut mock = MockEvidenceClassifier::new();
        mock.expect_classify()
            .returning(|_, _| Ok(ClassificationResult::neutral()));
        mock
    }

    fn engine(completion: MockTextCompletion, classifier: MockEvidenceClassifier) -> OodaEngine {
        OodaEngine::new(
            Arc::new(completion),
            Arc::new(classifier),
            Arc::new(PatternSanitizer::new().unwrap()),
            policy(),
        )
    }

    fn state_in(phase: Phase) -> InvestigationState {
        let mut s = InvestigationState::new("case-1", "session-1");
        s.conversational_mode = ConversationalMode::LeadInvestigator;
        s.investigation_mode = Some(InvestigationMode::ActiveIncident);
        s.current_phase = phase;
        s.turn_count = 1;
        s
    }

    #[tokio::test]
    async fn test_branch_step_generates_hypotheses() {
        let engine = engine(
            scripted(vec![
                r#"{"hypotheses": [
                    {"statement": "bad deploy", "category": "deployment", "likelihood": 0.6},
                    {"statement": "db saturated", "category": "infrastructure", "likelihood": 0.4}
                ], "confidence_delta": 0.1, "key_insight": "errors began at deploy time"}"#,
            ]),
            neutral_classifier(),
        );
        let mut state = state_in(Phase::Triage);
        let plan = select_intensity(Phase::Triage, &state);

        let result = engine
            .execute_cycle(&mut state, &plan, "errors started after lunch")
            .await
            .unwrap();

        assert_eq!(result.steps_executed, vec![OodaStep::Branch]);
        assert!(result.made_progress);
        assert!(!result.halted);
        assert_eq!(state.hypotheses.len(), 2);
        assert_eq!(state.ooda_iterations.len(), 1);
        assert_eq!(state.ooda_iterations[0].hypotheses_generated.len(), 2);
        assert_eq!(state.ooda_iterations[0].confidence_progression, vec![0.0, 0.1]);
        assert_eq!(state.memory.hot.len(), 1);
        assert_eq!(result.key_insight.as_deref(), Some("errors began at deploy time"));
    }

    #[tokio::test]
    async fn test_user_text_is_sanitized_before_storage() {
        let engine = engine(scripted(vec![]), neutral_classifier());
        let mut state = state_in(Phase::ProblemDefinition);
        let plan = select_intensity(Phase::ProblemDefinition, &state);

        engine
            .execute_cycle(&mut state, &plan, "ops@example.com reports 10.1.2.3 is down")
            .await
            .unwrap();

        let item = state.evidence_items.values().next().unwrap();
        assert_eq!(item.source, EvidenceSource::User);
        assert_eq!(item.content, "[REDACTED_EMAIL] reports [REDACTED_IP] is down");
    }

    #[tokio::test]
    async fn test_stall_after_three_iterations() {
        let engine = engine(scripted(vec![]), neutral_classifier());
        let mut state = state_in(Phase::RootCause);
        let plan = select_intensity(Phase::RootCause, &state);

        for i in 1..=3 {
            let result = engine
                .execute_cycle(&mut state, &plan, "still broken")
                .await
                .unwrap();
            assert!(!result.made_progress);
            assert_eq!(result.halted, i == 3);
        }

        assert!(state.escalation_recommended);
        assert_eq!(state.escalation_reason.as_deref(), Some(STALL_REASON));
        assert_eq!(state.iterations_without_progress, 3);
    }

    #[tokio::test]
    async fn test_progress_clears_stall() {
        let mut state = state_in(Phase::Triage);
        let plan = select_intensity(Phase::Triage, &state);

        let stalled = engine(scripted(vec![]), neutral_classifier());
        for _ in 0..4 {
            stalled.execute_cycle(&mut state, &plan, "").await.unwrap();
        }
        assert!(state.escalation_recommended);
        assert_eq!(state.iterations_without_progress, 4);

        let recovering = engine(
            scripted(vec![r#"{"confidence_delta": 0.2}"#]),
            neutral_classifier(),
        );
        let result = recovering.execute_cycle(&mut state, &plan, "").await.unwrap();

        assert!(result.made_progress);
        assert!(!state.escalation_recommended);
        assert_eq!(state.escalation_reason, None);
        assert_eq!(state.iterations_without_progress, 0);
    }

    #[tokio::test]
    async fn test_refuting_evidence_flags_conflict() {
        let mut state = state_in(Phase::RootCause);
        let supported = state
            .add_hypothesis(Hypothesis::new("bad deploy", HypothesisCategory::Deployment, 0.7))
            .unwrap();
        let prior = state.add_evidence(EvidenceItem::new(
            "deploy log",
            EvidenceCategory::Changes,
            "v2 deployed 14:00",
            EvidenceSource::User,
        ));
        state.apply_classification(
            &prior,
            &ClassificationResult {
                matched_hypothesis_ids: vec![supported.clone()],
                evidence_type: EvidenceType::Supportive,
                confidence_delta: 0.1,
            },
        );

        let id = supported.clone();
        let mut classifier = MockEvidenceClassifier::new();
        classifier.expect_classify().returning(move |_, _| {
            Ok(ClassificationResult {
                matched_hypothesis_ids: vec![id.clone()],
                evidence_type: EvidenceType::Refuting,
                confidence_delta: -0.4,
            })
        });
        let engine = engine(scripted(vec![]), classifier);
        let plan = select_intensity(Phase::RootCause, &state);

        let result = engine
            .execute_cycle(&mut state, &plan, "errors began an hour before the deploy")
            .await
            .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].hypothesis_id, supported);
        assert!(!state.hypotheses[&supported].is_active());
        assert_eq!(state.hypotheses.len(), 1);
    }

    #[tokio::test]
    async fn test_test_result_without_evidence_is_ignored() {
        let mut state = state_in(Phase::Mitigation);
        let h = state
            .add_hypothesis(Hypothesis::new("cache stampede", HypothesisCategory::Code, 0.5))
            .unwrap();
        let response = format!(
            r#"{{"hypothesis_updates": [{{"hypothesis_id": "{}", "test_result": "supports"}}]}}"#,
            h
        );
        let engine = engine(scripted(vec![&response]), neutral_classifier());
        let plan = select_intensity(Phase::Mitigation, &state);

        let result = engine.execute_cycle(&mut state, &plan, "").await.unwrap();

        assert!(!state.hypotheses[&h].tested);
        assert!(!result.made_progress);
    }

    #[tokio::test]
    async fn test_root_cause_below_threshold_is_rejected() {
        let engine = engine(
            scripted(vec![
                "{}",
                "{}",
                "{}",
                r#"{"root_cause": {"statement": "pool exhausted", "confidence": 0.65}}"#,
            ]),
            neutral_classifier(),
        );
        let mut state = state_in(Phase::RootCause);
        let plan = select_intensity(Phase::RootCause, &state);

        engine.execute_cycle(&mut state, &plan, "").await.unwrap();

        assert!(state.root_cause.is_none());
    }

    #[tokio::test]
    async fn test_settled_mode_cannot_move_root_cause_gate() {
        let engine = engine(
            scripted(vec![
                "{}",
                "{}",
                "{}",
                r#"{"root_cause": {"statement": "pool exhausted", "confidence": 0.72},
                    "investigation_mode": "post_mortem"}"#,
            ]),
            neutral_classifier(),
        );
        let mut state = state_in(Phase::RootCause);
        state.investigation_mode = None;
        let plan = select_intensity(Phase::RootCause, &state);

        engine.execute_cycle(&mut state, &plan, "").await.unwrap();

        assert_eq!(state.investigation_mode, None);
        let root_cause = state.root_cause.as_ref().unwrap();
        assert!(root_cause.confidence >= lifecycle::root_cause_threshold(&state));
        assert!(lifecycle::root_cause_established(&state));
    }

    #[tokio::test]
    async fn test_mode_is_decided_during_triage() {
        let first = engine(
            scripted(vec![r#"{"investigation_mode": "post_mortem"}"#]),
            neutral_classifier(),
        );
        let second = engine(
            scripted(vec![r#"{"investigation_mode": "active_incident"}"#]),
            neutral_classifier(),
        );
        let mut state = state_in(Phase::Triage);
        state.investigation_mode = None;
        let plan = select_intensity(Phase::Triage, &state);

        first.execute_cycle(&mut state, &plan, "").await.unwrap();
        assert_eq!(state.investigation_mode, Some(InvestigationMode::PostMortem));

        // Once decided it stays put
        second.execute_cycle(&mut state, &plan, "").await.unwrap();
        assert_eq!(state.investigation_mode, Some(InvestigationMode::PostMortem));
    }

    #[tokio::test]
    async fn test_scan_evidence_and_requests() {
        let engine = engine(
            scripted(vec![
                r#"{"evidence": [{"label": "stack trace", "content": "NullPointerException in CartService", "category": "symptoms"}],
                    "evidence_requests": [{"label": "deploy history", "description": "recent releases", "category": "changes"}]}"#,
                "{}",
            ]),
            neutral_classifier(),
        );
        let mut state = state_in(Phase::Mitigation);
        state.urgency_level = Some(crate::investigation::UrgencyLevel::Critical);
        state.turn_count = 20;
        let plan = select_intensity(Phase::Mitigation, &state);
        assert_eq!(plan.steps, vec![OodaStep::Scan, OodaStep::Test]);

        let result = engine.execute_cycle(&mut state, &plan, "").await.unwrap();

        assert!(result.made_progress);
        assert_eq!(result.new_evidence_requests.len(), 1);
        assert_eq!(result.new_evidence_requests[0].category, EvidenceCategory::Changes);
        let item = state.evidence_items.values().next().unwrap();
        assert_eq!(item.source, EvidenceSource::Analysis);
    }

    #[tokio::test]
    async fn test_answering_a_request_is_progress() {
        let engine = engine(scripted(vec![]), neutral_classifier());
        let mut state = state_in(Phase::Triage);
        state.issue_request(EvidenceRequest::new(
            "deploy history",
            "",
            EvidenceCategory::Changes,
            1,
        ));
        let plan = select_intensity(Phase::Triage, &state);

        let result = engine
            .execute_cycle(&mut state, &plan, "we deployed v2.4 at 14:00")
            .await
            .unwrap();

        assert!(result.made_progress);
        assert_eq!(state.evidence_response_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_collaborator_failure_surfaces_unavailable() {
        let mut completion = MockTextCompletion::new();
        completion.expect_complete().times(2).returning(|_, _| {
            Err(LangbaseError::Api {
                status: 503,
                message: "down".to_string(),
            })
        });
        let engine = engine(completion, neutral_classifier());
        let mut state = state_in(Phase::Triage);
        let plan = select_intensity(Phase::Triage, &state);

        let err = engine.execute_cycle(&mut state, &plan, "").await.unwrap_err();

        assert!(matches!(err, EngineError::CollaboratorUnavailable { attempts: 2, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_anchoring_warning_reaches_branch_prompt() {
        let mut state = state_in(Phase::Triage);
        state
            .same_category_test_count
            .insert("deployment".to_string(), 3);

        let mut completion = MockTextCompletion::new();
        completion
            .expect_complete()
            .withf(|purpose, messages| {
                *purpose == CompletionPurpose::OodaStep
                    && messages[1].content.contains("Propose hypotheses from other categories")
            })
            .times(1)
            .returning(|_, _| Ok("{}".to_string()));
        let engine = engine(completion, neutral_classifier());
        let plan = select_intensity(Phase::Triage, &state);

        let result = engine.execute_cycle(&mut state, &plan, "").await.unwrap();
        assert_eq!(result.anchoring_category, Some(HypothesisCategory::Deployment));
    }

    #[tokio::test]
    async fn test_tested_hypotheses_gain_evidence() {
        let mut state = state_in(Phase::RootCause);
        let h = state
            .add_hypothesis(Hypothesis::new("config drift", HypothesisCategory::Configuration, 0.5))
            .unwrap();
        let id = h.clone();
        let mut classifier = MockEvidenceClassifier::new();
        classifier.expect_classify().returning(move |_, _| {
            Ok(ClassificationResult {
                matched_hypothesis_ids: vec![id.clone()],
                evidence_type: EvidenceType::Supportive,
                confidence_delta: 0.2,
            })
        });
        let engine = engine(scripted(vec![]), classifier);
        let plan = select_intensity(Phase::RootCause, &state);

        let result = engine
            .execute_cycle(&mut state, &plan, "the timeout setting differs between regions")
            .await
            .unwrap();

        assert!(result.made_progress);
        let hypothesis = &state.hypotheses[&h];
        assert!(hypothesis.tested);
        assert_eq!(hypothesis.test_result, Some(TestResult::Supports));
        assert_eq!(hypothesis.supporting_evidence.len(), 1);
    }
}
