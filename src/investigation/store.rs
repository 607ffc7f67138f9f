//! Evidence and hypothesis lifecycle on [`InvestigationState`].
//!
//! Records are never removed. Hypotheses that stop being plausible are
//! retired, and evidence only ever gains links and a classification.

use chrono::Utc;
use std::collections::BTreeSet;

use super::types::{
    AnomalyFrame, ConflictNotice, EvidenceCategory, EvidenceItem, EvidenceRequest, EvidenceType,
    FrameRevision, Hypothesis, HypothesisCategory, HypothesisStatus, InvestigationState, Phase,
    TestResult,
};
use crate::collaborators::ClassificationResult;

/// Tested hypotheses of one category before the case counts as anchored.
pub const ANCHORING_THRESHOLD: u32 = 3;

/// What applying a classifier verdict changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationOutcome {
    /// Hypotheses the evidence was linked to.
    pub linked: Vec<String>,
    /// Hypotheses that moved from untested to tested.
    pub newly_tested: Vec<String>,
    /// Supported hypotheses retired by refuting evidence.
    pub conflicts: Vec<ConflictNotice>,
}

impl InvestigationState {
    /// Active hypotheses, oldest first.
    pub fn active_hypotheses(&self) -> Vec<&Hypothesis> {
        let mut active: Vec<&Hypothesis> =
            self.hypotheses.values().filter(|h| h.is_active()).collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        active
    }

    /// Evidence items, oldest first.
    pub fn evidence_chronological(&self) -> Vec<&EvidenceItem> {
        let mut items: Vec<&EvidenceItem> = self.evidence_items.values().collect();
        items.sort_by(|a, b| a.collected_at.cmp(&b.collected_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Store an evidence item and return its id.
    pub fn add_evidence(&mut self, item: EvidenceItem) -> String {
        let id = item.id.clone();
        self.evidence_items.insert(id.clone(), item);
        id
    }

    /// Store a hypothesis unless an active one already says the same thing.
    pub fn add_hypothesis(&mut self, hypothesis: Hypothesis) -> Option<String> {
        let statement = hypothesis.statement.trim().to_lowercase();
        let duplicate = self
            .hypotheses
            .values()
            .any(|h| h.is_active() && h.statement.trim().to_lowercase() == statement);
        if duplicate || statement.is_empty() {
            return None;
        }

        let id = hypothesis.id.clone();
        self.hypotheses.insert(id.clone(), hypothesis);
        Some(id)
    }

    /// Number of hypotheses that have been tested.
    pub fn tested_count(&self) -> usize {
        self.hypotheses.values().filter(|h| h.tested).count()
    }

    /// Distinct evidence categories seen so far.
    pub fn distinct_evidence_categories(&self) -> BTreeSet<EvidenceCategory> {
        self.evidence_items.values().map(|e| e.category).collect()
    }

    /// Apply an evidence classifier verdict for `evidence_id`.
    ///
    /// Supportive or refuting evidence is linked to each matched active
    /// hypothesis and marks it tested. Refuting evidence against a hypothesis
    /// already tested as supported retires it and reports a conflict instead.
    pub fn apply_classification(
        &mut self,
        evidence_id: &str,
        verdict: &ClassificationResult,
    ) -> ClassificationOutcome {
        let mut outcome = ClassificationOutcome::default();

        let Some(evidence) = self.evidence_items.get_mut(evidence_id) else {
            return outcome;
        };
        evidence.classification = Some(verdict.evidence_type);
        if verdict.evidence_type == EvidenceType::Neutral {
            return outcome;
        }

        let now = Utc::now();
        let magnitude = verdict.confidence_delta.abs();

        for hypothesis_id in &verdict.matched_hypothesis_ids {
            let Some(hypothesis) = self.hypotheses.get_mut(hypothesis_id) else {
                continue;
            };
            if !hypothesis.is_active() {
                continue;
            }

            let first_test = !hypothesis.tested;
            match verdict.evidence_type {
                EvidenceType::Supportive => {
                    push_unique(&mut hypothesis.supporting_evidence, evidence_id);
                    hypothesis.likelihood = (hypothesis.likelihood + magnitude).clamp(0.0, 1.0);
                    if first_test {
                        hypothesis.test_result = Some(TestResult::Supports);
                    }
                }
                EvidenceType::Refuting => {
                    push_unique(&mut hypothesis.contradicting_evidence, evidence_id);
                    hypothesis.likelihood = (hypothesis.likelihood - magnitude).clamp(0.0, 1.0);
                    if hypothesis.tested && hypothesis.test_result == Some(TestResult::Supports) {
                        hypothesis.status = HypothesisStatus::Retired;
                        hypothesis.retired_reason =
                            Some(format!("refuted by evidence {}", evidence_id));
                        outcome.conflicts.push(ConflictNotice {
                            hypothesis_id: hypothesis.id.clone(),
                            statement: hypothesis.statement.clone(),
                            evidence_id: evidence_id.to_string(),
                        });
                    } else if first_test {
                        hypothesis.test_result = Some(TestResult::Refutes);
                    }
                }
                EvidenceType::Neutral => {}
            }

            hypothesis.tested = true;
            hypothesis.updated_at = now;
            let category = hypothesis.category;
            outcome.linked.push(hypothesis_id.clone());

            if first_test {
                outcome.newly_tested.push(hypothesis_id.clone());
                self.count_tested(category);
            }
        }

        if let Some(evidence) = self.evidence_items.get_mut(evidence_id) {
            for id in &outcome.linked {
                push_unique(&mut evidence.related_hypotheses, id);
            }
        }

        outcome
    }

    /// Record a test result. Refused unless evidence has been classified
    /// against the hypothesis.
    pub fn mark_tested(&mut self, hypothesis_id: &str, result: TestResult) -> bool {
        let Some(hypothesis) = self.hypotheses.get_mut(hypothesis_id) else {
            return false;
        };
        if !hypothesis.is_active() || !hypothesis.has_evidence() {
            return false;
        }

        let first_test = !hypothesis.tested;
        hypothesis.tested = true;
        hypothesis.test_result = Some(result);
        hypothesis.updated_at = Utc::now();
        let category = hypothesis.category;

        if first_test {
            self.count_tested(category);
        }
        true
    }

    /// Set an active hypothesis's likelihood.
    pub fn update_likelihood(&mut self, hypothesis_id: &str, likelihood: f64) -> bool {
        match self.hypotheses.get_mut(hypothesis_id) {
            Some(h) if h.is_active() => {
                h.likelihood = likelihood.clamp(0.0, 1.0);
                h.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Retire a hypothesis. It stays in the map.
    pub fn retire_hypothesis(&mut self, hypothesis_id: &str, reason: impl Into<String>) -> bool {
        match self.hypotheses.get_mut(hypothesis_id) {
            Some(h) if h.is_active() => {
                h.status = HypothesisStatus::Retired;
                h.retired_reason = Some(reason.into());
                h.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Bring a retired hypothesis back with an inconclusive test result.
    pub fn reinstate_hypothesis(&mut self, hypothesis_id: &str) -> bool {
        match self.hypotheses.get_mut(hypothesis_id) {
            Some(h) if !h.is_active() => {
                h.status = HypothesisStatus::Active;
                h.retired_reason = None;
                h.test_result = Some(TestResult::Inconclusive);
                h.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn count_tested(&mut self, category: HypothesisCategory) {
        *self
            .same_category_test_count
            .entry(category.as_str().to_string())
            .or_insert(0) += 1;
    }

    /// Category the investigation keeps testing, if any.
    pub fn anchoring_category(&self) -> Option<HypothesisCategory> {
        HypothesisCategory::ALL.into_iter().find(|c| {
            self.same_category_test_count
                .get(c.as_str())
                .is_some_and(|n| *n >= ANCHORING_THRESHOLD)
        })
    }

    /// Replace the anomaly frame, keeping the previous version in its history.
    pub fn revise_frame(
        &mut self,
        statement: impl Into<String>,
        affected_components: Vec<String>,
        blast_radius: Option<String>,
        confidence: f64,
    ) {
        let statement = statement.into();
        let turn = self.turn_count;

        match &mut self.anomaly_frame {
            Some(frame) => {
                frame.revisions.push(FrameRevision {
                    statement: frame.statement.clone(),
                    confidence: frame.confidence,
                    turn,
                    revised_at: Utc::now(),
                });
                frame.statement = statement;
                frame.confidence = confidence.clamp(0.0, 1.0);
                if !affected_components.is_empty() {
                    frame.affected_components = affected_components;
                }
                if blast_radius.is_some() {
                    frame.blast_radius = blast_radius;
                }
            }
            None => {
                let mut frame = AnomalyFrame::new(statement, confidence);
                frame.affected_components = affected_components;
                frame.blast_radius = blast_radius;
                self.anomaly_frame = Some(frame);
            }
        }
    }

    /// Issue an evidence request unless an open one with the same label exists.
    pub fn issue_request(&mut self, request: EvidenceRequest) -> Option<EvidenceRequest> {
        let label = request.label.trim().to_lowercase();
        let duplicate = self
            .evidence_requests
            .iter()
            .any(|r| !r.is_fulfilled() && r.label.trim().to_lowercase() == label);
        if duplicate {
            return None;
        }
        self.evidence_requests.push(request.clone());
        Some(request)
    }

    /// Mark open requests of `category` as answered by `evidence_id`.
    pub fn fulfil_requests(&mut self, evidence_id: &str, category: EvidenceCategory) -> usize {
        let mut fulfilled = 0;
        for request in self
            .evidence_requests
            .iter_mut()
            .filter(|r| !r.is_fulfilled() && r.category == category)
        {
            request.fulfilled_by = Some(evidence_id.to_string());
            fulfilled += 1;
        }
        fulfilled
    }

    /// Requests still waiting for evidence.
    pub fn open_requests(&self) -> Vec<&EvidenceRequest> {
        self.evidence_requests
            .iter()
            .filter(|r| !r.is_fulfilled())
            .collect()
    }

    /// Fraction of issued requests the user has answered; 1.0 when none were issued.
    pub fn evidence_response_rate(&self) -> f64 {
        if self.evidence_requests.is_empty() {
            return 1.0;
        }
        let fulfilled = self
            .evidence_requests
            .iter()
            .filter(|r| r.is_fulfilled())
            .count();
        fulfilled as f64 / self.evidence_requests.len() as f64
    }

    /// OODA iterations run since the case last entered `phase`.
    pub fn iterations_in_phase(&self, phase: Phase) -> u32 {
        let entered_at = self
            .phase_history
            .iter()
            .rev()
            .find(|p| p.phase == phase && p.skip_reason.is_none())
            .map(|p| p.entered_at);

        self.ooda_iterations
            .iter()
            .filter(|it| it.phase == phase && entered_at.map_or(true, |t| it.started_at >= t))
            .count() as u32
    }
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|existing| existing == id) {
        list.push(id.to_string());
    }
}
