//! Adaptive OODA intensity selection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::types::{Intensity, InvestigationState, OodaStep, Phase};

/// Complexity below which a phase runs at light intensity.
pub const LIGHT_COMPLEXITY_CEILING: f64 = 0.3;

/// What the OODA engine should run for one phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityPlan {
    /// Selected depth.
    pub intensity: Intensity,
    /// Steps in execution order.
    pub steps: Vec<OodaStep>,
    /// OODA iteration budget for the phase.
    pub max_iterations: u32,
    /// Score the depth was derived from.
    pub complexity: f64,
}

impl IntensityPlan {
    fn none() -> Self {
        Self {
            intensity: Intensity::None,
            steps: Vec::new(),
            max_iterations: 0,
            complexity: 0.0,
        }
    }
}

/// Case complexity in [0, 1], a sum of capped terms.
pub fn complexity_score(state: &InvestigationState) -> f64 {
    let components = state
        .anomaly_frame
        .as_ref()
        .map_or(0, |f| f.affected_components.len());
    let component_term = 0.2 * (components as f64 / 5.0).min(1.0);

    let categories: BTreeSet<_> = state.evidence_items.values().map(|e| e.category).collect();
    let category_term = 0.2 * (categories.len() as f64 / 6.0).min(1.0);

    let hypothesis_term = match state.hypotheses.len() {
        n if n > 5 => 0.2,
        n if n > 2 => 0.1,
        _ => 0.0,
    };

    let conversation_term = match state.turn_count {
        n if n > 15 => 0.2,
        n if n > 8 => 0.1,
        _ => 0.0,
    };

    let urgency_term = if state.urgency_level.is_some_and(|u| u.is_elevated()) {
        0.2
    } else {
        0.0
    };

    (component_term + category_term + hypothesis_term + conversation_term + urgency_term)
        .clamp(0.0, 1.0)
}

/// Select intensity, steps and iteration budget for `phase`.
///
/// Pure: identical inputs always produce identical plans.
pub fn select_intensity(phase: Phase, state: &InvestigationState) -> IntensityPlan {
    if !phase.is_investigative() {
        return IntensityPlan::none();
    }

    let complexity = complexity_score(state);

    if phase == Phase::RootCause {
        let budget = 2 + (6.0 * complexity).ceil() as u32;
        return IntensityPlan {
            intensity: Intensity::Full,
            steps: OodaStep::FULL_LOOP.to_vec(),
            max_iterations: budget.max(2),
            complexity,
        };
    }

    let focus: &[OodaStep] = match phase {
        Phase::ProblemDefinition => &[OodaStep::Frame],
        Phase::Triage => &[OodaStep::Branch],
        Phase::Mitigation => &[OodaStep::Test],
        _ => &[OodaStep::Test, OodaStep::Conclude],
    };

    if complexity < LIGHT_COMPLEXITY_CEILING {
        return IntensityPlan {
            intensity: Intensity::Light,
            steps: focus.to_vec(),
            max_iterations: 2,
            complexity,
        };
    }

    let mut steps = focus.to_vec();
    steps.push(OodaStep::Scan);
    steps.sort();

    IntensityPlan {
        intensity: Intensity::Medium,
        steps,
        max_iterations: 4,
        complexity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::{
        AnomalyFrame, EvidenceCategory, EvidenceItem, EvidenceSource, Hypothesis,
        HypothesisCategory, UrgencyLevel,
    };
    use pretty_assertions::assert_eq;

    fn state() -> InvestigationState {
        InvestigationState::new("case-1", "session-1")
    }

    fn add_evidence(state: &mut InvestigationState, category: EvidenceCategory) {
        let item = EvidenceItem::new("e", category, "content", EvidenceSource::User);
        state.evidence_items.insert(item.id.clone(), item);
    }

    fn add_hypotheses(state: &mut InvestigationState, n: usize) {
        for i in 0..n {
            let h = Hypothesis::new(format!("h{}", i), HypothesisCategory::Code, 0.3);
            state.hypotheses.insert(h.id.clone(), h);
        }
    }

    #[test]
    fn test_terminal_phases_have_no_steps() {
        let s = state();
        for phase in [Phase::Intake, Phase::Documentation] {
            let plan = select_intensity(phase, &s);
            assert_eq!(plan.intensity, Intensity::None);
            assert!(plan.steps.is_empty());
            assert_eq!(plan.max_iterations, 0);
        }
    }

    #[test]
    fn test_light_focus_steps() {
        let s = state();
        let expected = [
            (Phase::ProblemDefinition, vec![OodaStep::Frame]),
            (Phase::Triage, vec![OodaStep::Branch]),
            (Phase::Mitigation, vec![OodaStep::Test]),
            (Phase::Solution, vec![OodaStep::Test, OodaStep::Conclude]),
        ];
        for (phase, steps) in expected {
            let plan = select_intensity(phase, &s);
            assert_eq!(plan.intensity, Intensity::Light, "{}", phase);
            assert_eq!(plan.steps, steps, "{}", phase);
            assert_eq!(plan.max_iterations, 2);
        }
    }

    #[test]
    fn test_medium_adds_scan() {
        let mut s = state();
        s.urgency_level = Some(UrgencyLevel::Critical);
        add_hypotheses(&mut s, 6);
        assert!(complexity_score(&s) >= LIGHT_COMPLEXITY_CEILING);

        let expected = [
            (Phase::ProblemDefinition, vec![OodaStep::Frame, OodaStep::Scan]),
            (Phase::Triage, vec![OodaStep::Scan, OodaStep::Branch]),
            (Phase::Mitigation, vec![OodaStep::Scan, OodaStep::Test]),
            (
                Phase::Solution,
                vec![OodaStep::Scan, OodaStep::Test, OodaStep::Conclude],
            ),
        ];
        for (phase, steps) in expected {
            let plan = select_intensity(phase, &s);
            assert_eq!(plan.intensity, Intensity::Medium, "{}", phase);
            assert_eq!(plan.steps, steps, "{}", phase);
            assert_eq!(plan.max_iterations, 4);
        }
    }

    #[test]
    fn test_root_cause_is_full() {
        let plan = select_intensity(Phase::RootCause, &state());
        assert_eq!(plan.intensity, Intensity::Full);
        assert_eq!(plan.steps, OodaStep::FULL_LOOP.to_vec());
        assert_eq!(plan.max_iterations, 2);
    }

    #[test]
    fn test_root_cause_budget_scales_with_complexity() {
        let mut s = state();
        s.urgency_level = Some(UrgencyLevel::High);
        s.turn_count = 20;
        // 0.2 + 0.2 = 0.4 -> 2 + ceil(2.4) = 5
        assert_eq!(select_intensity(Phase::RootCause, &s).max_iterations, 5);
    }

    #[test]
    fn test_complexity_terms() {
        let mut s = state();
        assert_eq!(complexity_score(&s), 0.0);

        let mut frame = AnomalyFrame::new("checkout failing", 0.5);
        frame.affected_components = (0..10).map(|i| format!("svc-{}", i)).collect();
        s.anomaly_frame = Some(frame);
        assert!((complexity_score(&s) - 0.2).abs() < 1e-9);

        for category in [
            EvidenceCategory::Symptoms,
            EvidenceCategory::Timeline,
            EvidenceCategory::Changes,
        ] {
            add_evidence(&mut s, category);
        }
        // Duplicate categories do not count twice
        add_evidence(&mut s, EvidenceCategory::Symptoms);
        assert!((complexity_score(&s) - 0.3).abs() < 1e-9);

        add_hypotheses(&mut s, 6);
        s.turn_count = 16;
        s.urgency_level = Some(UrgencyLevel::Critical);
        assert!((complexity_score(&s) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_low_urgency_adds_nothing() {
        let mut s = state();
        s.urgency_level = Some(UrgencyLevel::Medium);
        assert_eq!(complexity_score(&s), 0.0);
    }

    #[test]
    fn test_select_intensity_is_deterministic() {
        let mut s = state();
        add_hypotheses(&mut s, 4);
        s.turn_count = 9;
        for phase in Phase::ALL {
            assert_eq!(select_intensity(phase, &s), select_intensity(phase, &s));
        }
    }
}
