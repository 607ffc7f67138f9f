//! Deterministic incident-signal detection.
//!
//! Scores free text for signs of a live or past incident and recommends a
//! conversational mode. No LLM is involved, so the same text always yields the
//! same detection.

use serde::{Deserialize, Serialize};

use super::types::{ConversationalMode, InvestigationMode, UrgencyLevel};

/// Weight of a strong incident signal.
pub const STRONG_WEIGHT: f64 = 0.5;

/// Weight of a moderate incident signal.
pub const MODERATE_WEIGHT: f64 = 0.2;

/// Confidence at which a mode transition is requested.
pub const TRANSITION_THRESHOLD: f64 = 0.7;

/// Confidence at which a mode is suggested without being pushed.
pub const SUGGESTION_THRESHOLD: f64 = 0.4;

const STRONG_SIGNALS: &[&str] = &[
    "down",
    "outage",
    "crash",
    "crashed",
    "crashing",
    "production",
    "prod",
    "urgent",
    "emergency",
    "sev1",
    "sev-1",
    "p0",
    "critical",
    "can't checkout",
    "cannot checkout",
    "error 500",
    "500 error",
    "500s",
    "not working",
    "broken",
];

const MODERATE_SIGNALS: &[&str] = &[
    "weird",
    "strange",
    "degraded",
    "slow",
    "slower",
    "since yesterday",
    "intermittent",
    "flaky",
    "timeouts",
    "timing out",
    "spike",
    "spiking",
    "errors",
    "failing",
];

const CRITICAL_MARKERS: &[&str] = &["urgent", "emergency", "sev1", "sev-1", "p0", "critical"];

const POST_MORTEM_MARKERS: &[&str] = &[
    "yesterday's outage",
    "last night's outage",
    "last week's outage",
    "resolved",
    "stable",
    "post-mortem",
    "postmortem",
    "rca",
    "root cause analysis",
    "what happened",
];

/// Outcome of scoring one piece of user text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSignalDetection {
    /// Signal confidence in [0, 1].
    pub confidence: f64,
    /// Matched signal phrases.
    pub signals: Vec<String>,
    /// Mode the text points to, if any.
    pub suggested_mode: Option<ConversationalMode>,
    /// Urgency derived from the signals.
    pub urgency_estimate: UrgencyLevel,
    /// Whether to offer lead-investigator mode now.
    pub should_request_transition: bool,
    /// Post-mortem or live incident, when the text says.
    pub investigation_mode_hint: Option<InvestigationMode>,
}

/// Score `text` for incident signals given the current conversational mode.
///
/// Post-mortem markers count as moderate signals: asking about a resolved
/// incident is still a request to investigate.
pub fn detect_signal(text: &str, current_mode: ConversationalMode) -> IncidentSignalDetection {
    let normalized = normalize(text);

    let strong = matches(&normalized, STRONG_SIGNALS);
    let moderate = matches(&normalized, MODERATE_SIGNALS);
    let post_mortem = matches(&normalized, POST_MORTEM_MARKERS);
    let critical = !matches(&normalized, CRITICAL_MARKERS).is_empty();

    let score = strong.len() as f64 * STRONG_WEIGHT
        + (moderate.len() + post_mortem.len()) as f64 * MODERATE_WEIGHT;
    let confidence = round2(score.clamp(0.0, 1.0));

    let urgency_estimate = if !post_mortem.is_empty() {
        UrgencyLevel::Low
    } else if critical {
        UrgencyLevel::Critical
    } else if !strong.is_empty() {
        UrgencyLevel::High
    } else if !moderate.is_empty() {
        UrgencyLevel::Medium
    } else {
        UrgencyLevel::Low
    };

    let investigation_mode_hint = if !post_mortem.is_empty() {
        Some(InvestigationMode::PostMortem)
    } else if !strong.is_empty() {
        Some(InvestigationMode::ActiveIncident)
    } else {
        None
    };

    let already_leading = current_mode == ConversationalMode::LeadInvestigator;
    let should_request_transition = !already_leading && confidence >= TRANSITION_THRESHOLD;
    let suggested_mode = if !already_leading && confidence >= SUGGESTION_THRESHOLD {
        Some(ConversationalMode::LeadInvestigator)
    } else {
        None
    };

    let signals = strong
        .into_iter()
        .chain(moderate)
        .chain(post_mortem)
        .map(str::to_string)
        .collect();

    IncidentSignalDetection {
        confidence,
        signals,
        suggested_mode,
        urgency_estimate,
        should_request_transition,
        investigation_mode_hint,
    }
}

/// A user's reply to a pending yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Yes.
    Affirmative,
    /// No.
    Negative,
    /// Neither, or both.
    Unclear,
}

const AFFIRMATIVE: &[&str] = &[
    "yes",
    "y",
    "yeah",
    "yep",
    "yup",
    "sure",
    "ok",
    "okay",
    "confirm",
    "confirmed",
    "proceed",
    "go ahead",
    "do it",
    "accept",
    "accepted",
    "approve",
    "sounds good",
    "please do",
    "agreed",
    "correct",
];

const NEGATIVE: &[&str] = &[
    "no",
    "n",
    "nope",
    "nah",
    "not now",
    "not yet",
    "decline",
    "declined",
    "cancel",
    "stop",
    "don't",
    "do not",
    "reject",
    "wait",
];

/// Classify a reply to a confirmation prompt.
pub fn parse_confirmation(text: &str) -> Confirmation {
    let normalized = normalize(text);
    let yes = !matches(&normalized, AFFIRMATIVE).is_empty();
    let no = !matches(&normalized, NEGATIVE).is_empty();

    match (yes, no) {
        (true, false) => Confirmation::Affirmative,
        (false, true) => Confirmation::Negative,
        _ => Confirmation::Unclear,
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Phrases from `phrases` that occur in `text` on word boundaries.
fn matches<'a>(text: &str, phrases: &[&'a str]) -> Vec<&'a str> {
    phrases
        .iter()
        .copied()
        .filter(|phrase| contains_phrase(text, phrase))
        .collect()
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';

    text.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = text[..start].chars().next_back().map_or(true, |c| !is_word(c));
        let after_ok = text[end..].chars().next().map_or(true, |c| !is_word(c));
        before_ok && after_ok
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_technical_question_has_no_signal() {
        let d = detect_signal(
            "what's the difference between Redis and Memcached",
            ConversationalMode::Consultant,
        );
        assert_eq!(d.confidence, 0.0);
        assert!(d.signals.is_empty());
        assert!(!d.should_request_transition);
        assert_eq!(d.suggested_mode, None);
        assert_eq!(d.urgency_estimate, UrgencyLevel::Low);
        assert_eq!(d.investigation_mode_hint, None);
    }

    #[test]
    fn test_urgent_outage_requests_transition() {
        let d = detect_signal("URGENT: payment API down", ConversationalMode::Consultant);
        assert!(d.confidence >= 0.9);
        assert!(d.should_request_transition);
        assert_eq!(d.suggested_mode, Some(ConversationalMode::LeadInvestigator));
        assert_eq!(d.urgency_estimate, UrgencyLevel::Critical);
        assert_eq!(d.investigation_mode_hint, Some(InvestigationMode::ActiveIncident));
        assert_eq!(d.signals, vec!["down".to_string(), "urgent".to_string()]);
    }

    #[test]
    fn test_post_mortem_request() {
        let d = detect_signal(
            "I want to understand yesterday's outage, service is stable",
            ConversationalMode::Consultant,
        );
        assert!(d.should_request_transition);
        assert_eq!(d.investigation_mode_hint, Some(InvestigationMode::PostMortem));
        assert_eq!(d.urgency_estimate, UrgencyLevel::Low);
    }

    #[test]
    fn test_moderate_signals_only_suggest() {
        let d = detect_signal(
            "the dashboard feels slow and a bit weird",
            ConversationalMode::Consultant,
        );
        assert_eq!(d.confidence, 0.4);
        assert!(!d.should_request_transition);
        assert_eq!(d.suggested_mode, Some(ConversationalMode::LeadInvestigator));
        assert_eq!(d.urgency_estimate, UrgencyLevel::Medium);
        assert_eq!(d.investigation_mode_hint, None);
    }

    #[test]
    fn test_single_moderate_signal_below_suggestion() {
        let d = detect_signal("builds are slow", ConversationalMode::Consultant);
        assert_eq!(d.confidence, 0.2);
        assert_eq!(d.suggested_mode, None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let d = detect_signal(
            "URGENT production outage, checkout down, everything crashed, sev1",
            ConversationalMode::Consultant,
        );
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_never_requests_transition_when_leading() {
        let d = detect_signal("URGENT: payment API down", ConversationalMode::LeadInvestigator);
        assert!(d.confidence >= 0.9);
        assert!(!d.should_request_transition);
        assert_eq!(d.suggested_mode, None);
    }

    #[test]
    fn test_word_boundaries() {
        let d = detect_signal(
            "how do I download the breakdown of product metrics",
            ConversationalMode::Consultant,
        );
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn test_curly_apostrophe_is_normalized() {
        let d = detect_signal("users can\u{2019}t checkout", ConversationalMode::Consultant);
        assert_eq!(d.signals, vec!["can't checkout".to_string()]);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let text = "prod is degraded since yesterday";
        assert_eq!(
            detect_signal(text, ConversationalMode::Consultant),
            detect_signal(text, ConversationalMode::Consultant)
        );
    }

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation("Yes, go ahead"), Confirmation::Affirmative);
        assert_eq!(parse_confirmation("ok."), Confirmation::Affirmative);
        assert_eq!(parse_confirmation("No"), Confirmation::Negative);
        assert_eq!(parse_confirmation("not yet, wait"), Confirmation::Negative);
        assert_eq!(
            parse_confirmation("here are the logs from the db"),
            Confirmation::Unclear
        );
        assert_eq!(parse_confirmation("yes and no"), Confirmation::Unclear);
    }
}
