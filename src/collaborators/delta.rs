//! Structured outputs the engine accepts from the LLM.
//!
//! Every field is optional on the wire; a pipe that has nothing to say for a
//! section simply omits it.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::extract_json_from_completion;
use crate::error::{LangbaseError, LangbaseResult};
use crate::investigation::{
    EvidenceCategory, EvidenceType, HypothesisCategory, InvestigationMode, TestResult,
};

/// Revised anomaly frame proposed by a Frame step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDelta {
    /// Revised problem statement.
    pub statement: String,
    /// Components named as affected.
    #[serde(default)]
    pub affected_components: Vec<String>,
    /// Who or what is impacted.
    #[serde(default)]
    pub blast_radius: Option<String>,
    /// Confidence in the revised frame, 0.0 to 1.0.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// Evidence extracted during a Scan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDelta {
    /// Short label.
    pub label: String,
    /// Category, inferred from the content when absent.
    #[serde(default)]
    pub category: Option<EvidenceCategory>,
    /// Evidence text.
    pub content: String,
    /// Relevance to the current frame.
    #[serde(default = "default_confidence")]
    pub relevance: f64,
}

/// New hypothesis proposed by a Branch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisDelta {
    /// Proposed cause.
    pub statement: String,
    /// Cause category.
    pub category: HypothesisCategory,
    /// Initial likelihood.
    #[serde(default = "default_confidence")]
    pub likelihood: f64,
}

/// Likelihood revision or test outcome for an existing hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisUpdate {
    /// Hypothesis being updated.
    pub hypothesis_id: String,
    /// New likelihood.
    #[serde(default)]
    pub likelihood: Option<f64>,
    /// Outcome of testing the hypothesis.
    #[serde(default)]
    pub test_result: Option<TestResult>,
}

/// Data the pipe wants the user to provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRequestDelta {
    /// Short label shown to the user.
    pub label: String,
    /// What to collect and how.
    #[serde(default)]
    pub description: String,
    /// Category, inferred from the text when absent.
    #[serde(default)]
    pub category: Option<EvidenceCategory>,
}

/// Root cause proposed by a Conclude step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseDelta {
    /// Concluded cause.
    pub statement: String,
    /// Confidence in the conclusion.
    pub confidence: f64,
    /// Hypothesis the conclusion rests on.
    #[serde(default)]
    pub hypothesis_id: Option<String>,
}

/// Everything one OODA step may contribute to the case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    /// Problem frame revision.
    #[serde(default)]
    pub frame: Option<FrameDelta>,
    /// Evidence derived during the step.
    #[serde(default)]
    pub evidence: Vec<EvidenceDelta>,
    /// New hypotheses.
    #[serde(default)]
    pub hypotheses: Vec<HypothesisDelta>,
    /// Likelihood and test updates.
    #[serde(default)]
    pub hypothesis_updates: Vec<HypothesisUpdate>,
    /// Information to ask the user for.
    #[serde(default)]
    pub evidence_requests: Vec<EvidenceRequestDelta>,
    /// Root-cause conclusion, gated by confidence.
    #[serde(default)]
    pub root_cause: Option<RootCauseDelta>,
    /// Mitigation applied (mitigation phase only).
    #[serde(default)]
    pub mitigation: Option<String>,
    /// Permanent fix (solution phase only).
    #[serde(default)]
    pub solution: Option<String>,
    /// Mode suggestion, honoured only while the mode is still open.
    #[serde(default)]
    pub investigation_mode: Option<InvestigationMode>,
    /// Change to overall investigation confidence.
    #[serde(default)]
    pub confidence_delta: Option<f64>,
    /// One-line takeaway.
    #[serde(default)]
    pub key_insight: Option<String>,
}

impl StepDelta {
    /// Parse a pipe completion into a step delta.
    pub fn parse(completion: &str) -> LangbaseResult<Self> {
        let json_str = extract_json_from_completion(completion).map_err(|e| {
            warn!(
                error = %e,
                completion_preview = %completion.chars().take(200).collect::<String>(),
                "Failed to extract JSON from OODA step response"
            );
            LangbaseError::InvalidResponse {
                message: format!("OODA step response extraction failed: {}", e),
            }
        })?;

        serde_json::from_str::<StepDelta>(json_str).map_err(|e| LangbaseError::InvalidResponse {
            message: format!("Failed to parse OODA step response: {}", e),
        })
    }
}

/// Verdict of the evidence classifier for one evidence item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Known hypotheses the evidence bears on.
    #[serde(default)]
    pub matched_hypothesis_ids: Vec<String>,
    /// How the evidence relates to them.
    pub evidence_type: EvidenceType,
    /// Likelihood change to apply.
    #[serde(default)]
    pub confidence_delta: f64,
}

impl ClassificationResult {
    /// A verdict that links nothing.
    pub fn neutral() -> Self {
        Self {
            matched_hypothesis_ids: Vec::new(),
            evidence_type: EvidenceType::Neutral,
            confidence_delta: 0.0,
        }
    }

    /// Parse a classifier completion.
    pub fn parse(completion: &str) -> LangbaseResult<Self> {
        let json_str = extract_json_from_completion(completion).map_err(|e| {
            LangbaseError::InvalidResponse {
                message: format!("Classifier response extraction failed: {}", e),
            }
        })?;

        let mut result: ClassificationResult =
            serde_json::from_str(json_str).map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse classifier response: {}", e),
            })?;
        result.confidence_delta = result.confidence_delta.clamp(-1.0, 1.0);
        Ok(result)
    }
}

fn default_confidence() -> f64 {
    0.5
}
