//! Hierarchical compression of the OODA iteration log.
//!
//! The log itself is append-only; this module only derives a bounded view of
//! it for prompt context:
//! - hot: the last [`HOT_CAPACITY`] iterations, verbatim
//! - warm: the [`WARM_CAPACITY`] iterations before those, summarized
//! - cold: key insights of everything older

use serde::{Deserialize, Serialize};

use super::types::{OodaIteration, OodaStep, Phase};

/// Iterations kept in full detail.
pub const HOT_CAPACITY: usize = 2;

/// Iterations kept as summaries.
pub const WARM_CAPACITY: usize = 3;

/// Summary of one warm iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    /// Iteration this summarizes.
    pub iteration_number: u32,
    /// Phase it ran in.
    pub phase: Phase,
    /// Steps executed.
    pub steps: Vec<OodaStep>,
    /// Evidence analyzed.
    pub evidence_count: usize,
    /// Hypotheses proposed.
    pub hypotheses_generated: usize,
    /// Hypotheses tested for the first time.
    pub hypotheses_tested: usize,
    /// Confidence at the end.
    pub final_confidence: Option<f64>,
    /// Takeaway, if any.
    pub key_insight: Option<String>,
    /// Whether the iteration made progress.
    pub made_progress: bool,
}

impl From<&OodaIteration> for IterationSummary {
    fn from(iteration: &OodaIteration) -> Self {
        Self {
            iteration_number: iteration.iteration_number,
            phase: iteration.phase,
            steps: iteration.steps_executed.clone(),
            evidence_count: iteration.evidence_analyzed.len(),
            hypotheses_generated: iteration.hypotheses_generated.len(),
            hypotheses_tested: iteration.hypotheses_tested.len(),
            final_confidence: iteration.confidence_progression.last().copied(),
            key_insight: iteration.key_insight.clone(),
            made_progress: iteration.made_progress,
        }
    }
}

/// A fact retained from a cold iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFact {
    /// Iteration the fact came from.
    pub iteration_number: u32,
    /// Phase it came from.
    pub phase: Phase,
    /// The fact.
    pub fact: String,
}

/// Three-tier view over the iteration log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalMemory {
    /// Most recent iterations in full.
    pub hot: Vec<OodaIteration>,
    /// Summaries of the next older iterations.
    pub warm: Vec<IterationSummary>,
    /// Key facts from everything older.
    pub cold: Vec<KeyFact>,
}

impl HierarchicalMemory {
    /// Rebuild the memory from the complete iteration log.
    ///
    /// Pure: the result depends only on `iterations`, so calling it again on
    /// the same log yields the same memory.
    pub fn compress(iterations: &[OodaIteration]) -> Self {
        let hot_start = iterations.len().saturating_sub(HOT_CAPACITY);
        let warm_start = hot_start.saturating_sub(WARM_CAPACITY);

        let cold = iterations[..warm_start]
            .iter()
            .filter_map(|it| {
                it.key_insight.as_ref().map(|insight| KeyFact {
                    iteration_number: it.iteration_number,
                    phase: it.phase,
                    fact: insight.clone(),
                })
            })
            .collect();

        Self {
            hot: iterations[hot_start..].to_vec(),
            warm: iterations[warm_start..hot_start]
                .iter()
                .map(IterationSummary::from)
                .collect(),
            cold,
        }
    }

    /// Whether any iteration has been recorded.
    pub fn is_empty(&self) -> bool {
        self.hot.is_empty() && self.warm.is_empty() && self.cold.is_empty()
    }

    /// Render the memory as prompt context, oldest first.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "No previous iterations.".to_string();
        }

        let mut out = String::new();

        if !self.cold.is_empty() {
            out.push_str("Key facts from earlier iterations:\n");
            for fact in &self.cold {
                out.push_str(&format!(
                    "- #{} ({}): {}\n",
                    fact.iteration_number, fact.phase, fact.fact
                ));
            }
        }

        if !self.warm.is_empty() {
            out.push_str("Recent iteration summaries:\n");
            for s in &self.warm {
                let steps: Vec<&str> = s.steps.iter().map(|st| st.as_str()).collect();
                out.push_str(&format!(
                    "- #{} ({}) steps [{}], evidence {}, new hypotheses {}, tested {}, progress {}",
                    s.iteration_number,
                    s.phase,
                    steps.join(", "),
                    s.evidence_count,
                    s.hypotheses_generated,
                    s.hypotheses_tested,
                    s.made_progress
                ));
                if let Some(insight) = &s.key_insight {
                    out.push_str(&format!(": {}", insight));
                }
                out.push('\n');
            }
        }

        if !self.hot.is_empty() {
            out.push_str("Latest iterations:\n");
            for it in &self.hot {
                let steps: Vec<&str> = it.steps_executed.iter().map(|st| st.as_str()).collect();
                out.push_str(&format!(
                    "- #{} ({}) steps [{}], evidence {:?}, generated {:?}, tested {:?}, confidence {:?}",
                    it.iteration_number,
                    it.phase,
                    steps.join(", "),
                    it.evidence_analyzed,
                    it.hypotheses_generated,
                    it.hypotheses_tested,
                    it.confidence_progression
                ));
                if let Some(insight) = &it.key_insight {
                    out.push_str(&format!(", insight: {}", insight));
                }
                out.push('\n');
            }
        }

        out
    }
}
