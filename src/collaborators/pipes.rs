use async_trait::async_trait;
use tracing::debug;

use super::{ClassificationResult, CompletionPurpose, EvidenceClassifier, TextCompletion};
use crate::config::PipeConfig;
use crate::error::LangbaseResult;
use crate::investigation::{EvidenceItem, Hypothesis};
use crate::langbase::{LangbaseClient, Message, PipeRequest};
use crate::prompts::EVIDENCE_CLASSIFIER_PROMPT;

/// [`TextCompletion`] backed by Langbase pipes.
#[derive(Clone)]
pub struct LangbaseCompletion {
    langbase: LangbaseClient,
    pipes: PipeConfig,
}

impl LangbaseCompletion {
    /// Create a new completion adapter.
    pub fn new(langbase: LangbaseClient, pipes: PipeConfig) -> Self {
        Self { langbase, pipes }
    }

    fn pipe_for(&self, purpose: CompletionPurpose) -> &str {
        match purpose {
            CompletionPurpose::OodaStep => &self.pipes.ooda_step,
            CompletionPurpose::Consultant => &self.pipes.consultant,
        }
    }
}

#[async_trait]
impl TextCompletion for LangbaseCompletion {
    async fn complete(
        &self,
        purpose: CompletionPurpose,
        messages: Vec<Message>,
    ) -> LangbaseResult<String> {
        let pipe = self.pipe_for(purpose);
        debug!(pipe = %pipe, purpose = ?purpose, "Requesting completion");
        let response = self
            .langbase
            .call_pipe(PipeRequest::new(pipe, messages))
            .await?;
        Ok(response.completion)
    }
}

/// [`EvidenceClassifier`] backed by the classifier pipe.
#[derive(Clone)]
pub struct LangbaseEvidenceClassifier {
    langbase: LangbaseClient,
    pipe_name: String,
}

impl LangbaseEvidenceClassifier {
    /// Create a new classifier adapter.
    pub fn new(langbase: LangbaseClient, pipes: &PipeConfig) -> Self {
        Self {
            langbase,
            pipe_name: pipes.evidence_classifier.clone(),
        }
    }

    fn build_messages(evidence: &EvidenceItem, hypotheses: &[Hypothesis]) -> Vec<Message> {
        let listed: Vec<serde_json::Value> = hypotheses
            .iter()
            .map(|h| {
                serde_json::json!({
                    "id": h.id,
                    "statement": h.statement,
                    "category": h.category,
                    "likelihood": h.likelihood,
                })
            })
            .collect();
        let hypotheses_json = serde_json::to_string_pretty(&listed).unwrap_or_default();

        vec![
            Message::system(EVIDENCE_CLASSIFIER_PROMPT),
            Message::user(format!(
                "Evidence ({}, {}):\n{}\n\nActive hypotheses:\n{}",
                evidence.label, evidence.category, evidence.content, hypotheses_json
            )),
        ]
    }
}

#[async_trait]
impl EvidenceClassifier for LangbaseEvidenceClassifier {
    async fn classify(
        &self,
        evidence: &EvidenceItem,
        hypotheses: &[Hypothesis],
    ) -> LangbaseResult<ClassificationResult> {
        if hypotheses.is_empty() {
            return Ok(ClassificationResult::neutral());
        }

        let messages = Self::build_messages(evidence, hypotheses);
        let response = self
            .langbase
            .call_pipe(PipeRequest::new(&self.pipe_name, messages))
            .await?;

        let mut result = ClassificationResult::parse(&response.completion)?;
        // Drop ids the pipe invented
        result
            .matched_hypothesis_ids
            .retain(|id| hypotheses.iter().any(|h| &h.id == id));
        Ok(result)
    }
}
