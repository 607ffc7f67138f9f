//! External collaborators the investigation engine depends on.
//!
//! The engine never talks to Langbase directly. It goes through three seams:
//! - [`TextCompletion`]: free-form or JSON completions (OODA steps, consultant answers)
//! - [`EvidenceClassifier`]: supportive / refuting / neutral verdicts
//! - [`Sanitizer`]: PII and secret redaction before anything is stored
//!
//! Every async collaborator call is wrapped by [`invoke`], which bounds it with
//! a timeout and retries it once before giving up.

mod delta;
mod pipes;
mod sanitizer;

pub use delta::*;
pub use pipes::{LangbaseCompletion, LangbaseEvidenceClassifier};
pub use sanitizer::PatternSanitizer;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, LangbaseResult};
use crate::investigation::{EvidenceItem, Hypothesis};
use crate::langbase::Message;

/// What a completion is for; adapters map this to a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPurpose {
    /// Structured output for one OODA step.
    OodaStep,
    /// Conversational answer in consultant mode.
    Consultant,
}

/// LLM text completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Return the raw completion text for the given messages.
    async fn complete(
        &self,
        purpose: CompletionPurpose,
        messages: Vec<Message>,
    ) -> LangbaseResult<String>;
}

/// Classifies one evidence item against the active hypotheses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvidenceClassifier: Send + Sync {
    async fn classify(
        &self,
        evidence: &EvidenceItem,
        hypotheses: &[Hypothesis],
    ) -> LangbaseResult<ClassificationResult>;
}

/// Redacts PII and secrets. Must be idempotent.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// Timeout and retry policy for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Delay before the single retry.
    pub backoff: Duration,
}

impl CallPolicy {
    /// Total attempts per call: the first try plus one retry.
    pub const ATTEMPTS: u32 = 2;
}

impl From<&EngineConfig> for CallPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.collaborator_timeout(),
            backoff: config.retry_backoff(),
        }
    }
}

/// Run a collaborator call under `policy`.
///
/// Transient failures and timeouts are retried once after the backoff; the
/// second failure becomes [`EngineError::CollaboratorUnavailable`].
pub async fn invoke<T, F, Fut>(collaborator: &str, policy: CallPolicy, mut call: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LangbaseResult<T>>,
{
    let mut last_error = String::new();

    for attempt in 1..=CallPolicy::ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff).await;
        }

        match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(collaborator, attempt, error = %e, "Collaborator call failed");
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    collaborator,
                    attempt,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "Collaborator call timed out"
                );
                last_error = format!("timed out after {}ms", policy.timeout.as_millis());
            }
        }
    }

    Err(EngineError::CollaboratorUnavailable {
        collaborator: collaborator.to_string(),
        attempts: CallPolicy::ATTEMPTS,
        message: last_error,
    })
}

// ============================================================================
// Shared Utilities
// ============================================================================

/// Serialize a value to JSON for logging, with warning on failure.
pub(crate) fn serialize_for_log<T: serde::Serialize>(
    value: &T,
    context: &str,
) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for invocation log"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Raw JSON is taken as is; otherwise the first ```json (or bare ```) block
/// is used.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
