//! Storage layer for investigation case persistence.
//!
//! Each case is stored as a single JSON-serialized [`InvestigationState`] keyed
//! by `case_id`. Saving is one atomic upsert, so a reader never observes a
//! half-written turn.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::investigation::{
    ConversationalMode, InvestigationMode, InvestigationState, Phase,
};

/// Invocation log record for debugging and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// Case the invocation belongs to, if any.
    pub case_id: Option<String>,
    /// Name of the MCP tool invoked.
    pub tool_name: String,
    /// Input parameters as JSON.
    pub input: serde_json::Value,
    /// Output result as JSON (if successful).
    pub output: Option<serde_json::Value>,
    /// Name of the Langbase pipe called.
    pub pipe_name: Option<String>,
    /// Latency in milliseconds.
    pub latency_ms: Option<i64>,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Error message (if failed).
    pub error: Option<String>,
    /// When the invocation occurred.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log entry
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            case_id: None,
            tool_name: tool_name.into(),
            input,
            output: None,
            pipe_name: None,
            latency_ms: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Set the case ID
    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    /// Set the pipe name
    pub fn with_pipe(mut self, pipe_name: impl Into<String>) -> Self {
        self.pipe_name = Some(pipe_name.into());
        self
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// One row of the case listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    /// Case identifier.
    pub case_id: String,
    /// Session of the latest turn.
    pub session_id: String,
    /// Current phase.
    pub phase: Phase,
    /// Current mode.
    pub conversational_mode: ConversationalMode,
    /// Investigation mode, if determined.
    pub investigation_mode: Option<InvestigationMode>,
    /// Whether the case is archived.
    pub closed: bool,
    /// Last save.
    pub updated_at: DateTime<Utc>,
}

impl From<&InvestigationState> for CaseSummary {
    fn from(state: &InvestigationState) -> Self {
        Self {
            case_id: state.case_id.clone(),
            session_id: state.session_id.clone(),
            phase: state.current_phase,
            conversational_mode: state.conversational_mode,
            investigation_mode: state.investigation_mode,
            closed: state.is_closed(),
            updated_at: state.updated_at,
        }
    }
}

/// Persistence port for investigation state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a case, or `None` if it was never saved.
    async fn load_state(&self, case_id: &str) -> StorageResult<Option<InvestigationState>>;

    /// Atomically insert or replace the whole case.
    async fn save_state(&self, state: &InvestigationState) -> StorageResult<()>;

    /// Most recently updated cases first.
    async fn list_cases(&self, limit: u32) -> StorageResult<Vec<CaseSummary>>;

    /// Record an invocation in the audit log.
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_invocation_builders() {
        let inv = Invocation::new("investigation_turn", json!({"case_id": "c1"}))
            .with_case("c1")
            .with_pipe("ooda-step-v1")
            .success(json!({"ok": true}), 42);

        assert_eq!(inv.case_id.as_deref(), Some("c1"));
        assert_eq!(inv.pipe_name.as_deref(), Some("ooda-step-v1"));
        assert!(inv.success);
        assert_eq!(inv.latency_ms, Some(42));
        assert!(inv.error.is_none());
    }

    #[test]
    fn test_invocation_failure() {
        let inv = Invocation::new("investigation_turn", json!({})).failure("boom", 7);
        assert!(!inv.success);
        assert_eq!(inv.error.as_deref(), Some("boom"));
        assert!(inv.output.is_none());
    }

    #[test]
    fn test_case_summary_from_state() {
        let mut state = InvestigationState::new("case-9", "session-1");
        state.current_phase = Phase::Triage;
        state.investigation_mode = Some(InvestigationMode::ActiveIncident);

        let summary = CaseSummary::from(&state);
        assert_eq!(summary.case_id, "case-9");
        assert_eq!(summary.phase, Phase::Triage);
        assert!(!summary.closed);
    }
}
