use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{info, warn};

use super::SharedState;
use crate::collaborators::serialize_for_log;
use crate::error::{AppResult, McpError, McpResult};
use crate::investigation::Phase;
use crate::storage::Invocation;

/// Arguments of `investigation_turn`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TurnParams {
    /// Case identifier.
    pub case_id: String,
    /// Session identifier.
    pub session_id: String,
    /// The user's message for this turn.
    pub message: String,
}

/// Arguments of tools that address a single case.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaseParams {
    /// Case identifier.
    pub case_id: String,
}

/// Arguments of `investigation_override_phase`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverrideParams {
    /// Case identifier.
    pub case_id: String,
    /// Phase name (`triage`, `root_cause`, ...) or number (0-6).
    pub target_phase: String,
    /// Why the user is overriding.
    pub reason: String,
}

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "investigation_turn" => handle_turn(state, arguments).await,
        "investigation_state" => handle_state(state, arguments).await,
        "investigation_override_phase" => handle_override_phase(state, arguments).await,
        "investigation_reopen" => handle_reopen(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Handle investigation_turn: process one user message
async fn handle_turn(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    const TOOL: &str = "investigation_turn";
    let params: TurnParams = parse_arguments(TOOL, arguments)?;

    // The raw message may carry secrets; only its size is logged
    let input = json!({
        "case_id": params.case_id,
        "session_id": params.session_id,
        "message_chars": params.message.chars().count(),
    });

    let start = Instant::now();
    let outcome = state
        .orchestrator
        .process_turn(&params.case_id, &params.session_id, &params.message)
        .await;

    finish(state, TOOL, &params.case_id, input, start, outcome).await
}

/// Handle investigation_state: return the full persisted case
async fn handle_state(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: CaseParams = parse_arguments("investigation_state", arguments)?;

    let case = state
        .orchestrator
        .load_case(&params.case_id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(case).map_err(McpError::Json)
}

/// Handle investigation_override_phase: jump to a phase on the user's authority
async fn handle_override_phase(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    const TOOL: &str = "investigation_override_phase";
    let params: OverrideParams = parse_arguments(TOOL, arguments)?;

    let target: Phase = params
        .target_phase
        .parse()
        .map_err(|message| McpError::InvalidParameters {
            tool_name: TOOL.to_string(),
            message,
        })?;

    let input = serialize_for_log(&params, "investigation_override_phase input");
    let start = Instant::now();
    let outcome = state
        .orchestrator
        .override_phase(&params.case_id, target, &params.reason)
        .await;

    finish(state, TOOL, &params.case_id, input, start, outcome).await
}

/// Handle investigation_reopen: make a closed case writable again
async fn handle_reopen(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    const TOOL: &str = "investigation_reopen";
    let params: CaseParams = parse_arguments(TOOL, arguments)?;

    let input = serialize_for_log(&params, "investigation_reopen input");
    let start = Instant::now();
    let outcome = state.orchestrator.reopen_case(&params.case_id).await;

    finish(state, TOOL, &params.case_id, input, start, outcome).await
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Log the invocation, then convert the outcome into a tool result.
///
/// The case is already committed when this runs, so a failed audit write is
/// only reported, never turned into a tool error.
async fn finish<R: Serialize>(
    state: &SharedState,
    tool_name: &str,
    case_id: &str,
    input: Value,
    start: Instant,
    outcome: AppResult<R>,
) -> McpResult<Value> {
    let latency = start.elapsed().as_millis() as i64;
    let invocation = Invocation::new(tool_name, input).with_case(case_id);
    let invocation = match &outcome {
        Ok(result) => invocation.success(serialize_for_log(result, tool_name), latency),
        Err(e) => invocation.failure(e.to_string(), latency),
    };

    if let Err(e) = state.store().log_invocation(&invocation).await {
        warn!(error = %e, tool = %tool_name, case_id = %case_id, "Failed to log invocation");
    }

    let result = outcome.map_err(|e| McpError::ExecutionFailed {
        message: e.to_string(),
    })?;
    serde_json::to_value(result).map_err(McpError::Json)
}
