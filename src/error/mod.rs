use thiserror::Error;

use crate::investigation::Phase;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Langbase API failure.
    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    /// Investigation rule or collaborator failure.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Protocol failure.
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// Anything else.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not open the database.
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    /// A query failed.
    #[error("Query failed: {message}")]
    Query { message: String },

    /// No case with this id.
    #[error("Case not found: {case_id}")]
    CaseNotFound { case_id: String },

    /// Case JSON could not be written or read.
    #[error("State serialization failed for case {case_id}: {message}")]
    Serialization { case_id: String, message: String },

    /// Schema migration failed.
    #[error("Migration failed: {message}")]
    Migration { message: String },

    /// Raw driver error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    /// Retries exhausted.
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    /// Non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Body did not parse.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Request timed out.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Investigation engine errors.
///
/// Stalls and hypothesis conflicts are not errors; they travel as flags on the
/// cycle result and the persisted state.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A phase change broke the lifecycle rules.
    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition { from: Phase, to: Phase, reason: String },

    /// An LLM collaborator failed after its retry.
    #[error("Collaborator unavailable: {collaborator} failed after {attempts} attempts: {message}")]
    CollaboratorUnavailable {
        collaborator: String,
        attempts: u32,
        message: String,
    },

    /// The case is archived.
    #[error("Case {case_id} is closed; reopen it before continuing")]
    CaseClosed { case_id: String },

    /// Bad input.
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },
}

impl EngineError {
    /// Whether the caller may retry the same turn unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::CollaboratorUnavailable { .. })
    }
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    /// Malformed request.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// No such tool.
    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// Tool arguments did not validate.
    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    /// The tool ran and failed.
    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    /// JSON encoding or decoding failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
