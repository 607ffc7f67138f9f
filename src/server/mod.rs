//! MCP surface of the investigation engine.
//!
//! [`McpServer`] speaks JSON-RPC over stdio, the handlers route the four
//! investigation tools to the [`Orchestrator`], and [`AppState`] wires the
//! production collaborators together.

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::collaborators::{LangbaseCompletion, LangbaseEvidenceClassifier, PatternSanitizer};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::investigation::Orchestrator;
use crate::langbase::LangbaseClient;
use crate::storage::{SqliteStorage, StateStore};

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Case orchestrator; owns the store and collaborators.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Create application state around an existing orchestrator.
    pub fn new(config: Config, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Wire the Langbase-backed collaborators and SQLite store together.
    pub fn from_parts(
        config: Config,
        storage: SqliteStorage,
        langbase: LangbaseClient,
    ) -> AppResult<Self> {
        tracing::info!(
            ooda_pipe = %config.pipes.ooda_step,
            classifier_pipe = %config.pipes.evidence_classifier,
            consultant_pipe = %config.pipes.consultant,
            "AppState initializing with pipe configuration"
        );

        let sanitizer = PatternSanitizer::new().map_err(|e| AppError::Internal {
            message: format!("Failed to compile sanitizer patterns: {}", e),
        })?;

        let orchestrator = Orchestrator::new(
            Arc::new(storage),
            Arc::new(LangbaseCompletion::new(langbase.clone(), config.pipes.clone())),
            Arc::new(LangbaseEvidenceClassifier::new(langbase, &config.pipes)),
            Arc::new(sanitizer),
            config.engine.clone(),
        );

        Ok(Self::new(config, orchestrator))
    }

    /// The store cases and invocations are written to.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        self.orchestrator.store()
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
