//! # Investigation Engine
//!
//! A per-case troubleshooting engine served over the Model Context Protocol (MCP).
//! Each case moves through a seven-phase lifecycle (intake, problem definition,
//! triage, mitigation, root cause, solution, documentation) driven by an
//! Observe-Orient-Decide-Act loop whose depth adapts to the phase and the case.
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → McpServer (stdio) → Orchestrator ──→ Langbase Pipes (HTTP)
//!                                       │
//!                                       ↓
//!                              SQLite (case state)
//! ```
//!
//! The orchestrator owns no state between turns: every turn loads the case,
//! works on that copy and saves it once.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use investigation_engine::{AppState, Config, McpServer};
//! use investigation_engine::langbase::LangbaseClient;
//! use investigation_engine::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let state = Arc::new(AppState::from_parts(config, storage, langbase)?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line entry points.
pub mod cli;
/// LLM-backed collaborators and PII redaction.
pub mod collaborators;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Case state, lifecycle, OODA loop and orchestration.
pub mod investigation;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite persistence for case state and invocation logs.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use investigation::{InvestigationState, Orchestrator, ResponseType, TurnResult};
pub use server::{AppState, McpServer, SharedState};
