use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{CaseSummary, Invocation, StateStore};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::investigation::InvestigationState;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed case store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `config.path` and run migrations.
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database for tests. A single connection keeps one database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for SqliteStorage {
    async fn load_state(&self, case_id: &str) -> StorageResult<Option<InvestigationState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM investigation_states WHERE case_id = ?")
                .bind(case_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| {
            serde_json::from_str(&json).map_err(|e| StorageError::Serialization {
                case_id: case_id.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn save_state(&self, state: &InvestigationState) -> StorageResult<()> {
        let json = serde_json::to_string(state).map_err(|e| StorageError::Serialization {
            case_id: state.case_id.clone(),
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO investigation_states (case_id, session_id, phase, conversational_mode, closed, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(case_id) DO UPDATE SET
                session_id = excluded.session_id,
                phase = excluded.phase,
                conversational_mode = excluded.conversational_mode,
                closed = excluded.closed,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.case_id)
        .bind(&state.session_id)
        .bind(state.current_phase.as_str())
        .bind(state.conversational_mode.to_string())
        .bind(state.is_closed())
        .bind(&json)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(case_id = %state.case_id, phase = %state.current_phase, "Saved investigation state");
        Ok(())
    }

    async fn list_cases(&self, limit: u32) -> StorageResult<Vec<CaseSummary>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT case_id, state
            FROM investigation_states
            ORDER BY updated_at DESC, case_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(case_id, json)| {
                serde_json::from_str::<InvestigationState>(&json)
                    .map(|state| CaseSummary::from(&state))
                    .map_err(|e| StorageError::Serialization {
                        case_id,
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        let input = serde_json::to_string(&invocation.input).unwrap_or_default();
        let output = invocation
            .output
            .as_ref()
            .map(|o| serde_json::to_string(o).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO invocations (id, case_id, tool_name, input, output, pipe_name, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.case_id)
        .bind(&invocation.tool_name)
        .bind(&input)
        .bind(&output)
        .bind(&invocation.pipe_name)
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::{Phase, UrgencyLevel};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_load_missing_case() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        assert!(storage.load_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_state() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut state = InvestigationState::new("case-1", "session-1");
        storage.save_state(&state).await.unwrap();

        state.current_phase = Phase::Triage;
        state.urgency_level = Some(UrgencyLevel::High);
        storage.save_state(&state).await.unwrap();

        let loaded = storage.load_state("case-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, Phase::Triage);
        assert_eq!(loaded.urgency_level, Some(UrgencyLevel::High));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM investigation_states")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_serialization_error() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO investigation_states (case_id, session_id, phase, conversational_mode, closed, state, created_at, updated_at) VALUES ('bad', 's', 'intake', 'consultant', 0, '{not json', '', '')",
        )
        .execute(storage.pool())
        .await
        .unwrap();

        let err = storage.load_state("bad").await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }
}
