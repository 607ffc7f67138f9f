//! Command-line interface.
//!
//! With no subcommand the binary serves MCP over stdio. The other commands
//! read the case database directly and print to stdout.

use clap::{Parser, Subcommand};

use crate::storage::{SqliteStorage, StateStore};

/// Investigation engine command line.
#[derive(Parser, Debug)]
#[command(name = "investigation-engine", version, about)]
pub struct Cli {
    /// Subcommand to run; serves MCP when absent.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve MCP over stdio (default)
    Serve,

    /// Print one case as JSON
    Show {
        /// Case identifier
        case_id: String,
    },

    /// List the most recently updated cases
    List {
        /// Maximum number of cases to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Text printed to stdout or stderr.
    pub message: String,
}

impl CliResult {
    /// Exit code 0 with `message`.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Exit code 1 with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a read-only command against the case store.
///
/// `Serve` is handled by the binary and reported as an error here.
pub async fn execute_command(command: Commands, storage: &SqliteStorage) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not a store command"),
        Commands::Show { case_id } => execute_show(storage, &case_id).await,
        Commands::List { limit } => execute_list(storage, limit).await,
    }
}

async fn execute_show(storage: &SqliteStorage, case_id: &str) -> CliResult {
    match storage.load_state(case_id).await {
        Ok(Some(state)) => match serde_json::to_string_pretty(&state) {
            Ok(json) => CliResult::success(json),
            Err(e) => CliResult::error(format!("Failed to render case {}: {}", case_id, e)),
        },
        Ok(None) => CliResult::error(format!("Case not found: {}", case_id)),
        Err(e) => CliResult::error(format!("Failed to load case {}: {}", case_id, e)),
    }
}

async fn execute_list(storage: &SqliteStorage, limit: u32) -> CliResult {
    let cases = match storage.list_cases(limit).await {
        Ok(cases) => cases,
        Err(e) => return CliResult::error(format!("Failed to list cases: {}", e)),
    };

    if cases.is_empty() {
        return CliResult::success("No cases recorded.");
    }

    let mut output = format!(
        "{:<32} {:<20} {:<18} {:<16} {}\n",
        "CASE", "PHASE", "MODE", "INVESTIGATION", "UPDATED"
    );
    for case in &cases {
        let status = if case.closed {
            format!("{} (closed)", case.phase)
        } else {
            case.phase.to_string()
        };
        output.push_str(&format!(
            "{:<32} {:<20} {:<18} {:<16} {}\n",
            case.case_id,
            status,
            case.conversational_mode.to_string(),
            case.investigation_mode
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_age(chrono::Utc::now() - case.updated_at),
        ));
    }
    output.push_str(&format!("\n{} case(s)", cases.len()));

    CliResult::success(output)
}

fn format_age(duration: chrono::Duration) -> String {
    let total_secs = duration.num_seconds().max(0);
    if total_secs < 60 {
        format!("{}s ago", total_secs)
    } else if total_secs < 3600 {
        format!("{}m ago", total_secs / 60)
    } else if total_secs < 86400 {
        format!("{}h ago", total_secs / 3600)
    } else {
        format!("{}d ago", total_secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::{InvestigationMode, InvestigationState, Phase};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_defaults_to_serve() {
        let cli = Cli::try_parse_from(["investigation-engine"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_list_limit() {
        let cli = Cli::try_parse_from(["investigation-engine", "list", "--limit", "5"]).unwrap();
        assert_eq!(cli.command, Some(Commands::List { limit: 5 }));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(chrono::Duration::seconds(30)), "30s ago");
        assert_eq!(format_age(chrono::Duration::seconds(90)), "1m ago");
        assert_eq!(format_age(chrono::Duration::seconds(7200)), "2h ago");
        assert_eq!(format_age(chrono::Duration::seconds(-5)), "0s ago");
    }

    #[tokio::test]
    async fn test_show_missing_case() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let result = execute_command(
            Commands::Show {
                case_id: "nope".to_string(),
            },
            &storage,
        )
        .await;
        assert_eq!(result.exit_code, 1);
        assert!(result.message.contains("Case not found"));
    }

    #[tokio::test]
    async fn test_list_and_show() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut state = InvestigationState::new("case-cli", "s1");
        state.current_phase = Phase::Triage;
        state.investigation_mode = Some(InvestigationMode::PostMortem);
        storage.save_state(&state).await.unwrap();

        let listed = execute_command(Commands::List { limit: 10 }, &storage).await;
        assert_eq!(listed.exit_code, 0);
        assert!(listed.message.contains("case-cli"));
        assert!(listed.message.contains("triage"));
        assert!(listed.message.contains("1 case(s)"));

        let shown = execute_command(
            Commands::Show {
                case_id: "case-cli".to_string(),
            },
            &storage,
        )
        .await;
        assert_eq!(shown.exit_code, 0);
        let value: serde_json::Value = serde_json::from_str(&shown.message).unwrap();
        assert_eq!(value["current_phase"], "triage");
    }
}
