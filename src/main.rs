use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use investigation_engine::{
    cli::{execute_command, Cli, Commands},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, storage).await,
        command => {
            let result = execute_command(command, &storage).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
            }
            std::process::exit(result.exit_code);
        }
    }
}

async fn serve(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Investigation engine starting..."
    );

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    info!("Ensuring required Langbase pipes exist...");
    if let Err(e) = langbase.ensure_pipes(&config.pipes).await {
        error!(error = %e, "Failed to ensure pipes exist");
        return Err(e.into());
    }

    let state = Arc::new(AppState::from_parts(config, storage, langbase)?);
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Logs go to stderr; stdout carries the protocol.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
