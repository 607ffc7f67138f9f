use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Langbase API settings.
    pub langbase: LangbaseConfig,
    /// Case database settings.
    pub database: DatabaseConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// HTTP request settings.
    pub request: RequestConfig,
    /// Pipe names.
    pub pipes: PipeConfig,
    /// Engine behaviour settings.
    pub engine: EngineConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    /// API key.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries on 5xx and transport errors.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe executing a single OODA step (frame/scan/branch/test/conclude).
    pub ooda_step: String,
    /// Pipe classifying evidence against active hypotheses.
    pub evidence_classifier: String,
    /// Pipe answering consultant-mode questions.
    pub consultant: String,
}

/// Orchestration behaviour knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for a single collaborator call.
    pub collaborator_timeout_ms: u64,
    /// Delay before the single retry of a failed collaborator call.
    pub collaborator_retry_backoff_ms: u64,
    /// Ask before advancing to the next phase.
    pub require_phase_confirmation: bool,
    /// Advance phases without asking for critical active incidents.
    pub fast_track_critical: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/investigations.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", defaults.retry_delay_ms),
        };

        let defaults = PipeConfig::default();
        let pipes = PipeConfig {
            ooda_step: env::var("PIPE_OODA_STEP").unwrap_or(defaults.ooda_step),
            evidence_classifier: env::var("PIPE_EVIDENCE_CLASSIFIER")
                .unwrap_or(defaults.evidence_classifier),
            consultant: env::var("PIPE_CONSULTANT").unwrap_or(defaults.consultant),
        };

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            collaborator_timeout_ms: parse_env(
                "COLLABORATOR_TIMEOUT_MS",
                defaults.collaborator_timeout_ms,
            ),
            collaborator_retry_backoff_ms: parse_env(
                "COLLABORATOR_RETRY_BACKOFF_MS",
                defaults.collaborator_retry_backoff_ms,
            ),
            require_phase_confirmation: parse_bool_env(
                "REQUIRE_PHASE_CONFIRMATION",
                defaults.require_phase_confirmation,
            ),
            fast_track_critical: parse_bool_env("FAST_TRACK_CRITICAL", defaults.fast_track_critical),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            engine,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        // The engine owns the single collaborator retry; HTTP-level retries stay off.
        Self {
            timeout_ms: 30000,
            max_retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            ooda_step: "investigation-ooda-step-v1".to_string(),
            evidence_classifier: "evidence-classifier-v1".to_string(),
            consultant: "troubleshooting-consultant-v1".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_ms: 30000,
            collaborator_retry_backoff_ms: 500,
            require_phase_confirmation: true,
            fast_track_critical: true,
        }
    }
}

impl EngineConfig {
    /// Collaborator timeout as a [`Duration`].
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Retry backoff as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.collaborator_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_default_disables_http_retries() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.collaborator_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_backoff(), Duration::from_millis(500));
        assert!(config.require_phase_confirmation);
        assert!(config.fast_track_critical);
    }

    #[test]
    fn test_pipe_config_defaults() {
        let pipes = PipeConfig::default();
        assert_eq!(pipes.ooda_step, "investigation-ooda-step-v1");
        assert_eq!(pipes.evidence_classifier, "evidence-classifier-v1");
        assert_eq!(pipes.consultant, "troubleshooting-consultant-v1");
    }
}
