use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable the hosted inference API token is read from when
/// `llm.api_key` is not configured.
pub const API_TOKEN_ENV: &str = "HUGGINGFACE_API_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "huggingface" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    /// Per-attempt request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between two attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Refuse to generate queries until a snapshot has been extracted.
    #[serde(default = "default_require_snapshot")]
    pub require_snapshot: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String, // "text" or "json"
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub data_dir: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for data storage
    #[arg(long)]
    pub data_dir: Option<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_snapshot_path() -> String {
    "db_schema.json".to_string()
}

fn default_require_snapshot() -> bool {
    true
}

fn default_log_format() -> String {
    "text".to_string()
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();

        // Seed with the built-in defaults so a config file only needs overrides
        let mut config_builder = Config::builder()
            .set_default("database.connection_string", defaults.database.connection_string)?
            .set_default("database.pool_size", defaults.database.pool_size as i64)?
            .set_default("web.host", defaults.web.host)?
            .set_default("web.port", defaults.web.port as i64)?
            .set_default("llm.backend", defaults.llm.backend)?
            .set_default("llm.model", defaults.llm.model)?
            .set_default("data_dir", defaults.data_dir)?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/chatdb/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // CHATDB__LLM__API_KEY=... style overrides
        config_builder = config_builder.add_source(
            Environment::with_prefix("CHATDB")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }

        Ok(config)
    }

    /// Location of the audit history database.
    pub fn history_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("history.duckdb")
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            require_snapshot: default_require_snapshot(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "chatdb.duckdb".to_string(),
                pool_size: 4,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            llm: LlmConfig {
                backend: "huggingface".to_string(),
                model: "google/flan-t5-small".to_string(),
                api_key: None,
                api_url: None,
                timeout_secs: default_timeout_secs(),
                max_attempts: default_max_attempts(),
                retry_delay_ms: default_retry_delay_ms(),
            },
            schema: SchemaConfig::default(),
            logging: LoggingConfig::default(),
            data_dir: "data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_for(path: &Path) -> CliArgs {
        CliArgs {
            config: Some(path.to_path_buf()),
            host: None,
            port: Some(9100),
            data_dir: None,
        }
    }

    #[test]
    fn file_values_are_layered_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
backend = "ollama"
model = "sqlcoder"
max_attempts = 5

[schema]
require_snapshot = false
"#
        )
        .unwrap();

        let config = AppConfig::new(&args_for(file.path())).unwrap();

        assert_eq!(config.llm.backend, "ollama");
        assert_eq!(config.llm.max_attempts, 5);
        assert_eq!(config.llm.timeout_secs, 10);
        assert_eq!(config.llm.retry_delay(), Duration::from_secs(1));
        assert!(!config.schema.require_snapshot);
        assert_eq!(config.schema.snapshot_path, "db_schema.json");
        assert_eq!(config.database.connection_string, "chatdb.duckdb");
        // CLI wins over everything else
        assert_eq!(config.web.port, 9100);
    }

    #[test]
    fn defaults_match_reference_retry_policy() {
        let config = AppConfig::default();
        assert_eq!(config.llm.timeout(), Duration::from_secs(10));
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.history_path(), PathBuf::from("data").join("history.duckdb"));
    }
}
