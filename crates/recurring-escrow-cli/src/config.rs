//! CLI Configuration
//!
//! Loaded from an optional config file, `config/default` and `config/local`,
//! then `RECURRING_ESCROW__*` environment variables.

use anyhow::Context;
use recurring_escrow_core::ManagerConfig;
use recurring_escrow_harness::EscrowSimConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Agreement manager configuration
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Simulated escrow and clock settings
    #[serde(default)]
    pub escrow: EscrowSimConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl CliConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        builder = builder.add_source(
            config::Environment::with_prefix("RECURRING_ESCROW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        // Logging is not up yet, so a bad configuration is an error rather
        // than a warning nobody sees.
        let cli_config: CliConfig = config.try_deserialize().with_context(|| match config_path {
            Some(path) => format!("invalid configuration in {}", path),
            None => "invalid configuration".to_string(),
        })?;
        cli_config.manager.validate()?;

        Ok(cli_config)
    }
}
