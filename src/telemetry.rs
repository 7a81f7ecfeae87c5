//! Logging bootstrap for processes embedding RollupDB.

use crate::{Error, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// Parsed logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives, e.g. `info` or `warn,rollupdb=debug`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - ROLLUP_LOG_LEVEL: filter directives (default: info)
    /// - ROLLUP_LOG_FORMAT: "text" (default) or "json"
    pub fn from_env() -> Result<Self> {
        let filter = std::env::var("ROLLUP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("ROLLUP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
        Self::parse(&filter, &format)
    }

    pub fn parse(filter: &str, format: &str) -> Result<Self> {
        let filter = filter.trim();
        if filter.is_empty() {
            return Err(Error::Config("log level cannot be empty".to_string()));
        }
        EnvFilter::try_new(filter)
            .map_err(|e| Error::Config(format!("invalid log filter '{filter}': {e}")))?;

        let format = match format.trim().to_ascii_lowercase().as_str() {
            "text" | "" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(Error::Config(format!(
                    "invalid log format '{other}', expected one of [text, json]"
                )))
            }
        };
        Ok(Self {
            filter: filter.to_string(),
            format,
        })
    }
}

/// Install the global subscriber. Fails if another subscriber is already set.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| Error::Config(format!("invalid log filter '{}': {e}", config.filter)))?;
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

    info!(
        filter = %config.filter,
        format = config.format.as_str(),
        "Logging initialized"
    );
    Ok(())
}

/// Install the global subscriber from the environment, keeping an existing one
pub fn init_from_env() -> Result<()> {
    let config = TelemetryConfig::from_env()?;
    if init(&config).is_err() {
        // a subscriber is already installed, e.g. by the embedding process
        tracing::debug!("Log subscriber already installed");
    }
    Ok(())
}
