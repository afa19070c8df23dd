pub mod config;
pub mod error;

pub use config::{
    Config, LoggingConfig, ServerConfig, ServiceKind, TelemetryConfig, ValidationResult,
    WeatherConfig, WeatherServiceConfig,
};
pub use error::{ConfigError, NetworkError, ReqwestErrorExt};

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Output encoding for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "text" => Some(Self::Text),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Initialize tracing/logging from the `logging` section.
///
/// `RUST_LOG` takes precedence over `logging.level` when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.level.to_lowercase())
            .with_context(|| format!("Invalid log level: {}", config.level))?,
    };

    let format = LogFormat::parse(&config.format)
        .with_context(|| format!("Unknown log format: {}", config.format))?;

    let to_file = !config.output_path.is_empty();
    let writer = if to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.output_path)
            .with_context(|| format!("Failed to open log file {}", config.output_path))?;
        BoxMakeWriter::new(std::sync::Mutex::new(file))
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(!to_file);

    let installed = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Text => builder.try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    let output = if to_file { config.output_path.as_str() } else { "stdout" };
    tracing::debug!(
        level = %config.level,
        format = %config.format,
        output,
        "Logging initialized"
    );
    Ok(())
}
