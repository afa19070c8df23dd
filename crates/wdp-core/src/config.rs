use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Prefix for environment overrides (`WDP_WEATHER_CACHE_TTL`, ...).
pub const ENV_PREFIX: &str = "WDP";

/// Base name of the config file looked up in the working directory when no
/// explicit path is given. Any extension the `config` crate understands works.
pub const DEFAULT_CONFIG_NAME: &str = "config";

/// Scalar keys that may be overridden from the environment.
const ENV_KEYS: &[&str] = &[
    "server.host",
    "server.port",
    "server.read_timeout",
    "server.write_timeout",
    "server.idle_timeout",
    "weather.cache_ttl",
    "weather.workers",
    "weather.queue_size",
    "weather.handler_timeout",
    "weather.timeout",
    "weather.retries",
    "telemetry.enabled",
    "telemetry.endpoint",
    "logging.level",
    "logging.format",
    "logging.output_path",
];

/// Per-service keys that may be overridden from the environment.
const SERVICE_ENV_FIELDS: &[&str] = &["type", "enabled", "base_url", "api_key"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "text", "pretty"];

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Semicolon-joined summary of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Aggregator and upstream provider settings
    pub weather: WeatherConfig,

    /// Trace export settings
    pub telemetry: TelemetryConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds allowed for reading request headers
    pub read_timeout: u64,
    /// Seconds allowed for producing a response
    pub write_timeout: u64,
    /// Seconds of TCP keep-alive on idle connections
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: 30,
            write_timeout: 30,
            idle_timeout: 60,
        }
    }
}

impl ServerConfig {
    /// `host:port` listen address
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    pub fn idle_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

/// Upstream API flavour of a configured weather service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "open-meteo")]
    OpenMeteo,
    #[serde(rename = "weather-api")]
    WeatherApi,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenMeteo => "open-meteo",
            Self::WeatherApi => "weather-api",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherServiceConfig {
    #[serde(rename = "type")]
    pub kind: ServiceKind,

    #[serde(default)]
    pub enabled: bool,

    pub base_url: String,

    /// Empty when the service needs no credentials
    #[serde(default)]
    pub api_key: String,

    /// Static query parameters appended to every upstream call
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl WeatherServiceConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Seconds a merged forecast stays in the cache
    pub cache_ttl: u64,

    /// Number of aggregator workers
    pub workers: usize,

    /// Capacity of the aggregator task queue
    pub queue_size: usize,

    /// Seconds a caller waits for its forecast before giving up
    pub handler_timeout: u64,

    /// Seconds allowed for a single upstream HTTP call
    pub timeout: u64,

    /// Retries for transient upstream failures
    pub retries: u32,

    pub services: BTreeMap<String, WeatherServiceConfig>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "open-meteo".to_string(),
            WeatherServiceConfig {
                kind: ServiceKind::OpenMeteo,
                enabled: true,
                base_url: "https://api.open-meteo.com/v1".to_string(),
                api_key: String::new(),
                params: BTreeMap::from([(
                    "daily".to_string(),
                    "temperature_2m_max,temperature_2m_min,precipitation_sum,weathercode"
                        .to_string(),
                )]),
            },
        );
        services.insert(
            "weather-api".to_string(),
            WeatherServiceConfig {
                kind: ServiceKind::WeatherApi,
                enabled: false,
                base_url: "https://api.weatherapi.com/v1".to_string(),
                api_key: String::new(),
                params: BTreeMap::from([("format".to_string(), "json".to_string())]),
            },
        );

        Self {
            cache_ttl: 300,
            workers: 5,
            queue_size: 100,
            handler_timeout: 10,
            timeout: 10,
            retries: 3,
            services,
        }
    }
}

impl WeatherConfig {
    pub fn cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn handler_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.handler_timeout)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Enabled services in name order
    pub fn enabled_services(&self) -> impl Iterator<Item = (&String, &WeatherServiceConfig)> {
        self.services.iter().filter(|(_, service)| service.enabled)
    }

    pub fn service(&self, name: &str) -> Option<&WeatherServiceConfig> {
        self.services.get(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "tempo:4317".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
    /// `json`, `text` or `pretty`
    pub format: String,
    /// Log file, empty for stdout
    pub output_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output_path: String::new(),
        }
    }
}

/// Environment variable consulted for a dotted config key.
///
/// `weather.services.open-meteo.api_key` -> `WDP_WEATHER_SERVICES_OPEN_METEO_API_KEY`
pub fn env_var_name(key: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        key.replace(['.', '-'], "_").to_uppercase()
    )
}

impl Config {
    /// Load configuration from defaults, the config file and `WDP_*` environment variables.
    ///
    /// With `path` the file must exist; without it `./config.{toml,yaml,json}` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with a custom environment lookup.
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Service names are only known once the file is merged, so the file
        // layer is read once up front to enumerate per-service overrides.
        let layered: Config = Self::file_layers(path)?
            .build()
            .context("Failed to read config file")?
            .try_deserialize()
            .context("Failed to parse config file")?;

        let mut builder = Self::file_layers(path)?;

        for key in ENV_KEYS {
            if let Some(value) = lookup(&env_var_name(key)) {
                builder = builder
                    .set_override(*key, value)
                    .with_context(|| format!("Invalid override for {}", key))?;
            }
        }

        for name in layered.weather.services.keys() {
            for field in SERVICE_ENV_FIELDS {
                let key = format!("weather.services.{}.{}", name, field);
                if let Some(value) = lookup(&env_var_name(&key)) {
                    builder = builder
                        .set_override(key.as_str(), value)
                        .with_context(|| format!("Invalid override for {}", key))?;
                }
            }
        }

        builder
            .build()
            .context("Failed to apply environment overrides")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    fn file_layers(
        path: Option<&Path>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = config::Config::try_from(&Config::default())
            .context("Failed to serialize default configuration")?;

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        Ok(config::Config::builder().add_source(defaults).add_source(file))
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = Self::load(path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.server.host.trim().is_empty() {
            result.add_error("server.host", "Host must not be empty");
        }
        if self.server.port == 0 {
            result.add_error("server.port", "Port cannot be 0");
        }
        if self.server.read_timeout == 0 {
            result.add_warning("server.read_timeout", "Header read timeout disabled (0 seconds)");
        }
        if self.server.write_timeout == 0 {
            result.add_warning("server.write_timeout", "Response timeout disabled (0 seconds)");
        }

        let weather = &self.weather;
        if weather.workers == 0 {
            result.add_error("weather.workers", "At least one worker is required");
        }
        if weather.queue_size == 0 {
            result.add_error("weather.queue_size", "Queue size must be greater than 0");
        }
        if weather.handler_timeout == 0 {
            result.add_error(
                "weather.handler_timeout",
                "Handler timeout must be greater than 0",
            );
        }
        if weather.timeout == 0 {
            result.add_error("weather.timeout", "Upstream timeout must be greater than 0");
        }
        if weather.cache_ttl == 0 {
            result.add_warning("weather.cache_ttl", "Caching disabled (0 seconds)");
        } else if weather.cache_ttl > 86_400 {
            result.add_warning("weather.cache_ttl", "Cache TTL is more than 24 hours");
        }

        for (name, service) in &weather.services {
            let field = format!("weather.services.{}", name);
            self.validate_url(&service.base_url, &format!("{}.base_url", field), &mut result);

            if service.enabled
                && service.kind == ServiceKind::WeatherApi
                && !service.has_api_key()
            {
                result.add_warning(
                    format!("{}.api_key", field),
                    "WeatherAPI enabled without an API key - it will only report an error",
                );
            }
        }

        if weather.enabled_services().next().is_none() {
            result.add_warning(
                "weather.services",
                "No weather services enabled - every request will fail",
            );
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            result.add_error(
                "logging.level",
                format!("Unknown level '{}', expected one of {}", self.logging.level, LOG_LEVELS.join(", ")),
            );
        }
        if !LOG_FORMATS.contains(&self.logging.format.to_lowercase().as_str()) {
            result.add_error(
                "logging.format",
                format!("Unknown format '{}', expected one of {}", self.logging.format, LOG_FORMATS.join(", ")),
            );
        }

        if self.telemetry.enabled && self.telemetry.endpoint.trim().is_empty() {
            result.add_error("telemetry.endpoint", "Endpoint required when telemetry is enabled");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.weather.cache_ttl_duration(), Duration::from_secs(300));
        assert_eq!(config.weather.workers, 5);
        assert_eq!(config.weather.queue_size, 100);

        let enabled: Vec<_> = config.weather.enabled_services().map(|(n, _)| n.as_str()).collect();
        assert_eq!(enabled, vec!["open-meteo"]);
    }

    #[test]
    fn test_zero_handler_timeout_rejected() {
        let mut config = Config::default();
        config.weather.handler_timeout = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "weather.handler_timeout"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.weather.workers = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "weather.workers"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config
            .weather
            .services
            .get_mut("open-meteo")
            .unwrap()
            .base_url = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_weather_api_without_key_is_warning() {
        let mut config = Config::default();
        config.weather.services.get_mut("weather-api").unwrap().enabled = true;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.field == "weather.services.weather-api.api_key"));
    }

    #[test]
    fn test_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("weather.cache_ttl"), "WDP_WEATHER_CACHE_TTL");
        assert_eq!(
            env_var_name("weather.services.weather-api.api_key"),
            "WDP_WEATHER_SERVICES_WEATHER_API_API_KEY"
        );
    }

    #[test]
    fn test_load_toml_file_merges_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[weather]
cache_ttl = 60

[weather.services.weather-api]
type = "weather-api"
enabled = true
base_url = "https://api.weatherapi.com/v1"
api_key = "secret"
"#
        )
        .unwrap();

        let config = Config::load_with_env(Some(file.path()), no_env).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.weather.cache_ttl, 60);
        assert_eq!(config.weather.workers, 5);

        let weather_api = config.weather.service("weather-api").unwrap();
        assert!(weather_api.enabled);
        assert_eq!(weather_api.api_key, "secret");
        assert!(config.weather.service("open-meteo").unwrap().enabled);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "weather:\n  workers: 2\n  handler_timeout: 3\nlogging:\n  level: debug\n"
        )
        .unwrap();

        let config = Config::load_with_env(Some(file.path()), no_env).unwrap();
        assert_eq!(config.weather.workers, 2);
        assert_eq!(config.weather.handler_timeout, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::load_with_env(Some(&missing), no_env).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WDP_SERVER_PORT", "7000"),
            ("WDP_WEATHER_CACHE_TTL", "42"),
            ("WDP_WEATHER_SERVICES_WEATHER_API_ENABLED", "true"),
            ("WDP_WEATHER_SERVICES_WEATHER_API_API_KEY", "from-env"),
        ]);
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 9090\n").unwrap();

        let config = Config::load_with_env(Some(file.path()), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.weather.cache_ttl, 42);
        let weather_api = config.weather.service("weather-api").unwrap();
        assert!(weather_api.enabled);
        assert_eq!(weather_api.api_key, "from-env");
    }

    #[test]
    fn test_to_toml_contains_sections() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[server]"));
        assert!(rendered.contains("open-meteo"));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
