use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use wdp_aggregator::ForecastBundle;
use wdp_weather::{day_key, FORECAST_DAYS};

/// Body of every non-2xx JSON answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
            validation_errors: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_validation_errors(mut self, errors: Vec<ValidationErrorDetail>) -> Self {
        self.validation_errors = Some(errors);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub value: f64,
    pub message: String,
}

/// Why `/weather` query parameters were refused
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Missing or not a number
    Bind(String),
    /// Parsed but out of range
    Validation(Vec<ValidationErrorDetail>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherQuery {
    pub lat: f64,
    pub lon: f64,
}

impl WeatherQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let lat = parse_coordinate(params, "lat")?;
        let lon = parse_coordinate(params, "lon")?;

        let mut errors = Vec::new();
        if !(-90.0..=90.0).contains(&lat) {
            errors.push(ValidationErrorDetail {
                field: "lat".to_string(),
                value: lat,
                message: "lat must be a valid latitude between -90 and 90 degrees".to_string(),
            });
        }
        if !(-180.0..=180.0).contains(&lon) {
            errors.push(ValidationErrorDetail {
                field: "lon".to_string(),
                value: lon,
                message: "lon must be a valid longitude between -180 and 180 degrees".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(Self { lat, lon })
        } else {
            Err(QueryError::Validation(errors))
        }
    }
}

fn parse_coordinate(params: &HashMap<String, String>, field: &str) -> Result<f64, QueryError> {
    let raw = params
        .get(field)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| QueryError::Bind(format!("{field} is required")))?;

    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| QueryError::Bind(format!("{field} must be a number, got {raw:?}")))
}

/// Day slots of one provider; keys other than `day1`..`day5` are dropped
pub type ServiceDays = BTreeMap<String, Value>;

/// `/weather` success body: provider name to its day slots
pub type WeatherResponse = BTreeMap<String, ServiceDays>;

pub fn weather_response(bundle: &ForecastBundle) -> WeatherResponse {
    bundle
        .providers
        .iter()
        .map(|(provider, payload)| {
            let days = (0..FORECAST_DAYS)
                .map(day_key)
                .filter_map(|key| payload.get(&key).map(|value| (key, value.clone())))
                .collect();
            (provider.clone(), days)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Compact uptime such as `1h2m3.5s`
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = (total % 60) as f64 + f64::from(uptime.subsec_millis()) / 1000.0;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{seconds}s"));
    out
}
