use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wdp_core::{ConfigError, NetworkError};

/// Number of forecast days every provider reports (`day1` ..= `day5`).
pub const FORECAST_DAYS: usize = 5;

/// Provider-specific forecast keyed by day slot (`day1` ..).
///
/// Values stay opaque to the aggregator; only the adapter that produced
/// them knows their shape.
pub type ProviderPayload = BTreeMap<String, serde_json::Value>;

/// Slot name for a zero-based day offset
pub fn day_key(offset: usize) -> String {
    format!("day{}", offset + 1)
}

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 | 66 | 67 => Self::Sleet, // freezing drizzle / rain
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear,
        }
    }
}

/// One day of an Open-Meteo forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub date: String,
    pub max_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub weather_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<WeatherCondition>,
}

/// Weather provider errors
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum WeatherError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::Network(e) => e.user_message(),
            WeatherError::Config(e) => e.user_message(),
            WeatherError::Parse(_) => "The weather service returned data we could not read.",
            WeatherError::Client(_) => "The weather client could not be created.",
        }
    }
}

impl From<serde_json::Error> for WeatherError {
    fn from(err: serde_json::Error) -> Self {
        WeatherError::Parse(err.to_string())
    }
}
