use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use url::Url;
use wdp_core::WeatherServiceConfig;

use super::build_query;
use crate::context::FetchContext;
use crate::http::HttpClient;
use crate::provider::{endpoint, fan_out_days, WeatherProvider};
use crate::types::{DayForecast, ProviderPayload, WeatherCondition, WeatherError};

/// Open-Meteo daily forecast adapter (no API key required)
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    name: String,
    url: Url,
    params: BTreeMap<String, String>,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    daily: Option<DailyBlock>,
}

/// Column-oriented daily arrays; index `i` of each column is one day.
#[derive(Debug, Default, Deserialize)]
struct DailyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default, alias = "weather_code")]
    weathercode: Vec<Option<i32>>,
}

impl DailyBlock {
    fn day(&self, index: usize, fallback_date: NaiveDate) -> DayForecast {
        let weather_code = self.weathercode.get(index).copied().flatten();
        DayForecast {
            date: self
                .time
                .get(index)
                .cloned()
                .unwrap_or_else(|| fallback_date.to_string()),
            max_temperature: self.temperature_2m_max.get(index).copied().flatten(),
            min_temperature: self.temperature_2m_min.get(index).copied().flatten(),
            precipitation: self.precipitation_sum.get(index).copied().flatten(),
            weather_code,
            condition: weather_code.map(WeatherCondition::from_wmo_code),
        }
    }
}

impl OpenMeteoProvider {
    pub fn new(
        name: &str,
        config: &WeatherServiceConfig,
        http: HttpClient,
    ) -> Result<Self, WeatherError> {
        Ok(Self {
            name: name.to_string(),
            url: endpoint(name, &config.base_url, "forecast")?,
            params: config.params.clone(),
            http,
        })
    }

    async fn fetch_day(
        &self,
        ctx: &FetchContext,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Value, WeatherError> {
        let date_str = date.to_string();
        let query = build_query(
            vec![
                ("latitude", format!("{lat:.6}")),
                ("longitude", format!("{lon:.6}")),
                ("start_date", date_str.clone()),
                ("end_date", date_str),
                ("timezone", "auto".to_string()),
            ],
            &self.params,
        );

        let response: ForecastResponse = self.http.get_json(ctx, &self.url, &query).await?;
        let daily = response
            .daily
            .ok_or_else(|| WeatherError::Parse("response has no daily block".to_string()))?;

        Ok(serde_json::to_value(daily.day(0, date))?)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forecast(
        &self,
        ctx: &FetchContext,
        lat: f64,
        lon: f64,
    ) -> Result<ProviderPayload, WeatherError> {
        let this = self;
        let today = Local::now().date_naive();
        fan_out_days(&self.name, ctx, lat, lon, today, move |date| {
            this.fetch_day(ctx, lat, lon, date)
        })
        .await
    }
}
