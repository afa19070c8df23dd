use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use url::Url;
use wdp_core::WeatherServiceConfig;

use super::build_query;
use crate::context::FetchContext;
use crate::http::HttpClient;
use crate::provider::{endpoint, fan_out_days, WeatherProvider};
use crate::types::{ProviderPayload, WeatherError};

pub const MISSING_API_KEY_MESSAGE: &str = "WeatherAPI requires API key to be configured";

/// weatherapi.com adapter. Day slots hold the upstream document as-is.
#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    name: String,
    url: Url,
    api_key: String,
    params: BTreeMap<String, String>,
    http: HttpClient,
}

impl WeatherApiProvider {
    pub fn new(
        name: &str,
        config: &WeatherServiceConfig,
        http: HttpClient,
    ) -> Result<Self, WeatherError> {
        Ok(Self {
            name: name.to_string(),
            url: endpoint(name, &config.base_url, "forecast.json")?,
            api_key: config.api_key.trim().to_string(),
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
        let query = build_query(
            vec![
                ("key", self.api_key.clone()),
                ("q", format!("{lat:.6},{lon:.6}")),
                ("date", date.to_string()),
            ],
            &self.params,
        );
        self.http.get_json(ctx, &self.url, &query).await
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forecast(
        &self,
        ctx: &FetchContext,
        lat: f64,
        lon: f64,
    ) -> Result<ProviderPayload, WeatherError> {
        if self.api_key.is_empty() {
            tracing::warn!(provider = %self.name, lat, lon, "WeatherAPI called without API key");
            return Ok(ProviderPayload::from([(
                "error".to_string(),
                json!(MISSING_API_KEY_MESSAGE),
            )]));
        }

        let this = self;
        let today = Local::now().date_naive();
        fan_out_days(&self.name, ctx, lat, lon, today, move |date| {
            this.fetch_day(ctx, lat, lon, date)
        })
        .await
    }
}
