use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::Instrument;
use url::Url;
use wdp_core::{ConfigError, ServiceKind, WeatherConfig, WeatherServiceConfig};

use crate::context::FetchContext;
use crate::http::HttpClient;
use crate::providers::{OpenMeteoProvider, WeatherApiProvider};
use crate::retry::RetryPolicy;
use crate::types::{day_key, ProviderPayload, WeatherError, FORECAST_DAYS};

/// A single upstream weather source.
///
/// Implementations are shared across workers and must be safe to call
/// concurrently. A provider that can only partially answer should still
/// return `Ok`, recording the failure inside the payload. Upstream calls
/// must honour `ctx`.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Key used for this provider in the aggregated bundle
    fn name(&self) -> &str;

    async fn forecast(
        &self,
        ctx: &FetchContext,
        lat: f64,
        lon: f64,
    ) -> Result<ProviderPayload, WeatherError>;
}

pub type SharedProvider = Arc<dyn WeatherProvider>;

/// The calendar days covered by a forecast starting at `today`
pub fn forecast_dates(today: NaiveDate) -> Vec<NaiveDate> {
    (0..FORECAST_DAYS as u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .collect()
}

/// Fetch every forecast day concurrently and collect them by slot.
///
/// A failed day becomes `{"error": ..., "date": ...}` in its slot. If
/// `ctx` ended before every day arrived the whole forecast fails, so a
/// payload cut short by the request's deadline is never cached.
pub(crate) async fn fan_out_days<F, Fut>(
    provider: &str,
    ctx: &FetchContext,
    lat: f64,
    lon: f64,
    today: NaiveDate,
    fetch: F,
) -> Result<ProviderPayload, WeatherError>
where
    F: Fn(NaiveDate) -> Fut,
    Fut: Future<Output = Result<Value, WeatherError>>,
{
    let span = tracing::debug_span!("forecast", provider, lat, lon);

    async {
        let dates = forecast_dates(today);
        let results = join_all(dates.iter().enumerate().map(|(offset, date)| {
            let day = offset + 1;
            fetch(*date).instrument(tracing::debug_span!("day", day, date = %date))
        }))
        .await;

        if results.iter().any(Result::is_err) {
            if let Err(err) = ctx.check() {
                tracing::warn!(provider, error = %err, "Forecast interrupted by request context");
                return Err(WeatherError::from(err));
            }
        }

        let mut payload = ProviderPayload::new();
        for (offset, (date, result)) in dates.into_iter().zip(results).enumerate() {
            let value = match result {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(provider, %date, error = %err, "Failed to fetch day forecast");
                    json!({ "error": err.to_string(), "date": date.to_string() })
                }
            };
            payload.insert(day_key(offset), value);
        }

        tracing::debug!(provider, days_fetched = payload.len(), "Forecast completed");
        Ok(payload)
    }
    .instrument(span)
    .await
}

/// `{base_url}/{path}` as a parsed URL
pub(crate) fn endpoint(name: &str, base_url: &str, path: &str) -> Result<Url, WeatherError> {
    let raw = format!("{}/{}", base_url.trim_end_matches('/'), path);
    Url::parse(&raw).map_err(|e| {
        ConfigError::Invalid(format!("weather.services.{name}.base_url: {e}")).into()
    })
}

/// Build the adapter for one configured service
pub fn build_provider(
    name: &str,
    config: &WeatherServiceConfig,
    http: HttpClient,
) -> Result<SharedProvider, WeatherError> {
    let provider: SharedProvider = match config.kind {
        ServiceKind::OpenMeteo => Arc::new(OpenMeteoProvider::new(name, config, http)?),
        ServiceKind::WeatherApi => Arc::new(WeatherApiProvider::new(name, config, http)?),
    };
    Ok(provider)
}

/// Build adapters for every enabled service, in name order.
pub fn build_providers(config: &WeatherConfig) -> Result<Vec<SharedProvider>, WeatherError> {
    let http = HttpClient::new(
        config.timeout_duration(),
        RetryPolicy::with_max_retries(config.retries),
    )?;

    let providers = config
        .enabled_services()
        .map(|(name, service)| build_provider(name, service, http.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        count = providers.len(),
        names = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
        "Weather providers configured"
    );
    Ok(providers)
}
