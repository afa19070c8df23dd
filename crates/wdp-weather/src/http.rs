use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;
use wdp_core::{NetworkError, ReqwestErrorExt};

use crate::context::FetchContext;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::WeatherError;

/// Shared HTTP client for provider adapters.
///
/// Cloning is cheap; every clone shares one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    /// `timeout` bounds each individual attempt, not the retry sequence.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wdp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WeatherError::Client(e.to_string()))?;

        Ok(Self { client, retry })
    }

    /// GET `url` with `query` and decode the JSON body.
    ///
    /// Non-2xx answers become [`NetworkError::ServerError`]. Attempts and
    /// backoff together stop at `ctx`'s deadline or cancellation.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &FetchContext,
        url: &Url,
        query: &[(String, String)],
    ) -> Result<T, WeatherError> {
        let client = &self.client;
        let attempts = with_retry(self.retry, || async move {
            let response = client
                .get(url.clone())
                .query(query)
                .send()
                .await
                .map_err(ReqwestErrorExt::into_network_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(NetworkError::ServerError {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or_default().to_string(),
                });
            }

            response
                .bytes()
                .await
                .map_err(ReqwestErrorExt::into_network_error)
        });
        let body = ctx.run(attempts).await?;

        serde_json::from_slice(&body).map_err(|e| WeatherError::Parse(e.to_string()))
    }
}
