//! Full listener round trip: bind an ephemeral port, query it, shut down.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wdp_core::Config;
use wdp_server::{App, REQUEST_ID_HEADER};
use wdp_weather::{
    FetchContext, ProviderPayload, SharedProvider, WeatherError, WeatherProvider,
};

struct Sunny;

#[async_trait]
impl WeatherProvider for Sunny {
    fn name(&self) -> &str {
        "sunny"
    }

    async fn forecast(
        &self,
        _ctx: &FetchContext,
        lat: f64,
        lon: f64,
    ) -> Result<ProviderPayload, WeatherError> {
        Ok(BTreeMap::from([(
            "day1".to_string(),
            json!({ "lat": lat, "lon": lon }),
        )]))
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_weather_and_drains_on_shutdown() {
    let app = App::with_providers(test_config(), vec![Arc::new(Sunny) as SharedProvider]);
    let root = CancellationToken::new();
    app.start(root.clone()).unwrap();

    let (addr, server) = app.bind(root.clone()).unwrap();
    let server = tokio::spawn(server);

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/weather?lat=1.5&lon=-2.25"))
        .header(REQUEST_ID_HEADER, "serve-test")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()[REQUEST_ID_HEADER], "serve-test");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "sunny": { "day1": { "lat": 1.5, "lon": -2.25 } } }));

    let ready = client
        .get(format!("http://{addr}/health/ready"))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), 200);

    root.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    app.shutdown(Duration::from_secs(1)).await;
    assert!(!app.aggregator().is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_swaps_providers() {
    let app = App::with_providers(test_config(), vec![Arc::new(Sunny) as SharedProvider]);
    app.start(CancellationToken::new()).unwrap();

    let mut config = test_config();
    config.weather.services = BTreeMap::new();
    config.weather.cache_ttl = 60;
    app.reload(config).unwrap();

    assert!(app.aggregator().provider_names().is_empty());
    assert_eq!(app.config().weather.cache_ttl, 60);
    assert_eq!(app.aggregator().cache_stats().ttl, Duration::from_secs(60));

    app.shutdown(Duration::from_secs(1)).await;
}
