//! Route-level tests using `warp::test` against stub providers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use wdp_aggregator::{Aggregator, AggregatorOptions, Metrics, RequestContext};
use wdp_server::{routes, AppState, REQUEST_ID_HEADER};
use wdp_weather::{
    FetchContext, ProviderPayload, SharedProvider, WeatherError, WeatherProvider,
};

struct FixedProvider {
    name: &'static str,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl WeatherProvider for FixedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn forecast(
        &self,
        _ctx: &FetchContext,
        _lat: f64,
        _lon: f64,
    ) -> Result<ProviderPayload, WeatherError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(WeatherError::Parse("upstream broken".into()));
        }
        Ok(BTreeMap::from([
            ("day1".to_string(), json!({ "max_temperature": 21.0 })),
            ("day2".to_string(), json!({ "max_temperature": 19.5 })),
            ("extra".to_string(), json!("dropped")),
        ]))
    }
}

/// Blocks every call until the test releases the gate
struct GatedProvider {
    gate: Arc<Semaphore>,
    calls: AtomicUsize,
}

#[async_trait]
impl WeatherProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn forecast(
        &self,
        _ctx: &FetchContext,
        _lat: f64,
        _lon: f64,
    ) -> Result<ProviderPayload, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        Ok(BTreeMap::from([("day1".to_string(), json!({ "ok": true }))]))
    }
}

fn provider(name: &'static str, delay_ms: u64, fail: bool) -> SharedProvider {
    Arc::new(FixedProvider {
        name,
        delay: Duration::from_millis(delay_ms),
        fail,
    })
}

fn state_with(
    providers: Vec<SharedProvider>,
    options: AggregatorOptions,
    write_timeout: Duration,
) -> AppState {
    let aggregator = Arc::new(Aggregator::new(options, providers, Arc::new(Metrics::new())));
    aggregator.start(CancellationToken::new()).unwrap();
    AppState::new(aggregator, write_timeout)
}

fn default_state(providers: Vec<SharedProvider>) -> AppState {
    state_with(
        providers,
        AggregatorOptions {
            workers: 2,
            queue_capacity: 10,
            cache_ttl: Duration::from_secs(300),
            handler_timeout: Some(Duration::from_secs(5)),
        },
        Duration::from_secs(5),
    )
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn weather_returns_day_slots_per_provider() {
    let state = default_state(vec![provider("open-meteo", 0, false), provider("broken", 0, true)]);
    let api = routes(state);

    let resp = warp::test::request()
        .method("GET")
        .path("/weather?lat=52.52&lon=13.41")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 200);
    assert_eq!(
        body_json(resp.body()),
        json!({
            "open-meteo": {
                "day1": { "max_temperature": 21.0 },
                "day2": { "max_temperature": 19.5 }
            }
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_coordinate_is_bind_error() {
    let api = routes(default_state(vec![provider("a", 0, false)]));

    let resp = warp::test::request().path("/weather?lat=10").reply(&api).await;

    assert_eq!(resp.status(), 400);
    let body = body_json(resp.body());
    assert_eq!(body["code"], "BIND_ERROR");
    assert_eq!(body["details"], "lon is required");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_range_coordinate_is_validation_error() {
    let api = routes(default_state(vec![provider("a", 0, false)]));

    let resp = warp::test::request()
        .path("/weather?lat=95&lon=10")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 400);
    let body = body_json(resp.body());
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["validation_errors"][0]["field"], "lat");
    assert_eq!(body["validation_errors"][0]["value"], 95.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_providers_failing_is_aggregation_error() {
    let api = routes(default_state(vec![provider("a", 0, true)]));

    let resp = warp::test::request()
        .path("/weather?lat=1&lon=2")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 500);
    let body = body_json(resp.body());
    assert_eq!(body["code"], "AGGREGATION_ERROR");
    assert_eq!(body["details"], "no weather data available");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_timeout_maps_to_request_timeout() {
    let state = state_with(
        vec![provider("slow", 500, false)],
        AggregatorOptions {
            workers: 1,
            queue_capacity: 10,
            cache_ttl: Duration::from_secs(300),
            handler_timeout: Some(Duration::from_millis(50)),
        },
        Duration::from_secs(5),
    );
    let api = routes(state);

    let resp = warp::test::request()
        .path("/weather?lat=1&lon=2")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 503);
    assert_eq!(body_json(resp.body())["code"], "REQUEST_TIMEOUT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_timeout_bounds_handler_time() {
    let state = state_with(
        vec![provider("slow", 500, false)],
        AggregatorOptions {
            workers: 1,
            queue_capacity: 10,
            cache_ttl: Duration::from_secs(300),
            handler_timeout: None,
        },
        Duration::from_millis(50),
    );
    let api = routes(state);

    let resp = warp::test::request()
        .path("/weather?lat=3&lon=4")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 503);
    assert_eq!(body_json(resp.body())["code"], "REQUEST_TIMEOUT");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_id_is_echoed_or_generated() {
    let api = routes(default_state(vec![provider("a", 0, false)]));

    let resp = warp::test::request()
        .path("/health")
        .header(REQUEST_ID_HEADER, "req-42")
        .reply(&api)
        .await;
    assert_eq!(resp.headers()[REQUEST_ID_HEADER], "req-42");

    let resp = warp::test::request().path("/health").reply(&api).await;
    let generated = resp.headers()[REQUEST_ID_HEADER].to_str().unwrap();
    assert_eq!(generated.len(), 36);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_endpoints() {
    let state = default_state(vec![provider("a", 0, false)]);
    let api = routes(state.clone());

    let resp = warp::test::request().path("/health").reply(&api).await;
    assert_eq!(resp.status(), 200);
    let body = body_json(resp.body());
    assert_eq!(body["status"], "ok");
    assert!(body["uptime"].is_string());
    assert!(body["timestamp"].is_string());

    let resp = warp::test::request().path("/health/live").reply(&api).await;
    assert_eq!(resp.status(), 200);
    assert!(body_json(resp.body()).get("timestamp").is_none());

    let resp = warp::test::request().path("/health/ready").reply(&api).await;
    assert_eq!(resp.status(), 200);

    state.aggregator.stop(Duration::from_secs(1)).await;
    let resp = warp::test::request().path("/health/ready").reply(&api).await;
    assert_eq!(resp.status(), 503);
    assert_eq!(body_json(resp.body())["status"], "unavailable");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_route_is_not_found() {
    let api = routes(default_state(vec![provider("a", 0, false)]));

    let resp = warp::test::request().path("/nope").reply(&api).await;

    assert_eq!(resp.status(), 404);
    assert_eq!(body_json(resp.body())["code"], "NOT_FOUND");
    assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_expose_request_and_cache_counters() {
    let api = routes(default_state(vec![provider("a", 0, false)]));

    for _ in 0..2 {
        let resp = warp::test::request()
            .path("/weather?lat=10&lon=20")
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
    }

    let resp = warp::test::request().path("/metrics").reply(&api).await;
    assert_eq!(resp.status(), 200);
    let text = String::from_utf8(resp.body().to_vec()).unwrap();

    assert!(text.contains("aggregator_cache_hits_total 1\n"));
    assert!(text.contains("aggregator_cache_miss_total 1\n"));
    assert!(text.contains("aggregator_cache_size 1\n"));
    assert!(text.contains("weather_service_calls_total{service=\"a\"} 1\n"));
    assert!(text.contains("http_requests_total{route=\"/weather\",status=\"200\"} 2\n"));
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_is_queue_full() {
    let gated = Arc::new(GatedProvider {
        gate: Arc::new(Semaphore::new(0)),
        calls: AtomicUsize::new(0),
    });
    let state = state_with(
        vec![Arc::clone(&gated) as SharedProvider],
        AggregatorOptions {
            workers: 1,
            queue_capacity: 1,
            cache_ttl: Duration::from_secs(300),
            handler_timeout: Some(Duration::from_secs(5)),
        },
        Duration::from_secs(5),
    );
    let api = routes(state.clone());

    let busy = {
        let aggregator = Arc::clone(&state.aggregator);
        tokio::spawn(async move { aggregator.get_weather(&RequestContext::new(), 1.0, 1.0).await })
    };
    wait_until(|| gated.calls.load(Ordering::SeqCst) == 1).await;

    let queued = {
        let aggregator = Arc::clone(&state.aggregator);
        tokio::spawn(async move { aggregator.get_weather(&RequestContext::new(), 2.0, 2.0).await })
    };
    wait_until(|| state.aggregator.metrics().snapshot().tasks_submitted == 2).await;

    let resp = warp::test::request()
        .path("/weather?lat=3&lon=3")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 503);
    let body = body_json(resp.body());
    assert_eq!(body["code"], "QUEUE_FULL");
    assert_eq!(body["error"], "task queue is full");

    gated.gate.add_permits(10);
    assert!(busy.await.unwrap().is_ok());
    assert!(queued.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_aggregator_is_aggregation_error() {
    let state = default_state(vec![provider("a", 0, false)]);
    let api = routes(state.clone());
    state.aggregator.stop(Duration::from_secs(1)).await;

    let resp = warp::test::request()
        .path("/weather?lat=7&lon=8")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 500);
    let body = body_json(resp.body());
    assert_eq!(body["code"], "AGGREGATION_ERROR");
    assert_eq!(body["details"], "The weather service is not accepting requests.");
}
