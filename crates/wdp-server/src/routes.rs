//! Route table and the per-request envelope around it.
//!
//! Routing resolves to an [`Endpoint`]; rejections are folded into
//! `Endpoint::Rejected` so request ID, access logging, metrics and the
//! write deadline apply to every response, including 404s.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use warp::http::{HeaderValue, Method, StatusCode};
use warp::path::FullPath;
use warp::reply::Response;
use warp::{Filter, Rejection};
use wdp_aggregator::Metrics;

use crate::handlers::{self, error_reply};
use crate::request_id::{self, REQUEST_ID_HEADER};
use crate::state::AppState;
use crate::types::ErrorResponse;

#[derive(Debug)]
enum Endpoint {
    Weather(HashMap<String, String>),
    Health,
    Live,
    Ready,
    Metrics,
    Rejected(Rejection),
}

impl Endpoint {
    /// Label for `http_requests_total`
    fn route(&self) -> &'static str {
        match self {
            Endpoint::Weather(_) => "/weather",
            Endpoint::Health => "/health",
            Endpoint::Live => "/health/live",
            Endpoint::Ready => "/health/ready",
            Endpoint::Metrics => "/metrics",
            Endpoint::Rejected(_) => "unmatched",
        }
    }
}

fn endpoints() -> impl Filter<Extract = (Endpoint,), Error = Infallible> + Clone {
    let weather = warp::path!("weather")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .map(Endpoint::Weather);
    let health = warp::path!("health").and(warp::get()).map(|| Endpoint::Health);
    let live = warp::path!("health" / "live")
        .and(warp::get())
        .map(|| Endpoint::Live);
    let ready = warp::path!("health" / "ready")
        .and(warp::get())
        .map(|| Endpoint::Ready);
    let metrics = warp::path!("metrics")
        .and(warp::get())
        .map(|| Endpoint::Metrics);

    weather
        .or(health)
        .unify()
        .or(live)
        .unify()
        .or(ready)
        .unify()
        .or(metrics)
        .unify()
        .or_else(|rejection: Rejection| async move {
            Ok::<_, Infallible>((Endpoint::Rejected(rejection),))
        })
}

/// Every route the service exposes
pub fn routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let state = warp::any().map(move || state.clone());

    warp::method()
        .and(warp::path::full())
        .and(warp::header::optional::<String>(REQUEST_ID_HEADER))
        .and(endpoints())
        .and(state)
        .and_then(serve_request)
}

/// Decrements the active-request gauge even if the request is dropped
struct ActiveRequest(Arc<Metrics>);

impl ActiveRequest {
    fn begin(metrics: Arc<Metrics>) -> Self {
        metrics.http_request_started();
        Self(metrics)
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.0.http_request_finished();
    }
}

async fn serve_request(
    method: Method,
    path: FullPath,
    incoming_id: Option<String>,
    endpoint: Endpoint,
    state: AppState,
) -> Result<Response, Infallible> {
    let request_id = request_id::resolve(incoming_id);
    let route = endpoint.route();
    let metrics = Arc::clone(state.aggregator.metrics());
    let _active = ActiveRequest::begin(Arc::clone(&metrics));
    let started = Instant::now();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path.as_str(),
    );

    let write_timeout = state.write_timeout;
    let mut response = match tokio::time::timeout(
        write_timeout,
        dispatch(&state, endpoint, &request_id).instrument(span.clone()),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => write_timeout_reply(write_timeout),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status();
    metrics.record_http_request(route, status.as_u16());
    span.in_scope(|| access_log(status, started.elapsed()));

    Ok(response)
}

async fn dispatch(state: &AppState, endpoint: Endpoint, request_id: &str) -> Response {
    match endpoint {
        Endpoint::Weather(params) => handlers::get_weather(state, params, request_id).await,
        Endpoint::Health => handlers::health(state),
        Endpoint::Live => handlers::liveness(state),
        Endpoint::Ready => handlers::readiness(state),
        Endpoint::Metrics => handlers::metrics(state),
        Endpoint::Rejected(rejection) => rejection_reply(&rejection),
    }
}

fn access_log(status: StatusCode, latency: Duration) {
    let status_code = status.as_u16();
    let latency_ms = latency.as_secs_f64() * 1000.0;
    if status.is_server_error() {
        tracing::error!(status = status_code, latency_ms, "Request completed");
    } else if status.is_client_error() {
        tracing::warn!(status = status_code, latency_ms, "Request completed");
    } else {
        tracing::info!(status = status_code, latency_ms, "Request completed");
    }
}

fn write_timeout_reply(write_timeout: Duration) -> Response {
    tracing::warn!(
        write_timeout_ms = write_timeout.as_millis() as u64,
        "Handler exceeded write timeout"
    );
    error_reply(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorResponse::new("Request timed out", "REQUEST_TIMEOUT")
            .with_details(format!("Request timed out after {write_timeout:?}")),
    )
}

fn rejection_reply(rejection: &Rejection) -> Response {
    if rejection.is_not_found() {
        return error_reply(
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Not found", "NOT_FOUND"),
        );
    }
    if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        return error_reply(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("Invalid request format", "BIND_ERROR").with_details(err.to_string()),
        );
    }
    if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorResponse::new("Method not allowed", "METHOD_NOT_ALLOWED"),
        );
    }

    tracing::error!(?rejection, "Unhandled rejection");
    error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::new("Internal server error", "INTERNAL_ERROR"),
    )
}
