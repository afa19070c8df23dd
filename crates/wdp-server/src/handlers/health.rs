use chrono::{SecondsFormat, Utc};
use warp::http::StatusCode;
use warp::reply::Response;

use super::json_reply;
use crate::state::AppState;
use crate::types::{format_uptime, HealthResponse};

pub fn health(state: &AppState) -> Response {
    let body = HealthResponse {
        status: "ok",
        uptime: Some(format_uptime(state.uptime())),
        timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    };
    json_reply(&body, StatusCode::OK)
}

pub fn liveness(state: &AppState) -> Response {
    let body = HealthResponse {
        status: "ok",
        uptime: Some(format_uptime(state.uptime())),
        timestamp: None,
    };
    json_reply(&body, StatusCode::OK)
}

/// Ready only while the aggregator accepts work
pub fn readiness(state: &AppState) -> Response {
    if state.aggregator.is_running() {
        let body = HealthResponse {
            status: "ok",
            uptime: None,
            timestamp: None,
        };
        json_reply(&body, StatusCode::OK)
    } else {
        tracing::debug!(state = %state.aggregator.state(), "Readiness probe while not running");
        let body = HealthResponse {
            status: "unavailable",
            uptime: None,
            timestamp: None,
        };
        json_reply(&body, StatusCode::SERVICE_UNAVAILABLE)
    }
}
