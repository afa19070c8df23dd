use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::reply::Response;
use wdp_aggregator::{AggregatorError, RequestContext};

use super::{error_reply, json_reply};
use crate::state::AppState;
use crate::types::{weather_response, ErrorResponse, QueryError, WeatherQuery};

/// `GET /weather?lat=..&lon=..`
pub async fn get_weather(
    state: &AppState,
    params: HashMap<String, String>,
    request_id: &str,
) -> Response {
    let query = match WeatherQuery::from_params(&params) {
        Ok(query) => query,
        Err(QueryError::Bind(details)) => {
            tracing::warn!(details = %details, "Failed to bind request parameters");
            return error_reply(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Invalid request format", "BIND_ERROR").with_details(details),
            );
        }
        Err(QueryError::Validation(errors)) => {
            tracing::warn!(?errors, "Request validation failed");
            return error_reply(
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Invalid request parameters", "VALIDATION_ERROR")
                    .with_details("Request parameters failed validation")
                    .with_validation_errors(errors),
            );
        }
    };

    tracing::info!(lat = query.lat, lon = query.lon, "Processing weather request");

    // Dropping the handler (write timeout, client gone) cancels the fetch
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let ctx = RequestContext::new()
        .with_request_id(request_id)
        .with_cancel(cancel);
    match state
        .aggregator
        .get_weather(&ctx, query.lat, query.lon)
        .await
    {
        Ok(bundle) => {
            let body = weather_response(&bundle);
            tracing::info!(services_count = body.len(), "Weather request completed");
            json_reply(&body, StatusCode::OK)
        }
        Err(err) => aggregator_error_reply(&err),
    }
}

/// HTTP answer for a failed aggregation
pub fn aggregator_error_reply(err: &AggregatorError) -> Response {
    match err {
        AggregatorError::Timeout { timeout, .. } => {
            tracing::warn!(error = %err, "Weather request timed out");
            error_reply(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new(err.to_string(), err.code())
                    .with_details(format!("Request timed out after {timeout:?}")),
            )
        }
        AggregatorError::Overloaded => {
            tracing::warn!("Request rejected due to queue full");
            error_reply(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new(err.to_string(), err.code()).with_details(
                    "Server is currently overloaded, please retry with exponential backoff",
                ),
            )
        }
        _ => {
            tracing::error!(error = %err, "Failed to get weather data");
            let details = match err {
                AggregatorError::NoProviders => err.to_string(),
                _ => err.user_message().to_string(),
            };
            error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to fetch weather data", err.code()).with_details(details),
            )
        }
    }
}
