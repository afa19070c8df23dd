mod health;
mod metrics;
mod weather;

pub use health::{health, liveness, readiness};
pub use metrics::metrics;
pub use weather::{aggregator_error_reply, get_weather};

use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Reply;

use crate::types::ErrorResponse;

pub(crate) fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

pub(crate) fn error_reply(status: StatusCode, body: ErrorResponse) -> Response {
    json_reply(&body, status)
}
