//! HTTP front end for the wdp aggregator.
//!
//! Routes: `GET /weather`, `GET /health`, `GET /health/live`,
//! `GET /health/ready` and `GET /metrics`.

pub mod app;
pub mod handlers;
pub mod request_id;
pub mod routes;
pub mod state;
pub mod types;

pub use app::App;
pub use request_id::REQUEST_ID_HEADER;
pub use routes::routes;
pub use state::AppState;
