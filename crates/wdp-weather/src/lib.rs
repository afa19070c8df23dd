//! Upstream weather providers for wdp.
//!
//! Each configured service becomes a [`WeatherProvider`] that returns a
//! five-day forecast keyed by day slot. Adapters fetch the days
//! concurrently and record per-day failures inside the payload.

pub mod context;
pub mod http;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod types;

pub use context::FetchContext;
pub use http::HttpClient;
pub use provider::{build_provider, build_providers, forecast_dates, SharedProvider, WeatherProvider};
pub use providers::{OpenMeteoProvider, WeatherApiProvider, MISSING_API_KEY_MESSAGE};
pub use retry::RetryPolicy;
pub use types::*;
