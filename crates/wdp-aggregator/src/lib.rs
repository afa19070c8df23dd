//! Forecast aggregation core.
//!
//! ```text
//! get_weather ─► cache ─hit─► bundle
//!                  │miss
//!                  ▼
//!              coalescer ─joined─► wait on in-flight task
//!                  │created
//!                  ▼
//!            bounded queue ─full─► Overloaded
//!                  │
//!                  ▼
//!          worker ─► providers (concurrent) ─► cache write ─► notify waiters
//! ```

pub mod aggregator;
pub mod bundle;
pub mod cache;
pub mod coalesce;
pub mod error;
pub mod metrics;
mod worker;

pub use aggregator::{Aggregator, AggregatorOptions, AggregatorState, RequestContext};
pub use bundle::{coordinate_key, ForecastBundle};
pub use cache::{CacheStats, WeatherCache};
pub use coalesce::{Coalescer, JoinOutcome, TaskOutcome};
pub use error::{AggregatorError, TimeoutReason};
pub use metrics::{Metrics, MetricsSnapshot, ServiceCounters};
