use std::sync::Arc;
use std::time::{Duration, Instant};

use wdp_aggregator::Aggregator;

/// Everything a request handler needs; cheap to clone per request.
#[derive(Debug, Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    /// Upper bound on producing a response
    pub write_timeout: Duration,
    started_at: Instant,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>, write_timeout: Duration) -> Self {
        Self {
            aggregator,
            write_timeout,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
