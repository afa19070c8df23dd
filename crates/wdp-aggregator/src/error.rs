use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stage at which a caller's deadline elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeoutReason {
    /// Waiting on a fetch another request already started
    ExistingTask,
    /// Deadline was gone before the task could be queued
    QueueSubmit,
    /// Waiting on the task this request submitted
    TaskExecution,
}

impl TimeoutReason {
    pub const ALL: [TimeoutReason; 3] = [
        TimeoutReason::ExistingTask,
        TimeoutReason::QueueSubmit,
        TimeoutReason::TaskExecution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutReason::ExistingTask => "existing_task",
            TimeoutReason::QueueSubmit => "queue_submit",
            TimeoutReason::TaskExecution => "task_execution",
        }
    }
}

impl fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a failed forecast request.
///
/// `Clone` because one worker result is handed to every coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("task queue is full")]
    Overloaded,

    #[error("request timeout ({reason}) after {}ms", .timeout.as_millis())]
    Timeout {
        reason: TimeoutReason,
        timeout: Duration,
    },

    #[error("no weather data available")]
    NoProviders,

    #[error("aggregator is not running")]
    NotRunning,

    #[error("aggregator already started")]
    AlreadyRunning,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AggregatorError {
    pub fn timeout(reason: TimeoutReason, timeout: Duration) -> Self {
        AggregatorError::Timeout { reason, timeout }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AggregatorError::Timeout { .. })
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AggregatorError::Overloaded => "QUEUE_FULL",
            AggregatorError::Timeout { .. } => "REQUEST_TIMEOUT",
            _ => "AGGREGATION_ERROR",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            AggregatorError::Overloaded => "The service is busy. Try again shortly.",
            AggregatorError::Timeout { .. } => "The weather request took too long.",
            AggregatorError::NoProviders => "No weather data is available for this location.",
            AggregatorError::NotRunning => "The weather service is not accepting requests.",
            AggregatorError::AlreadyRunning | AggregatorError::Internal(_) => {
                "Something went wrong while aggregating weather data."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_reason_strings() {
        let names: Vec<&str> = TimeoutReason::ALL.iter().map(TimeoutReason::as_str).collect();
        assert_eq!(names, vec!["existing_task", "queue_submit", "task_execution"]);
    }

    #[test]
    fn test_timeout_display_carries_reason_and_deadline() {
        let err = AggregatorError::timeout(TimeoutReason::TaskExecution, Duration::from_millis(50));
        assert_eq!(err.to_string(), "request timeout (task_execution) after 50ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_codes() {
        assert_eq!(AggregatorError::Overloaded.code(), "QUEUE_FULL");
        assert_eq!(
            AggregatorError::timeout(TimeoutReason::QueueSubmit, Duration::ZERO).code(),
            "REQUEST_TIMEOUT"
        );
        assert_eq!(AggregatorError::NoProviders.code(), "AGGREGATION_ERROR");
        assert_eq!(AggregatorError::NotRunning.code(), "AGGREGATION_ERROR");
        assert_eq!(AggregatorError::NoProviders.to_string(), "no weather data available");
    }
}
