//! Request-scoped bounds for upstream calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wdp_core::NetworkError;

/// Deadline and cancellation inherited from the request that asked for a
/// forecast. Every upstream round-trip made on its behalf stops when
/// either fires.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// No deadline and a token nobody cancels
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Some(Instant::now() + timeout), CancellationToken::new())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Err` once the request was cancelled or its deadline has passed
    pub fn check(&self) -> Result<(), NetworkError> {
        if self.cancel.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(NetworkError::Timeout),
            _ => Ok(()),
        }
    }

    /// Drive `operation` until it finishes, the deadline passes
    /// ([`NetworkError::Timeout`]) or the token fires
    /// ([`NetworkError::Cancelled`]).
    pub async fn run<T, F>(&self, operation: F) -> Result<T, NetworkError>
    where
        F: Future<Output = Result<T, NetworkError>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation)
                    .await
                    .unwrap_or(Err(NetworkError::Timeout)),
                None => operation.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NetworkError::Cancelled),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_passes_result_through() {
        let ctx = FetchContext::unbounded();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.run(async { Ok::<_, NetworkError>(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_slow_operation() {
        let ctx = FetchContext::with_timeout(Duration::from_millis(20));
        let started = Instant::now();

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, NetworkError>(())
            })
            .await;

        assert_eq!(result, Err(NetworkError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(ctx.check(), Err(NetworkError::Timeout));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_operation() {
        let token = CancellationToken::new();
        let ctx = FetchContext::new(None, token.clone());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.cancel();
            })
        };

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, NetworkError>(())
            })
            .await;

        assert_eq!(result, Err(NetworkError::Cancelled));
        assert_eq!(ctx.check(), Err(NetworkError::Cancelled));
        let _ = canceller.await;
    }
}
