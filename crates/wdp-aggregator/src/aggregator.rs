//! The aggregator façade: cache probe, request coalescing, bounded task
//! queue and per-request deadlines in front of the worker pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wdp_core::WeatherConfig;
use wdp_weather::{FetchContext, SharedProvider};

use crate::bundle::{coordinate_key, ForecastBundle};
use crate::cache::{CacheStats, WeatherCache};
use crate::coalesce::{Coalescer, JoinOutcome, TaskOutcome};
use crate::error::{AggregatorError, TimeoutReason};
use crate::metrics::Metrics;
use crate::worker::{self, Task};

/// Tunables for one aggregator instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub cache_ttl: Duration,
    /// `None` disables the per-request deadline
    pub handler_timeout: Option<Duration>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from(&WeatherConfig::default())
    }
}

impl From<&WeatherConfig> for AggregatorOptions {
    fn from(config: &WeatherConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_size,
            cache_ttl: config.cache_ttl_duration(),
            handler_timeout: (config.handler_timeout > 0)
                .then(|| config.handler_timeout_duration()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl AggregatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregatorState::Idle => "idle",
            AggregatorState::Running => "running",
            AggregatorState::Stopping => "stopping",
            AggregatorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request inputs to [`Aggregator::get_weather`].
///
/// Cancelling `cancel` (client went away) ends the wait the same way an
/// elapsed deadline does. A task this request submits hands both the
/// token and the deadline to its providers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub cancel: CancellationToken,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            request_id: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// State shared between the façade and its workers
pub(crate) struct Shared {
    pub cache: WeatherCache,
    pub coalescer: Coalescer,
    pub providers: RwLock<Vec<SharedProvider>>,
    pub metrics: Arc<Metrics>,
    pub shutdown: CancellationToken,
}

pub struct Aggregator {
    shared: Arc<Shared>,
    options: RwLock<AggregatorOptions>,
    state: Mutex<AggregatorState>,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("state", &self.state())
            .field("options", &*self.options.read())
            .field("providers", &self.provider_names())
            .finish()
    }
}

impl Aggregator {
    pub fn new(
        options: AggregatorOptions,
        providers: Vec<SharedProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache: WeatherCache::new(options.cache_ttl),
                coalescer: Coalescer::new(),
                providers: RwLock::new(providers),
                metrics,
                shutdown: CancellationToken::new(),
            }),
            options: RwLock::new(options),
            state: Mutex::new(AggregatorState::Idle),
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Must be called from within a tokio runtime.
    ///
    /// Cancelling `ctx` has the same effect on the workers as [`stop`].
    ///
    /// [`stop`]: Aggregator::stop
    pub fn start(&self, ctx: CancellationToken) -> Result<(), AggregatorError> {
        let mut state = self.state.lock();
        if *state != AggregatorState::Idle {
            return Err(AggregatorError::AlreadyRunning);
        }

        let options = self.options.read().clone();
        let workers = options.workers.max(1);
        let capacity = options.queue_capacity.max(1);

        let (tx, rx) = mpsc::channel(capacity);
        let queue: worker::TaskReceiver = Arc::new(AsyncMutex::new(rx));

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker::run(
                    worker_id,
                    Arc::clone(&self.shared),
                    Arc::clone(&queue),
                ))
            })
            .collect();

        let shutdown = self.shared.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ctx.cancelled() => shutdown.cancel(),
                _ = shutdown.cancelled() => {}
            }
        });

        *self.sender.lock() = Some(tx);
        *self.workers.lock() = handles;
        *state = AggregatorState::Running;

        tracing::info!(
            workers,
            queue_capacity = capacity,
            cache_ttl_secs = options.cache_ttl.as_secs(),
            handler_timeout_ms = options.handler_timeout.map(|t| t.as_millis() as u64),
            providers = ?self.provider_names(),
            "Aggregator started"
        );
        Ok(())
    }

    /// Stop accepting work and wait up to `deadline` for workers to exit.
    ///
    /// Idempotent. Waiters still attached afterwards fail with
    /// [`AggregatorError::NotRunning`].
    pub async fn stop(&self, deadline: Duration) {
        {
            let mut state = self.state.lock();
            match *state {
                AggregatorState::Stopped => return,
                AggregatorState::Idle => {
                    *state = AggregatorState::Stopped;
                    return;
                }
                AggregatorState::Running | AggregatorState::Stopping => {
                    *state = AggregatorState::Stopping;
                }
            }
        }

        tracing::info!("Stopping aggregator");
        self.shared.shutdown.cancel();
        self.sender.lock().take();

        let handles = std::mem::take(&mut *self.workers.lock());
        if tokio::time::timeout(deadline, join_all(handles)).await.is_err() {
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                "Shutdown deadline elapsed before workers drained"
            );
        }

        let abandoned = self.shared.coalescer.fail_all(AggregatorError::NotRunning);
        if abandoned > 0 {
            tracing::warn!(abandoned, "Failed waiters left at shutdown");
        }

        *self.state.lock() = AggregatorState::Stopped;
        tracing::info!("Aggregator stopped");
    }

    /// Fetch the merged forecast for a coordinate pair.
    pub async fn get_weather(
        &self,
        ctx: &RequestContext,
        lat: f64,
        lon: f64,
    ) -> Result<Arc<ForecastBundle>, AggregatorError> {
        let key = coordinate_key(lat, lon);

        if let Some(bundle) = self.shared.cache.get(&key) {
            self.shared.metrics.record_cache_hit();
            tracing::debug!(key = %key, "Cache hit");
            return Ok(bundle);
        }
        self.shared.metrics.record_cache_miss();

        if !self.is_running() {
            return Err(AggregatorError::NotRunning);
        }

        let timeout = self.options.read().handler_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);

        let (joined, rx) = self.shared.coalescer.join_or_create(&key);
        if let JoinOutcome::Joined { waiters } = joined {
            self.shared.metrics.record_task_coalesced();
            tracing::debug!(key = %key, waiters, "Joined in-flight task");
            return self
                .await_outcome(ctx, &key, rx, deadline, timeout, TimeoutReason::ExistingTask)
                .await;
        }

        let expired = deadline.is_some_and(|d| Instant::now() >= d);
        if expired || ctx.cancel.is_cancelled() {
            let err = self.timed_out(&key, TimeoutReason::QueueSubmit, timeout);
            self.shared.coalescer.remove(&key, err.clone());
            return Err(err);
        }

        let fetch_ctx = FetchContext::new(deadline, ctx.cancel.clone());
        let task = Task::new(key.clone(), lat, lon, ctx.request_id.clone(), fetch_ctx);
        let task_id = task.id;
        let submitted = match self.sender.lock().as_ref() {
            Some(tx) => tx.try_send(task).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => AggregatorError::Overloaded,
                mpsc::error::TrySendError::Closed(_) => AggregatorError::NotRunning,
            }),
            None => Err(AggregatorError::NotRunning),
        };

        if let Err(err) = submitted {
            if err == AggregatorError::Overloaded {
                self.shared.metrics.record_overloaded();
                tracing::warn!(key = %key, "Task queue full, rejecting request");
            }
            self.shared.coalescer.remove(&key, err.clone());
            return Err(err);
        }

        self.shared.metrics.record_task_submitted();
        tracing::debug!(key = %key, task_id = %task_id, "Task submitted");

        self.await_outcome(ctx, &key, rx, deadline, timeout, TimeoutReason::TaskExecution)
            .await
    }

    async fn await_outcome(
        &self,
        ctx: &RequestContext,
        key: &str,
        rx: oneshot::Receiver<TaskOutcome>,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
        reason: TimeoutReason,
    ) -> TaskOutcome {
        let elapsed = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            received = rx => received.unwrap_or_else(|_| {
                Err(AggregatorError::Internal("task ended without a result".to_string()))
            }),
            _ = elapsed => Err(self.timed_out(key, reason, timeout)),
            _ = ctx.cancel.cancelled() => Err(self.timed_out(key, reason, timeout)),
            _ = self.shared.shutdown.cancelled() => Err(AggregatorError::NotRunning),
        }
    }

    fn timed_out(
        &self,
        key: &str,
        reason: TimeoutReason,
        timeout: Option<Duration>,
    ) -> AggregatorError {
        self.shared.metrics.record_timeout(reason);
        let timeout = timeout.unwrap_or_default();
        tracing::warn!(
            key,
            reason = reason.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            "Request deadline elapsed"
        );
        AggregatorError::timeout(reason, timeout)
    }

    /// Swap providers, cache TTL and handler timeout in place.
    ///
    /// Worker count and queue capacity only change on restart.
    pub fn reload(&self, options: AggregatorOptions, providers: Vec<SharedProvider>) {
        let mut current = self.options.write();

        if options.workers != current.workers || options.queue_capacity != current.queue_capacity {
            tracing::warn!(
                workers = options.workers,
                queue_capacity = options.queue_capacity,
                "Worker pool changes take effect after restart"
            );
        }

        self.shared.cache.set_ttl(options.cache_ttl);
        current.cache_ttl = options.cache_ttl;
        current.handler_timeout = options.handler_timeout;

        let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
        *self.shared.providers.write() = providers;

        tracing::info!(
            providers = ?names,
            cache_ttl_secs = options.cache_ttl.as_secs(),
            "Aggregator reloaded"
        );
    }

    pub fn state(&self) -> AggregatorState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == AggregatorState::Running && !self.shared.shutdown.is_cancelled()
    }

    pub fn options(&self) -> AggregatorOptions {
        self.options.read().clone()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.shared
            .providers
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.shared.cache.clear();
    }

    /// Cached bundle for a coordinate pair, without touching metrics
    pub fn cached(&self, lat: f64, lon: f64) -> Option<Arc<ForecastBundle>> {
        self.shared.cache.get(&coordinate_key(lat, lon))
    }

    /// Whether a fetch for this coordinate pair is currently in flight
    pub fn is_in_flight(&self, lat: f64, lon: f64) -> bool {
        self.shared.coalescer.contains(&coordinate_key(lat, lon))
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    pub fn render_metrics(&self) -> String {
        self.shared.metrics.render_prometheus(self.shared.cache.len())
    }
}
