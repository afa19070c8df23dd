//! Worker pool draining the aggregator's task queue.
//!
//! Workers share one receiver. Each dequeued task runs its provider
//! fan-out in a separate tokio task so a panic is contained to that task;
//! the worker logs it, fails the waiters and keeps going. Providers get
//! the submitting request's [`FetchContext`], so upstream calls stop at
//! that request's deadline.
//!
//! On shutdown, tasks still queued are abandoned rather than drained;
//! their waiters fail with `NotRunning`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{Instrument, Span};
use uuid::Uuid;
use wdp_weather::FetchContext;

use crate::aggregator::Shared;
use crate::bundle::ForecastBundle;
use crate::coalesce::TaskOutcome;
use crate::error::AggregatorError;

/// A queued fetch for one coordinate key
#[derive(Debug)]
pub(crate) struct Task {
    pub id: Uuid,
    pub key: String,
    pub lat: f64,
    pub lon: f64,
    pub request_id: Option<String>,
    /// Deadline and cancellation of the submitting request
    pub ctx: FetchContext,
    /// Span of the submitting request; the worker's span is its child
    pub span: Span,
    pub created_at: Instant,
}

impl Task {
    pub fn new(
        key: String,
        lat: f64,
        lon: f64,
        request_id: Option<String>,
        ctx: FetchContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            lat,
            lon,
            request_id,
            ctx,
            span: Span::current(),
            created_at: Instant::now(),
        }
    }
}

pub(crate) type TaskReceiver = Arc<AsyncMutex<mpsc::Receiver<Task>>>;

pub(crate) async fn run(worker_id: usize, shared: Arc<Shared>, queue: TaskReceiver) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let task = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                tracing::debug!(worker_id, "Worker received shutdown signal");
                break;
            }
            task = next_task(&queue) => match task {
                Some(task) => task,
                None => {
                    tracing::debug!(worker_id, "Task queue closed");
                    break;
                }
            },
        };

        process(worker_id, &shared, task).await;
    }

    tracing::debug!(worker_id, "Worker stopped");
}

async fn next_task(queue: &TaskReceiver) -> Option<Task> {
    queue.lock().await.recv().await
}

async fn process(worker_id: usize, shared: &Arc<Shared>, task: Task) {
    let span = tracing::info_span!(
        parent: &task.span,
        "aggregate",
        worker_id,
        task_id = %task.id,
        key = %task.key,
        request_id = task.request_id.as_deref().unwrap_or_default(),
    );
    let queued_ms = task.created_at.elapsed().as_millis() as u64;
    let started = Instant::now();

    let mut handle = tokio::spawn(
        fetch_bundle(Arc::clone(shared), task.ctx.clone(), task.lat, task.lon)
            .instrument(span.clone()),
    );

    let outcome: TaskOutcome = tokio::select! {
        joined = &mut handle => match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                tracing::error!(parent: &span, "Aggregation task panicked");
                Err(AggregatorError::Internal("aggregation task panicked".to_string()))
            }
            Err(err) => Err(AggregatorError::Internal(err.to_string())),
        },
        _ = shared.shutdown.cancelled() => {
            handle.abort();
            tracing::warn!(parent: &span, "Abandoning task on shutdown");
            Err(AggregatorError::NotRunning)
        }
    };

    if let Ok(bundle) = &outcome {
        shared.cache.set(task.key.clone(), Arc::clone(bundle));
    }

    let success = outcome.is_ok();
    let delivered = shared.coalescer.notify(&task.key, outcome);
    tracing::debug!(
        parent: &span,
        success,
        delivered,
        queued_ms,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Task completed"
    );
}

/// Ask every provider concurrently and merge whatever succeeded.
async fn fetch_bundle(shared: Arc<Shared>, ctx: FetchContext, lat: f64, lon: f64) -> TaskOutcome {
    let providers = shared.providers.read().clone();

    let mut set = JoinSet::new();
    for provider in providers {
        let span = tracing::debug_span!("provider", provider = provider.name());
        let ctx = ctx.clone();
        set.spawn(
            async move {
                let result = provider.forecast(&ctx, lat, lon).await;
                (provider.name().to_string(), result)
            }
            .instrument(span),
        );
    }

    let mut merged = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(payload))) => {
                shared.metrics.record_service_call(&name, true);
                merged.insert(name, payload);
            }
            Ok((name, Err(err))) => {
                shared.metrics.record_service_call(&name, false);
                tracing::warn!(
                    provider = %name,
                    error = %err,
                    summary = err.user_message(),
                    "Provider failed"
                );
            }
            Err(err) => {
                tracing::error!(error = %err, "Provider call did not complete");
            }
        }
    }

    if merged.is_empty() {
        tracing::warn!(lat, lon, "No provider returned data");
        return Err(AggregatorError::NoProviders);
    }

    Ok(Arc::new(ForecastBundle::new(merged)))
}
