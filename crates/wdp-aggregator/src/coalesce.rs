//! In-flight request table.
//!
//! Every caller interested in a key, including the one that created the
//! task, holds a oneshot receiver registered under that key. The worker
//! (or a failed submit) resolves the whole list at once and removes the
//! key in the same critical section.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::bundle::ForecastBundle;
use crate::error::AggregatorError;

/// What every waiter on a key receives
pub type TaskOutcome = Result<Arc<ForecastBundle>, AggregatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First caller for the key; it must submit the task
    Created,
    /// A task is already in flight; `waiters` includes this caller
    Joined { waiters: usize },
}

#[derive(Debug, Default)]
pub struct Coalescer {
    in_flight: Mutex<HashMap<String, Vec<oneshot::Sender<TaskOutcome>>>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`, creating the entry if none exists.
    pub fn join_or_create(&self, key: &str) -> (JoinOutcome, oneshot::Receiver<TaskOutcome>) {
        let (tx, rx) = oneshot::channel();
        let mut in_flight = self.in_flight.lock();

        let outcome = match in_flight.get_mut(key) {
            Some(waiters) => {
                waiters.push(tx);
                JoinOutcome::Joined {
                    waiters: waiters.len(),
                }
            }
            None => {
                in_flight.insert(key.to_string(), vec![tx]);
                JoinOutcome::Created
            }
        };
        (outcome, rx)
    }

    /// Deliver `outcome` to every waiter on `key` and drop the entry.
    ///
    /// Waiters that stopped listening are skipped. Returns how many
    /// receivers were still attached.
    pub fn notify(&self, key: &str, outcome: TaskOutcome) -> usize {
        let Some(waiters) = self.in_flight.lock().remove(key) else {
            return 0;
        };

        waiters
            .into_iter()
            .map(|tx| tx.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    /// Drop the entry for a task that never reached a worker, failing any
    /// waiters that joined it in the meantime.
    pub fn remove(&self, key: &str, error: AggregatorError) -> usize {
        self.notify(key, Err(error))
    }

    /// Fail every pending waiter. Used when the aggregator stops.
    pub fn fail_all(&self, error: AggregatorError) -> usize {
        let drained: Vec<_> = self.in_flight.lock().drain().collect();
        drained
            .into_iter()
            .flat_map(|(_, waiters)| waiters)
            .map(|tx| tx.send(Err(error.clone())).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn waiters(&self, key: &str) -> usize {
        self.in_flight.lock().get(key).map_or(0, Vec::len)
    }

    /// Number of keys with a task in flight
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
