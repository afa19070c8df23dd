//! Process-wide counters for the aggregator and its HTTP front.
//!
//! Counters are plain atomics with `Relaxed` ordering; they are
//! independent measurements and never used for synchronisation.
//! Labelled series live in small maps behind a mutex.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::TimeoutReason;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCounters {
    pub calls: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    tasks_submitted: AtomicU64,
    tasks_coalesced: AtomicU64,
    overloaded: AtomicU64,
    timeouts: [AtomicU64; 3],
    services: Mutex<BTreeMap<String, ServiceCounters>>,
    http_requests: Mutex<BTreeMap<(String, u16), u64>>,
    http_active: AtomicUsize,
}

/// Point-in-time copy of the counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub tasks_submitted: u64,
    pub tasks_coalesced: u64,
    pub overloaded: u64,
    pub timeouts: BTreeMap<TimeoutReason, u64>,
    pub services: BTreeMap<String, ServiceCounters>,
    pub http_requests: BTreeMap<(String, u16), u64>,
    pub http_active: usize,
}

impl MetricsSnapshot {
    pub fn timeouts_for(&self, reason: TimeoutReason) -> u64 {
        self.timeouts.get(&reason).copied().unwrap_or(0)
    }

    pub fn service(&self, name: &str) -> ServiceCounters {
        self.services.get(name).copied().unwrap_or_default()
    }
}

fn timeout_slot(reason: TimeoutReason) -> usize {
    match reason {
        TimeoutReason::ExistingTask => 0,
        TimeoutReason::QueueSubmit => 1,
        TimeoutReason::TaskExecution => 2,
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_coalesced(&self) {
        self.tasks_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overloaded(&self) {
        self.overloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self, reason: TimeoutReason) {
        self.timeouts[timeout_slot(reason)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_service_call(&self, service: &str, success: bool) {
        let mut services = self.services.lock();
        let counters = services.entry(service.to_string()).or_default();
        counters.calls += 1;
        if !success {
            counters.errors += 1;
        }
    }

    pub fn record_http_request(&self, route: &str, status: u16) {
        *self
            .http_requests
            .lock()
            .entry((route.to_string(), status))
            .or_insert(0) += 1;
    }

    pub fn http_request_started(&self) {
        self.http_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_request_finished(&self) {
        // Never wraps below zero even if calls are unbalanced.
        let _ = self
            .http_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_coalesced: self.tasks_coalesced.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            timeouts: TimeoutReason::ALL
                .iter()
                .map(|reason| {
                    let count = self.timeouts[timeout_slot(*reason)].load(Ordering::Relaxed);
                    (*reason, count)
                })
                .collect(),
            services: self.services.lock().clone(),
            http_requests: self.http_requests.lock().clone(),
            http_active: self.http_active.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition of every series.
    pub fn render_prometheus(&self, cache_size: usize) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        counter(
            &mut out,
            "aggregator_cache_hits_total",
            "Cache lookups answered from the cache",
            snap.cache_hits,
        );
        counter(
            &mut out,
            "aggregator_cache_miss_total",
            "Cache lookups that missed",
            snap.cache_misses,
        );
        counter(
            &mut out,
            "aggregator_tasks_submitted_total",
            "Fetch tasks accepted by the queue",
            snap.tasks_submitted,
        );
        counter(
            &mut out,
            "aggregator_tasks_coalesced_total",
            "Requests that joined an in-flight task",
            snap.tasks_coalesced,
        );
        counter(
            &mut out,
            "aggregator_overloaded_total",
            "Requests refused because the queue was full",
            snap.overloaded,
        );

        header(&mut out, "aggregator_timeouts_total", "counter", "Requests whose deadline elapsed");
        for (reason, count) in &snap.timeouts {
            let _ = writeln!(out, "aggregator_timeouts_total{{reason=\"{reason}\"}} {count}");
        }

        header(&mut out, "weather_service_calls_total", "counter", "Provider forecast calls");
        for (service, counters) in &snap.services {
            let _ = writeln!(
                out,
                "weather_service_calls_total{{service=\"{service}\"}} {}",
                counters.calls
            );
        }
        header(
            &mut out,
            "weather_service_errors_total",
            "counter",
            "Provider forecast calls that failed",
        );
        for (service, counters) in &snap.services {
            let _ = writeln!(
                out,
                "weather_service_errors_total{{service=\"{service}\"}} {}",
                counters.errors
            );
        }

        header(&mut out, "aggregator_cache_size", "gauge", "Entries currently cached");
        let _ = writeln!(out, "aggregator_cache_size {cache_size}");

        header(&mut out, "http_requests_total", "counter", "HTTP requests by route and status");
        for ((route, status), count) in &snap.http_requests {
            let _ = writeln!(
                out,
                "http_requests_total{{route=\"{route}\",status=\"{status}\"}} {count}"
            );
        }

        header(&mut out, "http_active_requests", "gauge", "HTTP requests currently being served");
        let _ = writeln!(out, "http_active_requests {}", snap.http_active);

        out
    }
}

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    header(out, name, "counter", help);
    let _ = writeln!(out, "{name} {value}");
}
