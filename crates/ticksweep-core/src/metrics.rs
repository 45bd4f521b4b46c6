//! Run-scoped throughput accounting.
//!
//! Counters are plain atomics; a [`MetricsSnapshot`] is always derived from
//! them on demand, never stored, so readers cannot drift from writers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::FailReason;

/// Thread-safe counters for one acquisition run.
#[derive(Debug)]
pub struct MetricsCollector {
    run_id: Uuid,
    total: u64,
    started: Instant,
    succeeded: AtomicU64,
    missed_rate_limited: AtomicU64,
    missed_proxy_error: AtomicU64,
    missed_no_data: AtomicU64,
    missed_timeout: AtomicU64,
    rate_limit_hits: AtomicU64,
    persist_errors: AtomicU64,
}

impl MetricsCollector {
    pub fn new(total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            total: total as u64,
            started: Instant::now(),
            succeeded: AtomicU64::new(0),
            missed_rate_limited: AtomicU64::new(0),
            missed_proxy_error: AtomicU64::new(0),
            missed_no_data: AtomicU64::new(0),
            missed_timeout: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            persist_errors: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, reason: FailReason) {
        let counter = match reason {
            FailReason::RateLimited => &self.missed_rate_limited,
            FailReason::ProxyError => &self.missed_proxy_error,
            FailReason::NoData => &self.missed_no_data,
            FailReason::Timeout => &self.missed_timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Per-attempt throttle incidence; independent of terminal outcomes.
    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Derived, read-only view. Safe to call from any thread concurrently
    /// with writers.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let by_reason = FailureBreakdown {
            rate_limited: self.missed_rate_limited.load(Ordering::Relaxed),
            proxy_error: self.missed_proxy_error.load(Ordering::Relaxed),
            no_data: self.missed_no_data.load(Ordering::Relaxed),
            timeout: self.missed_timeout.load(Ordering::Relaxed),
        };
        let failed = by_reason.total();
        let processed = succeeded + failed;
        let elapsed = self.started.elapsed();

        let throughput_per_sec = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let remaining = self.total.saturating_sub(processed);
        let eta_seconds = if throughput_per_sec > 0.0 {
            remaining as f64 / throughput_per_sec
        } else {
            f64::INFINITY
        };

        let success_rate = if processed > 0 {
            succeeded as f64 / processed as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            run_id: self.run_id,
            elapsed,
            total: self.total,
            processed,
            succeeded,
            failed,
            by_reason,
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            success_rate,
            throughput_per_sec,
            eta_seconds,
        }
    }
}

/// Terminal failures broken down by reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureBreakdown {
    pub rate_limited: u64,
    pub proxy_error: u64,
    pub no_data: u64,
    pub timeout: u64,
}

impl FailureBreakdown {
    pub const fn total(&self) -> u64 {
        self.rate_limited + self.proxy_error + self.no_data + self.timeout
    }
}

/// Point-in-time view of a run. `eta_seconds` is `+∞` while the observed
/// rate is zero.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub run_id: Uuid,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub by_reason: FailureBreakdown,
    pub rate_limit_hits: u64,
    pub persist_errors: u64,
    pub success_rate: f64,
    pub throughput_per_sec: f64,
    pub eta_seconds: f64,
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
