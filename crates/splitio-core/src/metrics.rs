use core::time::Duration;
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::status::IoStatus;

#[derive(Default)]
struct Stat {
    count: AtomicU64,
    bytes: AtomicU64,
    total_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Stat {
    const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            max_ns: AtomicU64::new(0),
        }
    }

    fn observe(&self, bytes: u64, dur: Duration) {
        let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        let total_ns = self.total_ns.load(Ordering::Relaxed);
        let max_ns = self.max_ns.load(Ordering::Relaxed);
        let avg_ns = if count == 0 {
            0.0
        } else {
            total_ns as f64 / count as f64
        };
        StatSnapshot {
            count,
            bytes,
            avg_ns,
            max_ns,
        }
    }
}

static SUB_OPS: Stat = Stat::new();
static SUB_OP_FAILURES: AtomicU64 = AtomicU64::new(0);
static REQUESTS: AtomicU64 = AtomicU64::new(0);
static INFLIGHT: AtomicI64 = AtomicI64::new(0);
static MAX_INFLIGHT: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Default)]
pub struct StatSnapshot {
    pub count: u64,
    pub bytes: u64,
    pub avg_ns: f64,
    pub max_ns: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub sub_ops: StatSnapshot,
    pub sub_op_failures: u64,
    pub requests: u64,
    pub max_inflight: u64,
}

pub fn record_request() {
    counter!("splitio_request_count").increment(1);
    REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_submitted() {
    let inflight = INFLIGHT.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!("splitio_inflight_sub_ops").set(inflight as f64);
    MAX_INFLIGHT.fetch_max(inflight.max(0) as u64, Ordering::Relaxed);
}

pub fn observe_sub_op(bytes: u64, dur: Duration, outcome: IoStatus) {
    let ns = dur.as_nanos().min(u64::MAX as u128) as u64;
    let inflight = INFLIGHT.fetch_sub(1, Ordering::Relaxed) - 1;
    gauge!("splitio_inflight_sub_ops").set(inflight as f64);
    counter!("splitio_sub_op_count").increment(1);
    counter!("splitio_sub_op_bytes").increment(bytes);
    histogram!("splitio_sub_op_latency_ns").record(ns as f64);
    if outcome.is_failure() {
        counter!("splitio_sub_op_failures").increment(1);
        SUB_OP_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
    SUB_OPS.observe(bytes, dur);
}

/// Process-wide totals since start-up.
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        sub_ops: SUB_OPS.snapshot(),
        sub_op_failures: SUB_OP_FAILURES.load(Ordering::Relaxed),
        requests: REQUESTS.load(Ordering::Relaxed),
        max_inflight: MAX_INFLIGHT.load(Ordering::Relaxed),
    }
}
