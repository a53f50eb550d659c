//! Per-service statistics ledger.
//!
//! One record per service tag, guarded by a mutex with small critical
//! sections. Snapshot reads copy whole records, so observers always see a
//! consistent view of a single tag; no cross-tag atomicity is promised.

use chrono::{DateTime, Utc};
use shared::ServiceTag;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Counters for one service. All counters are monotonic; `avg_latency` is an
/// incremental mean over `processed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub received: u64,
    pub processed: u64,
    pub errors: u64,
    pub avg_latency: Duration,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct StatsLedger {
    records: Mutex<HashMap<ServiceTag, ServiceStats>>,
}

impl StatsLedger {
    pub fn new() -> StatsLedger {
        StatsLedger::default()
    }

    /// Creates the record for a tag so snapshots list it from the start.
    pub fn register(&self, tag: ServiceTag) {
        self.lock().entry(tag).or_default();
    }

    /// Counts an accepted datagram and stamps the receive time.
    pub fn record_received(&self, tag: ServiceTag) {
        let mut records = self.lock();
        let record = records.entry(tag).or_default();
        record.received += 1;
        record.last_seen = Some(Utc::now());
    }

    /// Counts a successful handling and folds the latency into the running
    /// mean: `avg' = (avg * processed + latency) / (processed + 1)`.
    pub fn record_processed(&self, tag: ServiceTag, latency: Duration) {
        let mut records = self.lock();
        let record = records.entry(tag).or_default();
        let total = record.avg_latency.as_nanos() * record.processed as u128 + latency.as_nanos();
        record.processed += 1;
        record.avg_latency = Duration::from_nanos((total / record.processed as u128) as u64);
    }

    /// Counts a failure: admission, handler error, or timeout. At most one
    /// outcome (processed or error) is recorded per accepted datagram.
    pub fn record_error(&self, tag: ServiceTag) {
        self.lock().entry(tag).or_default().errors += 1;
    }

    pub fn snapshot(&self) -> HashMap<ServiceTag, ServiceStats> {
        self.lock().clone()
    }

    pub fn snapshot_tag(&self, tag: ServiceTag) -> Option<ServiceStats> {
        self.lock().get(&tag).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceTag, ServiceStats>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
