//! Loop-level statistics for the stream multiplexer.

use serde::Serialize;

/// Counters maintained by the readiness loop. All totals are monotonic;
/// `active_sessions` tracks the session table size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStats {
    pub total_connections: u64,
    pub active_sessions: usize,
    pub rejected_connections: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub poll_calls: u64,
    pub events_processed: u64,
    pub commands_processed: u64,
    /// Interactive commands that overran the latency budget (soft warnings).
    pub slow_interactive: u64,
    pub idle_evictions: u64,
}

impl LoopStats {
    /// Single-line JSON rendering, stable for a given state.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
