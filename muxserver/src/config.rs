//! Resolved runtime configuration for the stream multiplexer.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MuxConfig {
    pub host: String,
    pub port: u16,
    /// Connections past this count are closed at accept.
    pub max_clients: usize,
    /// Estimated client round trip; the interactive budget is ten times this.
    pub ping_timeout: Duration,
    /// Fallback per-connection chunk size when no ping estimate is available.
    pub chunk_size: usize,
    /// Readiness wait timeout; an empty wake runs the idle sweep.
    pub select_timeout: Duration,
    /// Sessions idle longer than this are evicted.
    pub idle_timeout: Duration,
}

impl MuxConfig {
    /// Soft latency target for interactive commands.
    pub fn interactive_budget(&self) -> Duration {
        self.ping_timeout * 10
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        MuxConfig {
            host: "localhost".to_string(),
            port: 8080,
            max_clients: 1000,
            ping_timeout: Duration::from_millis(10),
            chunk_size: 512,
            select_timeout: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(300),
        }
    }
}
