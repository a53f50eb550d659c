//! Resolved runtime configuration for the datagram service host.
//!
//! Only the resolved records live here; loading them from files or flags is
//! the front-end's concern. Endpoints are immutable after registration.

use crate::worker_pool::PoolConfig;
use shared::ServiceTag;
use std::collections::HashMap;
use std::time::Duration;

/// Socket-level settings shared by every endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hostname or address every service binds on.
    pub host: String,
    /// Requested kernel receive buffer size, best effort.
    pub read_buffer: usize,
    /// Requested kernel send buffer size, best effort.
    pub write_buffer: usize,
    /// Upper bound on a single inbound datagram.
    pub max_datagram_size: usize,
    /// How long a receive loop may sit idle between datagrams.
    pub idle_timeout: Duration,
    /// How long `stop` waits for in-flight work before giving up.
    pub shutdown_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "localhost".to_string(),
            read_buffer: 4096,
            write_buffer: 4096,
            max_datagram_size: 64 * 1024,
            idle_timeout: Duration::from_secs(60),
            shutdown_deadline: Duration::from_secs(5),
        }
    }
}

/// Per-service endpoint record.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub port: u16,
    /// A disabled endpoint is never bound.
    pub enabled: bool,
    /// Carried from the resolved configuration; not enforced by the host.
    pub max_concurrent_requests: u32,
    /// Per-request handler deadline.
    pub deadline: Duration,
}

/// The complete resolved configuration for one host instance.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub endpoints: HashMap<ServiceTag, EndpointConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            ServiceTag::Echo,
            EndpointConfig {
                port: 8081,
                enabled: true,
                max_concurrent_requests: 1000,
                deadline: Duration::from_secs(5),
            },
        );
        endpoints.insert(
            ServiceTag::Time,
            EndpointConfig {
                port: 8082,
                enabled: true,
                max_concurrent_requests: 1000,
                deadline: Duration::from_secs(5),
            },
        );
        endpoints.insert(
            ServiceTag::Calc,
            EndpointConfig {
                port: 8084,
                enabled: true,
                max_concurrent_requests: 1000,
                deadline: Duration::from_secs(10),
            },
        );
        endpoints.insert(
            ServiceTag::Stats,
            EndpointConfig {
                port: 8085,
                enabled: true,
                max_concurrent_requests: 100,
                deadline: Duration::from_secs(5),
            },
        );

        HostConfig {
            server: ServerConfig::default(),
            pool: PoolConfig::default(),
            endpoints,
        }
    }
}
