//! Integration tests for the datagram service host.
//!
//! These tests run a real host on ephemeral loopback ports and drive it over
//! actual UDP sockets.

use server::client::UdpServiceClient;
use server::config::HostConfig;
use server::network::UdpHost;
use server::registry::{RegistryError, ServiceRegistry};
use server::services::{install_default_services, EchoService, TimeService};
use server::stats::StatsLedger;
use server::worker_pool::{PoolConfig, WorkerPool};
use shared::ServiceTag;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Reserves a distinct loopback port by briefly binding it.
fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .expect("failed to bind probe socket")
        .local_addr()
        .expect("probe socket has no address")
        .port()
}

fn test_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.pool = PoolConfig {
        min_workers: 2,
        max_workers: 8,
        queue_capacity: 64,
        idle_timeout: Duration::from_secs(5),
        expand_threshold: 0.8,
    };
    for endpoint in config.endpoints.values_mut() {
        endpoint.port = free_port();
    }
    config
}

async fn start_host() -> (UdpHost, HashMap<ServiceTag, SocketAddr>) {
    let config = test_config();
    let ledger = Arc::new(StatsLedger::new());
    let pool = WorkerPool::new(config.pool.clone());
    let registry = Arc::new(ServiceRegistry::new());
    install_default_services(&registry, &config, Arc::clone(&ledger), pool.clone())
        .expect("default services must register");

    let host = UdpHost::new(config, registry, pool, ledger);
    host.start().await.expect("host must start");

    let addrs = ServiceTag::all()
        .iter()
        .map(|tag| (*tag, host.local_addr(*tag).expect("endpoint bound")))
        .collect();
    (host, addrs)
}

/// END-TO-END SERVICE SCENARIOS
mod service_tests {
    use super::*;

    #[tokio::test]
    async fn echo_happy_path() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Echo], "1", "", "hi")
            .await
            .unwrap();

        assert_eq!(reply.id, "1");
        assert_eq!(reply.service, "echo");
        assert_eq!(reply.data, "ECHO: hi");
        assert!(reply.error.is_none());

        host.stop().await;
    }

    #[tokio::test]
    async fn time_unix_returns_decimal_seconds() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Time], "2", "UNIX", "")
            .await
            .unwrap();

        let rest = reply
            .data
            .strip_prefix("Unix timestamp: ")
            .expect("unexpected time format");
        assert!(!rest.is_empty());
        assert!(rest.bytes().all(|b| b.is_ascii_digit()));

        host.stop().await;
    }

    #[tokio::test]
    async fn calc_multiplication() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Calc], "3", "", "5 * 10")
            .await
            .unwrap();

        assert_eq!(reply.data, "5.00 * 10.00 = 50.00");
        assert!(reply.error.is_none());

        host.stop().await;
    }

    #[tokio::test]
    async fn calc_division_by_zero_is_an_error_reply() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Calc], "4", "", "1 / 0")
            .await
            .unwrap();

        assert!(reply.data.is_empty());
        let error = reply.error.expect("expected an error reply");
        assert!(error.contains("division by zero"));

        host.stop().await;
    }

    #[tokio::test]
    async fn plain_text_body_is_tolerated() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        let reply = client
            .send_raw(addrs[&ServiceTag::Echo], b"just some text")
            .await
            .unwrap();

        assert_eq!(reply.data, "ECHO: just some text");
        // The id was server-generated.
        assert!(!reply.id.is_empty());

        host.stop().await;
    }
}

/// STATS SERVICE SCENARIOS
mod stats_tests {
    use super::*;

    #[tokio::test]
    async fn service_stats_reflect_an_echo_exchange() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        client
            .send_request(addrs[&ServiceTag::Echo], "1", "", "hi")
            .await
            .unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Stats], "5", "SERVICE", "echo")
            .await
            .unwrap();
        assert!(reply.error.is_none());

        let report: serde_json::Value = serde_json::from_str(&reply.data).unwrap();
        assert_eq!(report["service"], "echo");
        assert!(report["received"].as_u64().unwrap() >= 1);
        assert!(report["processed"].as_u64().unwrap() >= 1);
        assert_eq!(report["errors"].as_u64().unwrap(), 0);

        host.stop().await;
    }

    #[tokio::test]
    async fn pool_stats_report_the_live_snapshot() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Stats], "6", "POOL", "")
            .await
            .unwrap();

        let report: serde_json::Value = serde_json::from_str(&reply.data).unwrap();
        assert_eq!(report["min"].as_u64().unwrap(), 2);
        assert_eq!(report["max"].as_u64().unwrap(), 8);
        let current = report["current"].as_u64().unwrap();
        assert!((2..=8).contains(&current));
        // The stats request itself is in flight while the snapshot is taken.
        assert!(report["active"].as_u64().unwrap() >= 1);

        host.stop().await;
    }

    #[tokio::test]
    async fn all_stats_cover_every_service_and_errors_are_counted() {
        let (host, addrs) = start_host().await;
        let client = UdpServiceClient::new().await.unwrap();

        client
            .send_request(addrs[&ServiceTag::Calc], "7", "", "1 / 0")
            .await
            .unwrap();

        let reply = client
            .send_request(addrs[&ServiceTag::Stats], "8", "ALL", "")
            .await
            .unwrap();
        let report: serde_json::Value = serde_json::from_str(&reply.data).unwrap();

        for tag in ServiceTag::all() {
            assert!(report.get(tag.as_str()).is_some(), "missing {}", tag);
        }
        assert!(report["calc"]["errors"].as_u64().unwrap() >= 1);

        host.stop().await;
    }
}

/// CONFIGURATION AND LIFECYCLE SCENARIOS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn registry_port_collision_prevents_startup() {
        let registry = ServiceRegistry::new();
        let port = free_port();
        registry
            .register(Arc::new(EchoService::new(port)))
            .unwrap();

        let err = registry
            .register(Arc::new(TimeService::new(port)))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicatePort(port, ServiceTag::Echo));
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal_at_startup() {
        let mut config = test_config();
        // Occupy the echo port so the host cannot bind it.
        let blocker = std::net::UdpSocket::bind((
            "127.0.0.1",
            config.endpoints[&ServiceTag::Echo].port,
        ));
        let blocker = match blocker {
            Ok(socket) => socket,
            // The probe port got raced away; grab it directly instead.
            Err(_) => {
                let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
                config.endpoints.get_mut(&ServiceTag::Echo).unwrap().port =
                    socket.local_addr().unwrap().port();
                socket
            }
        };

        let ledger = Arc::new(StatsLedger::new());
        let pool = WorkerPool::new(config.pool.clone());
        let registry = Arc::new(ServiceRegistry::new());
        install_default_services(&registry, &config, Arc::clone(&ledger), pool.clone()).unwrap();

        let host = UdpHost::new(config, registry, pool, ledger);
        assert!(host.start().await.is_err());

        drop(blocker);
        host.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_every_listener_and_worker() {
        let (host, addrs) = start_host().await;

        let client = UdpServiceClient::new().await.unwrap();
        client
            .send_request(addrs[&ServiceTag::Echo], "1", "", "warmup")
            .await
            .unwrap();

        host.stop().await;

        // Listener ports are free again.
        for addr in addrs.values() {
            std::net::UdpSocket::bind(addr)
                .unwrap_or_else(|err| panic!("port {} still held after stop: {}", addr, err));
        }

        // No worker picks up a request anymore.
        let mut quiet = UdpServiceClient::new().await.unwrap();
        quiet.set_timeout(Duration::from_millis(300));
        assert!(quiet
            .send_request(addrs[&ServiceTag::Echo], "2", "", "anyone home")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn disabled_endpoint_is_not_bound() {
        let mut config = test_config();
        config.endpoints.get_mut(&ServiceTag::Calc).unwrap().enabled = false;

        let ledger = Arc::new(StatsLedger::new());
        let pool = WorkerPool::new(config.pool.clone());
        let registry = Arc::new(ServiceRegistry::new());
        install_default_services(&registry, &config, Arc::clone(&ledger), pool.clone()).unwrap();

        let host = UdpHost::new(config, registry, pool, ledger);
        host.start().await.unwrap();

        assert!(host.local_addr(ServiceTag::Calc).is_none());
        assert!(host.local_addr(ServiceTag::Echo).is_some());

        host.stop().await;
    }

    #[tokio::test]
    async fn concurrent_requests_are_all_answered() {
        let (host, addrs) = start_host().await;
        let echo_addr = addrs[&ServiceTag::Echo];

        let mut tasks = Vec::new();
        for i in 0..16 {
            tasks.push(tokio::spawn(async move {
                let client = UdpServiceClient::new().await.unwrap();
                let payload = format!("msg-{}", i);
                let reply = client
                    .send_request(echo_addr, &i.to_string(), "", &payload)
                    .await
                    .unwrap();
                assert_eq!(reply.data, format!("ECHO: {}", payload));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let ledger = host.ledger();
        let stats = ledger.snapshot_tag(ServiceTag::Echo).unwrap();
        assert!(stats.received >= 16);
        assert!(stats.processed >= 16);

        host.stop().await;
    }
}
