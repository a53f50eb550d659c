//! Reference service handlers: echo, time, calc, and the stats service.

use crate::config::HostConfig;
use crate::registry::{HandlerError, HandlerResult, RegistryError, Service, ServiceRegistry};
use crate::stats::{ServiceStats, StatsLedger};
use crate::worker_pool::WorkerPool;
use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::json;
use shared::{Request, ServiceTag};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Replies with the request data prefixed by `ECHO: `.
pub struct EchoService {
    port: u16,
}

impl EchoService {
    pub fn new(port: u16) -> EchoService {
        EchoService { port }
    }
}

impl Service for EchoService {
    fn tag(&self) -> ServiceTag {
        ServiceTag::Echo
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn handle<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, HandlerResult> {
        async move { Ok(format!("ECHO: {}", req.data_as_text()).into_bytes()) }.boxed()
    }
}

/// Replies with the current instant, RFC 3339 by default or Unix seconds for
/// the `UNIX` command. A request without a command (including the tolerant
/// plain-text path) gets the RFC 3339 form.
pub struct TimeService {
    port: u16,
}

impl TimeService {
    pub fn new(port: u16) -> TimeService {
        TimeService { port }
    }
}

impl Service for TimeService {
    fn tag(&self) -> ServiceTag {
        ServiceTag::Time
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn handle<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, HandlerResult> {
        async move {
            let now = Utc::now();
            let text = if req.command == "UNIX" {
                format!("Unix timestamp: {}", now.timestamp())
            } else {
                format!("Current time: {}", now.to_rfc3339())
            };
            Ok(text.into_bytes())
        }
        .boxed()
    }
}

/// Evaluates `<lhs> <op> <rhs>` over IEEE-754 doubles.
pub struct CalcService {
    port: u16,
}

impl CalcService {
    pub fn new(port: u16) -> CalcService {
        CalcService { port }
    }

    fn evaluate(input: &str) -> Result<String, HandlerError> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(HandlerError::new("usage: <num1> <op> <num2>"));
        }

        let lhs = parts[0].parse::<f64>();
        let rhs = parts[2].parse::<f64>();
        let (lhs, rhs) = match (lhs, rhs) {
            (Ok(lhs), Ok(rhs)) => (lhs, rhs),
            _ => return Err(HandlerError::new("invalid numbers")),
        };

        let op = parts[1];
        let result = match op {
            "+" => lhs + rhs,
            "-" => lhs - rhs,
            "*" => lhs * rhs,
            "/" => {
                if rhs == 0.0 {
                    return Err(HandlerError::new("division by zero"));
                }
                lhs / rhs
            }
            other => {
                return Err(HandlerError::new(format!("unsupported operator: {}", other)));
            }
        };

        Ok(format!("{:.2} {} {:.2} = {:.2}", lhs, op, rhs, result))
    }
}

impl Service for CalcService {
    fn tag(&self) -> ServiceTag {
        ServiceTag::Calc
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn handle<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, HandlerResult> {
        async move { Self::evaluate(&req.data_as_text()).map(String::into_bytes) }.boxed()
    }
}

const STATS_HELP: &str = "Stats Service Commands:\n\
ALL - Show statistics for all services\n\
SERVICE <service_name> - Show statistics for specific service\n\
POOL - Show worker pool statistics\n\
HELP - Show this help message\n\n\
Available services: echo, time, calc, stats";

/// Snapshots the statistics ledger and the worker pool.
///
/// Output is pretty-printed JSON over ordered maps, so repeated calls against
/// unchanged counters serialize identically.
pub struct StatsService {
    port: u16,
    ledger: Arc<StatsLedger>,
    pool: WorkerPool,
}

impl StatsService {
    pub fn new(port: u16, ledger: Arc<StatsLedger>, pool: WorkerPool) -> StatsService {
        StatsService { port, ledger, pool }
    }

    fn record_value(stats: &ServiceStats) -> serde_json::Value {
        json!({
            "received": stats.received,
            "processed": stats.processed,
            "errors": stats.errors,
            "avg_latency_ms": stats.avg_latency.as_secs_f64() * 1000.0,
            "last_seen": stats.last_seen.map(|t| t.to_rfc3339()),
        })
    }

    fn all_stats(&self) -> HandlerResult {
        let snapshot = self.ledger.snapshot();
        let report: BTreeMap<String, serde_json::Value> = snapshot
            .iter()
            .map(|(tag, stats)| (tag.to_string(), Self::record_value(stats)))
            .collect();
        encode_report(&report)
    }

    fn service_stats(&self, name: &str) -> HandlerResult {
        let tag: ServiceTag = name
            .trim()
            .parse()
            .map_err(|_| HandlerError::new(format!("service {} not found", name.trim())))?;
        let stats = self
            .ledger
            .snapshot_tag(tag)
            .ok_or_else(|| HandlerError::new(format!("service {} not found", tag)))?;

        let mut report = BTreeMap::new();
        report.insert("service".to_string(), json!(tag.to_string()));
        if let serde_json::Value::Object(fields) = Self::record_value(&stats) {
            for (key, value) in fields {
                report.insert(key, value);
            }
        }
        encode_report(&report)
    }

    fn pool_stats(&self) -> HandlerResult {
        let state = self.pool.stats();
        let report: BTreeMap<&str, serde_json::Value> = BTreeMap::from([
            ("min", json!(state.min)),
            ("max", json!(state.max)),
            ("current", json!(state.current)),
            ("active", json!(state.active)),
            ("queued", json!(state.queued)),
            ("completed", json!(state.completed)),
        ]);
        encode_report(&report)
    }
}

fn encode_report<T: serde::Serialize>(report: &T) -> HandlerResult {
    serde_json::to_vec_pretty(report)
        .map_err(|err| HandlerError::new(format!("failed to encode stats: {}", err)))
}

impl Service for StatsService {
    fn tag(&self) -> ServiceTag {
        ServiceTag::Stats
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn handle<'a>(&'a self, req: &'a Request) -> BoxFuture<'a, HandlerResult> {
        async move {
            match req.command.as_str() {
                "ALL" => self.all_stats(),
                "SERVICE" => self.service_stats(&req.data_as_text()),
                "POOL" => self.pool_stats(),
                "HELP" => Ok(STATS_HELP.as_bytes().to_vec()),
                other => Err(HandlerError::new(format!("unknown command: {}", other))),
            }
        }
        .boxed()
    }
}

/// Installs the default handler set for every endpoint present in the
/// configuration, wiring the stats service to the ledger and the pool.
pub fn install_default_services(
    registry: &ServiceRegistry,
    config: &HostConfig,
    ledger: Arc<StatsLedger>,
    pool: WorkerPool,
) -> Result<(), RegistryError> {
    if let Some(endpoint) = config.endpoints.get(&ServiceTag::Echo) {
        registry.register(Arc::new(EchoService::new(endpoint.port)))?;
    }
    if let Some(endpoint) = config.endpoints.get(&ServiceTag::Time) {
        registry.register(Arc::new(TimeService::new(endpoint.port)))?;
    }
    if let Some(endpoint) = config.endpoints.get(&ServiceTag::Calc) {
        registry.register(Arc::new(CalcService::new(endpoint.port)))?;
    }
    if let Some(endpoint) = config.endpoints.get(&ServiceTag::Stats) {
        registry.register(Arc::new(StatsService::new(endpoint.port, ledger, pool)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_pool::PoolConfig;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    fn request(command: &str, data: &str) -> Request {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        Request {
            id: "test".to_string(),
            command: command.to_string(),
            data: data.as_bytes().to_vec(),
            client_addr: addr,
            received_at: Instant::now(),
        }
    }

    fn text(result: HandlerResult) -> String {
        String::from_utf8(result.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn echo_prefixes_the_payload() {
        let service = EchoService::new(8081);
        let reply = text(service.handle(&request("", "hi")).await);
        assert_eq!(reply, "ECHO: hi");
    }

    #[tokio::test]
    async fn time_unix_returns_decimal_seconds() {
        let service = TimeService::new(8082);
        let reply = text(service.handle(&request("UNIX", "")).await);

        let rest = reply.strip_prefix("Unix timestamp: ").unwrap();
        let seconds: i64 = rest.parse().unwrap();
        assert!((seconds - Utc::now().timestamp()).abs() <= 1);
    }

    #[tokio::test]
    async fn time_defaults_to_rfc3339() {
        let service = TimeService::new(8082);
        let reply = text(service.handle(&request("", "")).await);

        let rest = reply.strip_prefix("Current time: ").unwrap();
        chrono::DateTime::parse_from_rfc3339(rest).unwrap();
    }

    #[tokio::test]
    async fn calc_formats_two_decimal_places() {
        let service = CalcService::new(8084);
        let reply = text(service.handle(&request("", "5 * 10")).await);
        assert_eq!(reply, "5.00 * 10.00 = 50.00");
    }

    #[tokio::test]
    async fn calc_handles_every_operator() {
        let service = CalcService::new(8084);
        let cases = [
            ("1 + 2", "1.00 + 2.00 = 3.00"),
            ("5 - 1.5", "5.00 - 1.50 = 3.50"),
            ("9 / 3", "9.00 / 3.00 = 3.00"),
        ];
        for (input, expected) in cases {
            let reply = text(service.handle(&request("", input)).await);
            assert_eq!(reply, expected);
        }
    }

    #[tokio::test]
    async fn calc_error_texts() {
        let service = CalcService::new(8084);
        let cases = [
            ("5 *", "usage: <num1> <op> <num2>"),
            ("a * b", "invalid numbers"),
            ("1 % 2", "unsupported operator: %"),
            ("1 / 0", "division by zero"),
        ];
        for (input, expected) in cases {
            let err = service.handle(&request("", input)).await.unwrap_err();
            assert_eq!(err.to_string(), expected, "input: {}", input);
        }
    }

    fn stats_service() -> (StatsService, Arc<StatsLedger>) {
        let ledger = Arc::new(StatsLedger::new());
        let pool = WorkerPool::new(PoolConfig::default());
        (StatsService::new(8085, Arc::clone(&ledger), pool), ledger)
    }

    #[tokio::test]
    async fn stats_all_lists_every_registered_tag() {
        let (service, ledger) = stats_service();
        for tag in ServiceTag::all() {
            ledger.register(tag);
        }
        ledger.record_received(ServiceTag::Echo);
        ledger.record_processed(ServiceTag::Echo, Duration::from_millis(2));

        let reply = text(service.handle(&request("ALL", "")).await);
        let report: serde_json::Value = serde_json::from_str(&reply).unwrap();

        for tag in ServiceTag::all() {
            assert!(report.get(tag.as_str()).is_some(), "missing {}", tag);
        }
        assert_eq!(report["echo"]["received"], 1);
        assert_eq!(report["echo"]["processed"], 1);
    }

    #[tokio::test]
    async fn stats_service_command_reports_one_tag() {
        let (service, ledger) = stats_service();
        ledger.record_received(ServiceTag::Calc);
        ledger.record_error(ServiceTag::Calc);

        let reply = text(service.handle(&request("SERVICE", "calc")).await);
        let report: serde_json::Value = serde_json::from_str(&reply).unwrap();

        assert_eq!(report["service"], "calc");
        assert_eq!(report["received"], 1);
        assert_eq!(report["errors"], 1);
    }

    #[tokio::test]
    async fn stats_service_command_rejects_unknown_tag() {
        let (service, _ledger) = stats_service();
        let err = service.handle(&request("SERVICE", "file")).await.unwrap_err();
        assert_eq!(err.to_string(), "service file not found");
    }

    #[tokio::test]
    async fn stats_pool_reports_the_real_snapshot() {
        let (service, _ledger) = stats_service();
        let reply = text(service.handle(&request("POOL", "")).await);
        let report: serde_json::Value = serde_json::from_str(&reply).unwrap();

        assert_eq!(report["min"], 5);
        assert_eq!(report["max"], 50);
        assert_eq!(report["current"], 0);
        assert_eq!(report["active"], 0);
        assert_eq!(report["queued"], 0);
        assert_eq!(report["completed"], 0);
    }

    #[tokio::test]
    async fn stats_help_and_unknown_command() {
        let (service, _ledger) = stats_service();

        let help = text(service.handle(&request("HELP", "")).await);
        assert!(help.contains("Stats Service Commands"));

        let err = service.handle(&request("FLUSH", "")).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown command: FLUSH");
    }

    #[tokio::test]
    async fn stats_output_is_stable_between_identical_calls() {
        let (service, ledger) = stats_service();
        for tag in ServiceTag::all() {
            ledger.register(tag);
        }
        ledger.record_processed(ServiceTag::Time, Duration::from_millis(3));

        let first = text(service.handle(&request("ALL", "")).await);
        let second = text(service.handle(&request("ALL", "")).await);
        assert_eq!(first, second);
    }

    #[test]
    fn install_wires_every_default_service() {
        let config = HostConfig::default();
        let registry = ServiceRegistry::new();
        let ledger = Arc::new(StatsLedger::new());
        let pool = WorkerPool::new(config.pool.clone());

        install_default_services(&registry, &config, ledger, pool).unwrap();

        for tag in ServiceTag::all() {
            let expected = config.endpoints[&tag].port;
            assert_eq!(registry.port_of(tag), Some(expected));
        }
    }
}
