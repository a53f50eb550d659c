//! Datagram host: one UDP endpoint per enabled service, fanned out onto the
//! worker pool.
//!
//! Each enabled endpoint gets its own socket and receive loop. Datagrams
//! become independent tasks; the per-request deadline, envelope tolerance,
//! and reply framing all live in the task so a slow handler never stalls the
//! receive path. Shutdown is staged: stop accepting (receive loops exit),
//! stop submitting (the pool refuses), then drain running work under a
//! deadline.

use crate::config::HostConfig;
use crate::registry::{Service, ServiceRegistry};
use crate::stats::StatsLedger;
use crate::worker_pool::{PoolError, WorkerPool};
use log::{debug, error, info, warn};
use shared::{resolve_addr, Request, Response, ServiceTag};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot resolve listen address {addr}: {source}")]
    Resolve {
        addr: String,
        source: std::io::Error,
    },
    #[error("failed to bind {tag} endpoint on {addr}: {source}")]
    Bind {
        tag: ServiceTag,
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// The multi-port UDP service host.
///
/// Owns the listening endpoints and the statistics ledger; handlers are
/// borrowed from the registry, which stays read-only while the host runs.
pub struct UdpHost {
    config: HostConfig,
    registry: Arc<ServiceRegistry>,
    pool: WorkerPool,
    ledger: Arc<StatsLedger>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    local_addrs: Mutex<HashMap<ServiceTag, SocketAddr>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpHost {
    pub fn new(
        config: HostConfig,
        registry: Arc<ServiceRegistry>,
        pool: WorkerPool,
        ledger: Arc<StatsLedger>,
    ) -> UdpHost {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        UdpHost {
            config,
            registry,
            pool,
            ledger,
            shutdown_tx,
            shutdown_rx,
            local_addrs: Mutex::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Starts the pool and one receive loop per enabled endpoint.
    ///
    /// A bind failure is fatal: the host refuses to start. An endpoint whose
    /// handler is missing from the registry is skipped with a warning.
    pub async fn start(&self) -> Result<(), HostError> {
        self.pool.start();

        let mut endpoints: Vec<_> = self.config.endpoints.iter().collect();
        endpoints.sort_by_key(|(tag, _)| **tag);

        let mut started = 0usize;
        for (tag, endpoint) in endpoints {
            if !endpoint.enabled {
                debug!("service {} disabled, not binding", tag);
                continue;
            }
            let Some(service) = self.registry.lookup_by_tag(*tag) else {
                warn!("service {} not found in registry, skipping", tag);
                continue;
            };

            let (socket, local_addr) = self.bind_endpoint(*tag, endpoint.port)?;

            self.ledger.register(*tag);
            lock_map(&self.local_addrs).insert(*tag, local_addr);

            let runtime = EndpointRuntime {
                tag: *tag,
                deadline: endpoint.deadline,
                socket: Arc::new(socket),
                service,
                pool: self.pool.clone(),
                ledger: Arc::clone(&self.ledger),
                max_datagram: self.config.server.max_datagram_size,
            };
            let handle = tokio::spawn(receive_loop(runtime, self.shutdown_rx.clone()));
            lock_vec(&self.loops).push(handle);

            info!("Started service {} on {}", tag, local_addr);
            started += 1;
        }

        info!("UDP service host started with {} services", started);
        Ok(())
    }

    /// Stops the host: receive loops unblock and exit, the pool refuses new
    /// work and drains running tasks under the configured shutdown deadline.
    pub async fn stop(&self) {
        info!("Stopping UDP service host");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = lock_vec(&self.loops).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.pool.stop(self.config.server.shutdown_deadline).await;
        lock_map(&self.local_addrs).clear();
        info!("UDP service host stopped");
    }

    /// The address a service actually bound, useful when configured with
    /// ephemeral ports.
    pub fn local_addr(&self, tag: ServiceTag) -> Option<SocketAddr> {
        lock_map(&self.local_addrs).get(&tag).copied()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<StatsLedger> {
        &self.ledger
    }

    fn bind_endpoint(&self, tag: ServiceTag, port: u16) -> Result<(UdpSocket, SocketAddr), HostError> {
        let server = &self.config.server;
        let addr = resolve_addr(&server.host, port).map_err(|source| HostError::Resolve {
            addr: format!("{}:{}", server.host, port),
            source,
        })?;

        let bind_err = |source: std::io::Error| HostError::Bind { tag, addr, source };

        let socket =
            Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

        // Buffer sizing is best effort; the host runs fine without it.
        if let Err(err) = socket.set_recv_buffer_size(server.read_buffer) {
            warn!("failed to set read buffer for {}: {}", tag, err);
        }
        if let Err(err) = socket.set_send_buffer_size(server.write_buffer) {
            warn!("failed to set write buffer for {}: {}", tag, err);
        }

        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        Ok((socket, local_addr))
    }
}

fn lock_map(map: &Mutex<HashMap<ServiceTag, SocketAddr>>) -> std::sync::MutexGuard<'_, HashMap<ServiceTag, SocketAddr>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_vec(vec: &Mutex<Vec<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
    vec.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything one receive loop needs, cloned out of the host so the loop task
/// owns its state.
struct EndpointRuntime {
    tag: ServiceTag,
    deadline: Duration,
    socket: Arc<UdpSocket>,
    service: Arc<dyn Service>,
    pool: WorkerPool,
    ledger: Arc<StatsLedger>,
    max_datagram: usize,
}

async fn receive_loop(runtime: EndpointRuntime, mut shutdown: watch::Receiver<bool>) {
    let mut buffer = vec![0u8; runtime.max_datagram];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = runtime.socket.recv_from(&mut buffer) => match result {
                Ok((len, client_addr)) => {
                    let received_at = Instant::now();
                    runtime.ledger.record_received(runtime.tag);

                    let task = handle_datagram(
                        runtime.tag,
                        runtime.deadline,
                        Arc::clone(&runtime.service),
                        Arc::clone(&runtime.socket),
                        Arc::clone(&runtime.ledger),
                        buffer[..len].to_vec(),
                        client_addr,
                        received_at,
                    );

                    if let Err(err) = runtime.pool.submit(task) {
                        // Back-pressure: drop the datagram, the caller retries.
                        runtime.ledger.record_error(runtime.tag);
                        match err {
                            PoolError::QueueFull => debug!(
                                "{}: queue full, dropping datagram from {}",
                                runtime.tag, client_addr
                            ),
                            PoolError::Stopped => debug!(
                                "{}: pool stopped, dropping datagram from {}",
                                runtime.tag, client_addr
                            ),
                        }
                    }
                }
                Err(err) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    error!("{}: error receiving datagram: {}", runtime.tag, err);
                }
            }
        }
    }

    debug!("{}: receive loop exited", runtime.tag);
}

/// One request end to end: parse, handle under deadline, frame, reply.
/// Runs on a pool worker; every exit path is a written reply or a logged
/// failure. Each datagram settles exactly one ledger outcome (processed or
/// error) before the reply is sent; a reply write failure is transport-only
/// and is not double-counted against the tag.
#[allow(clippy::too_many_arguments)]
async fn handle_datagram(
    tag: ServiceTag,
    deadline: Duration,
    service: Arc<dyn Service>,
    socket: Arc<UdpSocket>,
    ledger: Arc<StatsLedger>,
    datagram: Vec<u8>,
    client_addr: SocketAddr,
    received_at: Instant,
) {
    let request = Request::decode(&datagram, client_addr, received_at);

    let response = match tokio::time::timeout(deadline, service.handle(&request)).await {
        Ok(Ok(payload)) => {
            ledger.record_processed(tag, received_at.elapsed());
            Response::payload(request.id.clone(), tag, payload)
        }
        Ok(Err(err)) => {
            ledger.record_error(tag);
            Response::error(request.id.clone(), tag, err.to_string())
        }
        Err(_) => {
            ledger.record_error(tag);
            Response::error(request.id.clone(), tag, "timeout")
        }
    };

    match response.encode() {
        Ok(bytes) => {
            if let Err(err) = socket.send_to(&bytes, client_addr).await {
                error!("{}: failed to send response to {}: {}", tag, client_addr, err);
            }
        }
        Err(err) => {
            error!("{}: failed to encode response: {}", tag, err);
        }
    }
}
