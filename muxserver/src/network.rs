//! Single-threaded readiness loop multiplexing many TCP clients.
//!
//! One thread serves every client. The loop polls the OS readiness primitive
//! with a small timeout, accepts on the listener, and moves at most one chunk
//! per session per cycle so a heavy session cannot starve the others. Poll
//! registrations are re-armed after a saturated transfer, which is how the
//! remainder gets picked up on the next cycle under edge-triggered readiness.

use crate::commands;
use crate::config::MuxConfig;
use crate::session::{optimal_chunk, SessionTable, MAX_CHUNK, MIN_CHUNK};
use crate::stats::LoopStats;
use log::{debug, error, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const LISTENER: Token = Token(0);
const EVENT_CAPACITY: usize = 256;

/// The multiplexed stream server. Owns the listener, the session table, and
/// the loop statistics; `run` drives everything on the calling thread.
pub struct MuxServer {
    config: MuxConfig,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    sessions: SessionTable,
    stats: LoopStats,
    running: Arc<AtomicBool>,
}

impl MuxServer {
    /// Binds the listener and registers it with the poller. Bind failures are
    /// fatal; the server refuses to start.
    pub fn bind(config: MuxConfig) -> io::Result<MuxServer> {
        let addr = shared::resolve_addr(&config.host, config.port)?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        info!(
            "Stream server listening on {} (select timeout {:?}, max clients {})",
            local_addr, config.select_timeout, config.max_clients
        );

        Ok(MuxServer {
            sessions: SessionTable::new(config.max_clients, LISTENER.0 + 1),
            stats: LoopStats::default(),
            running: Arc::new(AtomicBool::new(true)),
            local_addr,
            config,
            poll,
            listener,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Flag that stops the loop from another thread; the loop notices within
    /// one readiness-wait timeout.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Runs the readiness loop until the shutdown handle is flipped.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        while self.running.load(Ordering::Acquire) {
            if let Err(err) = self.poll.poll(&mut events, Some(self.config.select_timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("Poll error: {}", err);
                return Err(err);
            }
            self.stats.poll_calls += 1;

            if events.is_empty() {
                // Timeout-only wake: evict sessions idle past the limit.
                self.sweep_idle();
                continue;
            }

            for event in events.iter() {
                self.stats.events_processed += 1;
                match event.token() {
                    LISTENER => self.accept_ready(),
                    token => {
                        if event.is_readable() {
                            self.session_readable(token);
                        }
                        if event.is_writable() {
                            self.session_writable(token);
                        }
                    }
                }
            }
        }

        self.close_all();
        info!("Stream server stopped");
        Ok(())
    }

    /// Drains the accept queue. Past the client limit, connections are closed
    /// immediately; the counter is the only trace they leave.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.sessions.is_full() {
                        warn!("Max clients reached, rejecting connection from {}", peer);
                        self.stats.rejected_connections += 1;
                        drop(stream);
                        continue;
                    }

                    let chunk = self.initial_chunk();
                    let Some(token) = self.sessions.insert(stream, chunk) else {
                        continue;
                    };

                    let registered = match self.sessions.get_mut(token) {
                        Some(session) => self.poll.registry().register(
                            &mut session.stream,
                            token,
                            Interest::READABLE,
                        ),
                        None => continue,
                    };
                    if let Err(err) = registered {
                        error!("Failed to register client {}: {}", peer, err);
                        self.sessions.remove(token);
                        continue;
                    }

                    self.stats.total_connections += 1;
                    self.stats.active_sessions = self.sessions.len();
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Accept error: {}", err);
                    break;
                }
            }
        }
    }

    /// Reads one chunk, frames complete commands, and executes them inline.
    fn session_readable(&mut self, token: Token) {
        let budget = self.config.interactive_budget();

        let mut close_reason: Option<&'static str> = None;
        let mut read_bytes = 0usize;
        let mut lines: Vec<String> = Vec::new();
        {
            let Some(session) = self.sessions.get_mut(token) else {
                return;
            };
            let chunk = session.chunk_size;
            let mut buf = vec![0u8; chunk];

            match session.stream.read(&mut buf) {
                Ok(0) => close_reason = Some("peer closed connection"),
                Ok(n) => {
                    read_bytes = n;
                    session.touch();
                    session.bytes_read += n as u64;
                    session.inbound.extend_from_slice(&buf[..n]);
                    session.observe_transfer(n);

                    while let Some(line) = session.next_command() {
                        if !line.is_empty() {
                            lines.push(line);
                        }
                    }
                }
                Err(ref err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("Read error on client {}: {}", token.0, err);
                    close_reason = Some("read error");
                }
            }
        }

        if let Some(reason) = close_reason {
            self.close_session(token, reason);
            return;
        }
        if read_bytes == 0 {
            return;
        }
        self.stats.bytes_read += read_bytes as u64;

        // Commands run inline on the loop thread; within one session they are
        // processed, and answered, in arrival order.
        let mut outcomes = Vec::with_capacity(lines.len());
        for line in lines {
            let started = Instant::now();
            let outcome = commands::execute(&line, &self.stats);
            let elapsed = started.elapsed();

            self.stats.commands_processed += 1;
            let verb = line.split_whitespace().next().unwrap_or("").to_uppercase();
            if commands::is_interactive(&verb) && elapsed > budget {
                self.stats.slow_interactive += 1;
                warn!(
                    "Interactive command {} took {:?} (budget {:?})",
                    verb, elapsed, budget
                );
            }
            outcomes.push(outcome);
        }

        if let Some(session) = self.sessions.get_mut(token) {
            for outcome in outcomes {
                session.queue_reply(&outcome.reply);
                if outcome.close {
                    session.closing = true;
                }
            }
        }

        // Re-arming also picks up the rest of a saturated read next cycle.
        self.update_interest(token);
    }

    /// Drains up to one chunk of pending output.
    fn session_writable(&mut self, token: Token) {
        let mut close_reason: Option<&'static str> = None;
        let mut written = 0usize;
        let mut drained_and_closing = false;
        {
            let Some(session) = self.sessions.get_mut(token) else {
                return;
            };
            let n = session.outbound.len().min(session.chunk_size);
            if n > 0 {
                match session.stream.write(&session.outbound[..n]) {
                    Ok(0) => close_reason = Some("peer closed connection"),
                    Ok(w) => {
                        session.outbound.drain(..w);
                        session.touch();
                        session.bytes_written += w as u64;
                        written = w;
                    }
                    Err(ref err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        warn!("Write error on client {}: {}", token.0, err);
                        close_reason = Some("write error");
                    }
                }
            }

            if session.outbound.is_empty() {
                session.writing = false;
                drained_and_closing = session.closing;
            }
        }

        if let Some(reason) = close_reason {
            self.close_session(token, reason);
            return;
        }
        self.stats.bytes_written += written as u64;

        if drained_and_closing {
            self.close_session(token, "client requested close");
            return;
        }
        self.update_interest(token);
    }

    /// Reconciles the poll interest with the session state: write interest
    /// while output is pending, read interest otherwise. Also re-arms the
    /// edge-triggered registration.
    fn update_interest(&mut self, token: Token) {
        let failed = {
            let Some(session) = self.sessions.get_mut(token) else {
                return;
            };
            let interest = if session.writing {
                Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            self.poll
                .registry()
                .reregister(&mut session.stream, token, interest)
                .is_err()
        };

        if failed {
            self.close_session(token, "poll reregistration failed");
        }
    }

    fn sweep_idle(&mut self) {
        for token in self.sessions.idle_tokens(self.config.idle_timeout) {
            self.stats.idle_evictions += 1;
            self.close_session(token, "idle timeout");
        }
    }

    fn close_session(&mut self, token: Token, reason: &str) {
        if let Some(mut session) = self.sessions.remove(token) {
            let _ = self.poll.registry().deregister(&mut session.stream);
            self.stats.active_sessions = self.sessions.len();
            debug!("Closed client {} ({})", token.0, reason);
        }
    }

    fn close_all(&mut self) {
        for token in self.sessions.tokens() {
            self.close_session(token, "server shutdown");
        }
    }

    /// Initial per-connection chunk: derived from the interactive budget, or
    /// the configured size when no ping estimate is available.
    fn initial_chunk(&self) -> usize {
        if self.config.ping_timeout.is_zero() {
            self.config.chunk_size.clamp(MIN_CHUNK, MAX_CHUNK)
        } else {
            optimal_chunk(self.config.interactive_budget())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> MuxConfig {
        MuxConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..MuxConfig::default()
        }
    }

    #[test]
    fn bind_reports_the_ephemeral_port() {
        let server = MuxServer::bind(test_config()).unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn bind_failure_is_fatal() {
        let first = MuxServer::bind(test_config()).unwrap();
        let mut config = test_config();
        config.port = first.local_addr().port();

        assert!(MuxServer::bind(config).is_err());
    }

    #[test]
    fn initial_chunk_follows_the_ping_budget() {
        let server = MuxServer::bind(test_config()).unwrap();
        // Default ping 10ms -> budget 100ms -> clamped to the ceiling.
        assert_eq!(server.initial_chunk(), MAX_CHUNK);

        let mut config = test_config();
        config.ping_timeout = Duration::ZERO;
        config.chunk_size = 100; // below the floor
        let server = MuxServer::bind(config).unwrap();
        assert_eq!(server.initial_chunk(), MIN_CHUNK);
    }

    #[test]
    fn shutdown_handle_stops_the_loop() {
        let mut server = MuxServer::bind(test_config()).unwrap();
        let stop = server.shutdown_handle();

        let handle = std::thread::spawn(move || server.run());
        std::thread::sleep(Duration::from_millis(50));
        stop.store(false, Ordering::Release);

        let result = handle.join().unwrap();
        assert!(result.is_ok());
    }
}
