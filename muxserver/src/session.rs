//! Client session management for the stream multiplexer.
//!
//! This module handles the loop-side bookkeeping for connected clients:
//! - Session lifecycle (accept, close, idle eviction)
//! - Inbound buffering and newline-framed command extraction
//! - Outbound buffering with chunked draining
//! - Per-session chunk-size adaptation against the interactive budget
//!
//! The table is driven single-threaded by the readiness loop; nothing here
//! needs synchronization.

use log::info;
use mio::net::TcpStream;
use mio::Token;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Smallest per-operation byte budget; below this, syscall overhead dominates.
pub const MIN_CHUNK: usize = 512;
/// Largest per-operation byte budget; above this, one client hogs the loop.
pub const MAX_CHUNK: usize = 8192;
/// Assumed drain rate used to size chunks against the latency budget.
pub const BYTES_PER_MS: usize = 1024 * 1024 / 1000;

/// Chunk size that keeps one transfer inside the interactive budget.
pub fn optimal_chunk(interactive_budget: Duration) -> usize {
    (interactive_budget.as_millis() as usize * BYTES_PER_MS).clamp(MIN_CHUNK, MAX_CHUNK)
}

/// One accepted stream connection and its transfer state.
#[derive(Debug)]
pub struct ClientSession {
    pub token: Token,
    pub stream: TcpStream,
    pub peer_addr: Option<SocketAddr>,
    /// Last time any bytes moved in either direction.
    pub last_active: Instant,
    /// Per-operation byte budget, adapted per session.
    pub chunk_size: usize,
    /// Bytes read but not yet framed into complete commands.
    pub inbound: Vec<u8>,
    /// Replies waiting to be drained to the peer.
    pub outbound: Vec<u8>,
    /// True while there is pending output; flips the poll interest.
    pub writing: bool,
    /// Close the session once the outbound buffer drains.
    pub closing: bool,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ClientSession {
    pub fn new(token: Token, stream: TcpStream, chunk_size: usize) -> ClientSession {
        let peer_addr = stream.peer_addr().ok();
        ClientSession {
            token,
            stream,
            peer_addr,
            last_active: Instant::now(),
            chunk_size,
            inbound: Vec::new(),
            outbound: Vec::new(),
            writing: false,
            closing: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() > timeout
    }

    /// Extracts the next complete newline-terminated command, trimmed of
    /// surrounding whitespace. Returns `None` while the line is incomplete.
    pub fn next_command(&mut self) -> Option<String> {
        let pos = self.inbound.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.inbound.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Queues a reply line and flips the session into writing mode.
    pub fn queue_reply(&mut self, reply: &str) {
        self.outbound.extend_from_slice(reply.as_bytes());
        self.outbound.push(b'\n');
        self.writing = true;
    }

    /// Per-session chunk probe: a transfer that saturates the chunk doubles
    /// it, one that uses under a quarter halves it. Always clamped.
    pub fn observe_transfer(&mut self, bytes: usize) {
        if bytes == self.chunk_size {
            self.chunk_size = (self.chunk_size * 2).clamp(MIN_CHUNK, MAX_CHUNK);
        } else if bytes < self.chunk_size / 4 {
            self.chunk_size = (self.chunk_size / 2).clamp(MIN_CHUNK, MAX_CHUNK);
        }
    }
}

/// Maps poll tokens to sessions and enforces the client capacity.
pub struct SessionTable {
    sessions: HashMap<Token, ClientSession>,
    next_token: usize,
    max_clients: usize,
}

impl SessionTable {
    /// `first_token` skips the tokens reserved for listeners.
    pub fn new(max_clients: usize, first_token: usize) -> SessionTable {
        SessionTable {
            sessions: HashMap::new(),
            next_token: first_token,
            max_clients,
        }
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_clients
    }

    /// Registers a new session, handing out the next token. Returns `None`
    /// when the table is at capacity.
    pub fn insert(&mut self, stream: TcpStream, chunk_size: usize) -> Option<Token> {
        if self.is_full() {
            return None;
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        let session = ClientSession::new(token, stream, chunk_size);
        if let Some(addr) = session.peer_addr {
            info!("Client {} connected from {} (chunk size {})", token.0, addr, chunk_size);
        }
        self.sessions.insert(token, session);
        Some(token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&token)
    }

    pub fn remove(&mut self, token: Token) -> Option<ClientSession> {
        let session = self.sessions.remove(&token);
        if session.is_some() {
            info!("Client {} disconnected", token.0);
        }
        session
    }

    /// Tokens of sessions idle past the timeout, for eviction.
    pub fn idle_tokens(&self, timeout: Duration) -> Vec<Token> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.is_idle(timeout))
            .map(|(token, _)| *token)
            .collect()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
