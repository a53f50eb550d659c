//! # Multiplexed Stream Server
//!
//! A single-threaded TCP server that drives many concurrent clients through a
//! readiness-notification loop with non-blocking I/O.
//!
//! ## Architecture Design
//!
//! ### One Thread, Many Clients
//! Everything runs on one thread: accepting, reading, command handling, and
//! writing. The only blocking call is the readiness wait itself, bounded by a
//! small timeout. This eliminates synchronization entirely: the session
//! table is plain single-threaded state.
//!
//! ### Interactive Latency Budget
//! Each read and write moves at most one chunk per readiness cycle, with the
//! chunk sized so the observable round trip stays within the interactive
//! budget (ten times the estimated ping). Chunk observations are kept per
//! session: a connection that saturates its chunk grows it for throughput, a
//! trickling one shrinks back toward the floor for responsiveness.
//!
//! ### Command Handling
//! Commands are newline-framed and execute inline on the loop thread, so
//! handlers are required to be short and non-blocking. Within one session,
//! commands are processed and answered in arrival order.
//!
//! ## Module Organization
//!
//! - `config`: resolved configuration record and the interactive budget
//! - `session`: per-client sessions, the session table, chunk policy
//! - `commands`: the inline command set (`ECHO`, `TIME`, `STATUS`, `HELP`, `CLOSE`)
//! - `stats`: loop-level counters surfaced by `STATUS`
//! - `network`: the readiness loop itself

pub mod commands;
pub mod config;
pub mod network;
pub mod session;
pub mod stats;
