//! # Multi-Port UDP Service Host
//!
//! This library implements a request/response service host that runs several
//! independent services on distinct UDP ports, dispatches inbound datagrams
//! onto a dynamically sized worker pool, and exposes per-service telemetry.
//!
//! ## Core Responsibilities
//!
//! ### Service Hosting
//! Every enabled endpoint in the configuration gets its own UDP socket and
//! receive loop. Datagrams are parsed from a tolerant JSON envelope, handled
//! under a per-request deadline, and answered at the sender's address. A
//! malformed body is still served: it becomes the raw request data with an
//! empty command.
//!
//! ### Worker Pool
//! Handler invocations run on a bounded pool that grows under queue pressure
//! and shrinks through idle timeouts, never dropping below its floor. A full
//! queue is back-pressure: the datagram is dropped, the error counted, and
//! the caller is expected to retry.
//!
//! ### Telemetry
//! The statistics ledger keeps one record per service: datagrams received,
//! requests processed, errors, a running mean of response latency, and the
//! last receive time. The `stats` service snapshots the ledger and the pool
//! on demand.
//!
//! ## Module Organization
//!
//! - `config`: resolved configuration records (endpoints, sockets, pool)
//! - `registry`: the `Service` trait and the tag/port-indexed registry
//! - `worker_pool`: the bounded, self-scaling task executor
//! - `stats`: the per-service statistics ledger
//! - `services`: the echo/time/calc/stats handler implementations
//! - `network`: the host itself (sockets, receive loops, shutdown)
//! - `client`: a request/response UDP client used by tests and front-ends

pub mod client;
pub mod config;
pub mod network;
pub mod registry;
pub mod services;
pub mod stats;
pub mod worker_pool;
