//! # Shared Service Library
//!
//! This module contains the data structures and wire types used by both the
//! datagram service host and the stream multiplexer, along with the tests and
//! clients that talk to them. It is the single source of truth for the
//! request/response protocol so that servers, clients, and tests cannot
//! drift apart.
//!
//! ## Core Components
//!
//! ### Service Tags
//! The `ServiceTag` enum identifies a service kind (`echo`, `time`, `calc`,
//! `stats`). It is the primary key for the registry, the statistics ledger,
//! and the endpoint configuration.
//!
//! ### Wire Envelopes
//! Requests and responses travel as textual JSON envelopes:
//!
//! ```text
//! { "id": "<opaque>", "command": "<UPPERCASE-TOKEN>", "data": "<text>" }
//! { "id": "<echo>", "service": "<tag>", "data": "<text>", "timestamp": <unix-seconds>, "error": "<text-if-any>" }
//! ```
//!
//! Request decoding is tolerant: a body that is not a parseable envelope is
//! accepted as the raw `data` with an empty command and a server-generated
//! id, so plain-text clients (netcat and friends) still get service.
//!
//! ### Request / Response Model
//! `Request` carries the parsed envelope plus the client address and receive
//! time. `Response` holds either a payload or an error text, never both;
//! the two-variant `ResponseBody` makes the invariant structural.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a service kind, used as the primary key for the registry,
/// statistics, and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTag {
    Echo,
    Time,
    Calc,
    Stats,
}

impl ServiceTag {
    /// Every known tag, in a stable order.
    pub fn all() -> [ServiceTag; 4] {
        [
            ServiceTag::Echo,
            ServiceTag::Time,
            ServiceTag::Calc,
            ServiceTag::Stats,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTag::Echo => "echo",
            ServiceTag::Time => "time",
            ServiceTag::Calc => "calc",
            ServiceTag::Stats => "stats",
        }
    }
}

impl fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown service tag: {0}")]
pub struct ParseTagError(String);

impl FromStr for ServiceTag {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo" => Ok(ServiceTag::Echo),
            "time" => Ok(ServiceTag::Time),
            "calc" => Ok(ServiceTag::Calc),
            "stats" => Ok(ServiceTag::Stats),
            other => Err(ParseTagError(other.to_string())),
        }
    }
}

/// Textual request envelope as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub data: String,
}

/// Textual response envelope as it appears on the wire. `error` is present
/// iff the response carries an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub service: String,
    pub data: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A parsed request as seen by service handlers.
#[derive(Debug, Clone)]
pub struct Request {
    /// Server-assigned opaque id, generated when absent from the envelope.
    pub id: String,
    /// Uppercase dispatch token; may be empty.
    pub command: String,
    pub data: Vec<u8>,
    pub client_addr: SocketAddr,
    pub received_at: Instant,
}

impl Request {
    /// Decodes a datagram into a request.
    ///
    /// A body that parses as a request envelope is taken at face value (with
    /// a generated id if the envelope omitted one). Anything else is treated
    /// as raw request data with an empty command, so plain-text clients are
    /// still served.
    pub fn decode(data: &[u8], client_addr: SocketAddr, received_at: Instant) -> Request {
        match serde_json::from_slice::<RequestEnvelope>(data) {
            Ok(envelope) => {
                let id = if envelope.id.is_empty() {
                    Uuid::new_v4().to_string()
                } else {
                    envelope.id
                };
                Request {
                    id,
                    command: envelope.command.to_uppercase(),
                    data: envelope.data.into_bytes(),
                    client_addr,
                    received_at,
                }
            }
            Err(_) => Request {
                id: Uuid::new_v4().to_string(),
                command: String::new(),
                data: data.to_vec(),
                client_addr,
                received_at,
            },
        }
    }

    /// Request data reinterpreted as text for handlers that work on strings.
    pub fn data_as_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Exactly one of payload or error, enforced structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Payload(Vec<u8>),
    Error(String),
}

/// A service reply, ready to be framed into a `ResponseEnvelope`.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub tag: ServiceTag,
    pub body: ResponseBody,
    pub emitted_at: DateTime<Utc>,
}

impl Response {
    pub fn payload(id: impl Into<String>, tag: ServiceTag, data: Vec<u8>) -> Response {
        Response {
            id: id.into(),
            tag,
            body: ResponseBody::Payload(data),
            emitted_at: Utc::now(),
        }
    }

    pub fn error(id: impl Into<String>, tag: ServiceTag, text: impl Into<String>) -> Response {
        Response {
            id: id.into(),
            tag,
            body: ResponseBody::Error(text.into()),
            emitted_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }

    /// Frames the response for the wire.
    pub fn to_wire(&self) -> ResponseEnvelope {
        let (data, error) = match &self.body {
            ResponseBody::Payload(bytes) => (String::from_utf8_lossy(bytes).into_owned(), None),
            ResponseBody::Error(text) => (String::new(), Some(text.clone())),
        };
        ResponseEnvelope {
            id: self.id.clone(),
            service: self.tag.to_string(),
            data,
            timestamp: self.emitted_at.timestamp(),
            error,
        }
    }

    /// Serializes the wire envelope to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_wire())
    }
}

// Current wall-clock time in whole Unix seconds.
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Resolves a `host:port` pair to the first matching socket address, so
/// listeners can bind names like `localhost` as well as literal addresses.
pub fn resolve_addr(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;

    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no addresses resolved for {}:{}", host, port),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn tag_display_and_parse_roundtrip() {
        for tag in ServiceTag::all() {
            let parsed: ServiceTag = tag.to_string().parse().unwrap();
            assert_eq!(parsed, tag);
        }
    }

    #[test]
    fn tag_parse_rejects_unknown() {
        let err = "file".parse::<ServiceTag>().unwrap_err();
        assert_eq!(err, ParseTagError("file".to_string()));
    }

    #[test]
    fn decode_well_formed_envelope() {
        let body = br#"{"id":"42","command":"unix","data":"payload"}"#;
        let req = Request::decode(body, test_addr(), Instant::now());

        assert_eq!(req.id, "42");
        assert_eq!(req.command, "UNIX");
        assert_eq!(req.data, b"payload");
    }

    #[test]
    fn decode_generates_id_when_missing() {
        let body = br#"{"command":"","data":"x"}"#;
        let req = Request::decode(body, test_addr(), Instant::now());

        assert!(!req.id.is_empty());
        assert_eq!(req.data, b"x");
    }

    #[test]
    fn decode_falls_back_to_raw_data() {
        let body = b"5 * 10";
        let req = Request::decode(body, test_addr(), Instant::now());

        assert!(!req.id.is_empty());
        assert!(req.command.is_empty());
        assert_eq!(req.data, b"5 * 10");
    }

    #[test]
    fn payload_response_omits_error_field() {
        let resp = Response::payload("1", ServiceTag::Echo, b"ECHO: hi".to_vec());
        let bytes = resp.encode().unwrap();
        let wire: ResponseEnvelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(wire.id, "1");
        assert_eq!(wire.service, "echo");
        assert_eq!(wire.data, "ECHO: hi");
        assert_eq!(wire.error, None);

        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw.get("error").is_none());
    }

    #[test]
    fn error_response_carries_empty_data() {
        let resp = Response::error("4", ServiceTag::Calc, "division by zero");
        let wire = resp.to_wire();

        assert!(wire.data.is_empty());
        assert_eq!(wire.error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn resolve_addr_handles_names_and_literals() {
        let loopback = resolve_addr("127.0.0.1", 8081).unwrap();
        assert_eq!(loopback.port(), 8081);

        let named = resolve_addr("localhost", 9000).unwrap();
        assert_eq!(named.port(), 9000);
        assert!(named.ip().is_loopback());
    }

    #[test]
    fn response_timestamp_is_unix_seconds() {
        let resp = Response::payload("1", ServiceTag::Time, vec![]);
        let now = unix_timestamp();
        assert!((resp.to_wire().timestamp - now).abs() <= 1);
    }
}
