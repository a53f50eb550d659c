//! Request/response UDP client for the service host.
//!
//! One socket, one in-flight request at a time: send an envelope, wait for
//! the reply under a timeout. Integration tests and interactive front-ends
//! both drive the host through this.

use shared::{RequestEnvelope, ResponseEnvelope};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

pub struct UdpServiceClient {
    socket: UdpSocket,
    timeout: Duration,
}

impl UdpServiceClient {
    pub async fn new() -> io::Result<UdpServiceClient> {
        Ok(UdpServiceClient {
            socket: UdpSocket::bind("127.0.0.1:0").await?,
            timeout: Duration::from_secs(5),
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends one request envelope and awaits the reply.
    pub async fn send_request(
        &self,
        addr: SocketAddr,
        id: &str,
        command: &str,
        data: &str,
    ) -> io::Result<ResponseEnvelope> {
        let envelope = RequestEnvelope {
            id: id.to_string(),
            command: command.to_string(),
            data: data.to_string(),
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.exchange(addr, &bytes).await
    }

    /// Sends raw bytes, exercising the host's plain-text tolerance.
    pub async fn send_raw(&self, addr: SocketAddr, body: &[u8]) -> io::Result<ResponseEnvelope> {
        self.exchange(addr, body).await
    }

    async fn exchange(&self, addr: SocketAddr, body: &[u8]) -> io::Result<ResponseEnvelope> {
        self.socket.send_to(body, addr).await?;

        let mut buf = vec![0u8; 64 * 1024];
        let (len, _) = timeout(self.timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for reply"))??;

        serde_json::from_slice(&buf[..len])
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}
