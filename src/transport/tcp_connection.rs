//! Client side of a framed TCP stream
//!
//! Used for request-response calls to the coordinator and for the long-lived
//! publisher/subscriber streams to the relay broker.
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::framing::{read_frame, write_frame};
use crate::error::Result;
use crate::transport_error;

#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    request_timeout: Duration,
}

impl TcpConnection {
    /// Connect to `target`, giving up after `request_timeout`
    pub async fn connect(target: SocketAddr, request_timeout: Duration) -> Result<Self> {
        let stream = timeout(request_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| transport_error!("Connection to {} timed out", target))?
            .map_err(|e| transport_error!("Failed to connect to {}: {}", target, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| transport_error!("Failed to configure socket: {}", e))?;
        debug!("Connected to {}", target);

        Ok(Self {
            stream,
            peer_addr: target,
            request_timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write one frame
    pub async fn send_frame(&mut self, body: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, body).await
    }

    /// Wait for the next frame; a closed stream is an error here
    pub async fn recv_frame(&mut self) -> Result<Bytes> {
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| transport_error!("Connection to {} closed", self.peer_addr))
    }

    /// Send a request and wait for its response, bounded by the request timeout
    pub async fn request(&mut self, body: &[u8]) -> Result<Bytes> {
        let request_timeout = self.request_timeout;
        let peer_addr = self.peer_addr;
        timeout(request_timeout, async {
            self.send_frame(body).await?;
            self.recv_frame().await
        })
        .await
        .map_err(|_| transport_error!("Request to {} timed out", peer_addr))?
    }
}
