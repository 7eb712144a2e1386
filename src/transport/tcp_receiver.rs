//! TCP Receiver
//!
//! Accepts request/response connections. Each decoded frame is handed to a
//! single consumer through a channel together with a oneshot for the reply,
//! so whoever owns the channel handles requests strictly one at a time.
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::framing::{read_frame, write_frame};
use super::is_transient_accept_error;
use super::stats::ReceiverStats;
use crate::error::{MurmurError, Result};

/// A request with a channel to send the response back
#[derive(Debug)]
pub struct TcpRequest {
    pub data: Bytes,
    pub peer_addr: SocketAddr,
    pub response_tx: oneshot::Sender<Vec<u8>>,
}

/// TCP request receiver
pub struct TcpReceiver {
    local_addr: SocketAddr,
    listener: TcpListener,
    stats: Arc<ReceiverStats>,
    idle_timeout: Duration,
}

impl TcpReceiver {
    /// Bind a new TCP receiver
    pub async fn new(bind_addr: SocketAddr, idle_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| MurmurError::Transport(format!("Socket bind failed: {}", e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| MurmurError::Transport(format!("Socket bind failed: {}", e)))?;

        Ok(Self {
            local_addr,
            listener,
            stats: Arc::new(ReceiverStats::default()),
            idle_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the live counters
    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Start the accept loop.
    ///
    /// The returned task resolves when the token is cancelled (`Ok`) or when
    /// the listener itself fails (`Err`); a failing client connection only
    /// ends that connection.
    pub fn start(
        self,
        message_tx: mpsc::Sender<TcpRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let TcpReceiver {
            local_addr,
            listener,
            stats,
            idle_timeout,
        } = self;

        tokio::spawn(async move {
            info!("Accepting requests on {}", local_addr);
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Receiver on {} cancelled", local_addr);
                        return Ok(());
                    }
                    accepted = listener.accept() => accepted,
                };

                let (stream, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!("TCP accept failed, continuing: {}", e);
                        continue;
                    }
                    Err(e) => {
                        error!("TCP listener on {} failed: {}", local_addr, e);
                        return Err(MurmurError::Transport(format!("Listener failed: {}", e)));
                    }
                };

                stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                debug!("Accepted connection from {}", peer_addr);

                tokio::spawn(serve_connection(
                    stream,
                    peer_addr,
                    message_tx.clone(),
                    stats.clone(),
                    idle_timeout,
                    cancel.clone(),
                ));
            }
        })
    }
}

/// Read frames from one client until it disconnects, goes idle, or we shut down.
async fn serve_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    message_tx: mpsc::Sender<TcpRequest>,
    stats: Arc<ReceiverStats>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = timeout(idle_timeout, read_frame(&mut stream)) => frame,
        };

        let data = match frame {
            Err(_) => {
                stats.idle_disconnects.fetch_add(1, Ordering::Relaxed);
                debug!("Closing idle connection from {}", peer_addr);
                return;
            }
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                debug!("Connection from {} closed", peer_addr);
                return;
            }
            Ok(Err(e)) => {
                stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping connection from {}: {}", peer_addr, e);
                return;
            }
        };

        stats.messages_received.fetch_add(1, Ordering::Relaxed);

        // Create a oneshot channel for the response
        let (response_tx, response_rx) = oneshot::channel();
        let request = TcpRequest {
            data,
            peer_addr,
            response_tx,
        };

        if message_tx.send(request).await.is_err() {
            debug!("Request handler gone, closing connection from {}", peer_addr);
            return;
        }

        let response = match response_rx.await {
            Ok(response) => response,
            Err(_) => {
                error!("Handler dropped response channel for {}", peer_addr);
                return;
            }
        };

        if let Err(e) = write_frame(&mut stream, &response).await {
            stats.receive_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to answer {}: {}", peer_addr, e);
            return;
        }
    }
}
