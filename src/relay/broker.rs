//! Relay broker
//!
//! Two listeners. Producers connect to the publish side and send `publish`
//! frames; consumers connect to the subscribe side and send
//! `subscribe`/`unsubscribe` frames. Published frames fan out downstream to
//! every subscriber connection, control frames fan out upstream to every
//! producer connection. Topic filtering happens per subscriber connection;
//! the broker itself keeps no subscription table. Each connection reads and
//! writes in separate tasks, so a peer that stops reading only lags its own
//! receiver.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{FrameKind, RelayFrame, RelayMessage, Subscriptions};
use crate::error::{MurmurError, Result};
use crate::transport::{is_transient_accept_error, read_frame, write_frame};

#[derive(Debug, Default)]
pub struct RelayStats {
    pub publishers_connected: AtomicU64,
    pub subscribers_connected: AtomicU64,
    pub published: AtomicU64,
    pub dropped: AtomicU64,
    pub delivered: AtomicU64,
    pub control_frames: AtomicU64,
    pub lagged: AtomicU64,
    pub invalid_frames: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenRelayStats {
    pub publishers_connected: u64,
    pub subscribers_connected: u64,
    pub published: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub control_frames: u64,
    pub lagged: u64,
    pub invalid_frames: u64,
}

impl RelayStats {
    pub fn freeze(&self) -> FrozenRelayStats {
        FrozenRelayStats {
            publishers_connected: self.publishers_connected.load(Ordering::Relaxed),
            subscribers_connected: self.subscribers_connected.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            control_frames: self.control_frames.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            invalid_frames: self.invalid_frames.load(Ordering::Relaxed),
        }
    }
}

/// Fan-out channels shared by every connection task
#[derive(Clone)]
struct Channels {
    downstream: broadcast::Sender<RelayMessage>,
    upstream: broadcast::Sender<Bytes>,
    stats: Arc<RelayStats>,
}

pub struct RelayBroker {
    publish_listener: TcpListener,
    subscribe_listener: TcpListener,
    publish_addr: SocketAddr,
    subscribe_addr: SocketAddr,
    channels: Channels,
}

impl RelayBroker {
    pub async fn bind(
        publish_addr: SocketAddr,
        subscribe_addr: SocketAddr,
        capacity: usize,
    ) -> Result<Self> {
        let publish_listener = bind_listener(publish_addr).await?;
        let subscribe_listener = bind_listener(subscribe_addr).await?;
        let (downstream, _) = broadcast::channel(capacity);
        let (upstream, _) = broadcast::channel(capacity);

        Ok(Self {
            publish_addr: publish_listener.local_addr()?,
            subscribe_addr: subscribe_listener.local_addr()?,
            publish_listener,
            subscribe_listener,
            channels: Channels {
                downstream,
                upstream,
                stats: Arc::new(RelayStats::default()),
            },
        })
    }

    pub fn publish_addr(&self) -> SocketAddr {
        self.publish_addr
    }

    pub fn subscribe_addr(&self) -> SocketAddr {
        self.subscribe_addr
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.channels.stats.clone()
    }

    /// Relay until cancelled; a failing listener stops both sides and is returned
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let shutdown = cancel.child_token();
        info!(
            "Relay accepting publishers on {} and subscribers on {}",
            self.publish_addr, self.subscribe_addr
        );

        let mut publish_side = spawn_accept_loop(
            self.publish_listener,
            Side::Publish,
            self.channels.clone(),
            shutdown.clone(),
        );
        let mut subscribe_side = spawn_accept_loop(
            self.subscribe_listener,
            Side::Subscribe,
            self.channels,
            shutdown.clone(),
        );

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            joined = &mut publish_side => flatten(joined),
            joined = &mut subscribe_side => flatten(joined),
        };

        shutdown.cancel();
        info!("Relay stopped");
        outcome
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| MurmurError::Transport(format!("Socket bind failed on {}: {}", addr, e)))
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(MurmurError::Concurrency(format!(
            "Relay listener task failed: {}",
            e
        ))),
    }
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Publish,
    Subscribe,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Publish => write!(f, "publish"),
            Side::Subscribe => write!(f, "subscribe"),
        }
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    side: Side,
    channels: Channels,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!("Relay {} accept failed, continuing: {}", side, e);
                    continue;
                }
                Err(e) => {
                    error!("Relay {} listener failed: {}", side, e);
                    return Err(MurmurError::Transport(format!(
                        "Relay {} listener failed: {}",
                        side, e
                    )));
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to configure relay socket for {}: {}", peer_addr, e);
            }
            debug!("Relay {} connection from {}", side, peer_addr);
            let channels = channels.clone();
            let cancel = cancel.clone();
            match side {
                Side::Publish => {
                    tokio::spawn(serve_publisher(stream, peer_addr, channels, cancel));
                }
                Side::Subscribe => {
                    tokio::spawn(serve_subscriber(stream, peer_addr, channels, cancel));
                }
            }
        }
    })
}

/// Read frames until the peer disconnects, sends garbage framing, or the
/// broker shuts down
async fn next_inbound(
    reader: &mut OwnedReadHalf,
    peer_addr: SocketAddr,
    cancel: &CancellationToken,
) -> Option<Bytes> {
    let read = tokio::select! {
        _ = cancel.cancelled() => return None,
        read = read_frame(reader) => read,
    };
    match read {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            debug!("Relay peer {} disconnected", peer_addr);
            None
        }
        Err(e) => {
            warn!("Dropping relay peer {}: {}", peer_addr, e);
            None
        }
    }
}

/// Copy forwarded control frames to a producer; runs apart from the publish
/// reader so a producer that never reads them still gets its publishes relayed
async fn forward_control(
    mut writer: OwnedWriteHalf,
    mut control: broadcast::Receiver<Bytes>,
    peer_addr: SocketAddr,
    stats: Arc<RelayStats>,
) {
    loop {
        match control.recv().await {
            Ok(frame) => {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!("Publisher {} gone: {}", peer_addr, e);
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                warn!("Publisher {} missed {} control frames", peer_addr, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Copy matching published frames to a consumer
async fn forward_messages(
    mut writer: OwnedWriteHalf,
    mut messages: broadcast::Receiver<RelayMessage>,
    subscriptions: watch::Receiver<Subscriptions>,
    peer_addr: SocketAddr,
    stats: Arc<RelayStats>,
) {
    loop {
        match messages.recv().await {
            Ok(message) => {
                let wanted = subscriptions.borrow().matches(&message.topic);
                if !wanted {
                    continue;
                }
                if let Err(e) = write_frame(&mut writer, &message.frame).await {
                    debug!("Subscriber {} gone: {}", peer_addr, e);
                    return;
                }
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                warn!("Subscriber {} too slow, skipped {} messages", peer_addr, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn serve_publisher(
    stream: TcpStream,
    peer_addr: SocketAddr,
    channels: Channels,
    cancel: CancellationToken,
) {
    // Join the fan-out before counting the connection as live
    let control = channels.upstream.subscribe();
    let stats = channels.stats.clone();
    stats.publishers_connected.fetch_add(1, Ordering::Relaxed);

    let (mut reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(forward_control(writer, control, peer_addr, stats.clone()));

    while let Some(frame) = next_inbound(&mut reader, peer_addr, &cancel).await {
        match RelayFrame::decode(&frame) {
            Ok(RelayFrame { kind: FrameKind::Publish, topic, .. }) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
                let message = RelayMessage { topic, frame };
                if channels.downstream.send(message).is_err() {
                    // Nobody subscribed; the frame is gone
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(other) => {
                stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring {:?} frame from publisher {}", other.kind, peer_addr);
            }
            Err(e) => {
                stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                warn!("Undecodable frame from publisher {}: {}", peer_addr, e);
            }
        }
    }

    writer_task.abort();
    stats.publishers_connected.fetch_sub(1, Ordering::Relaxed);
    debug!("Publisher {} closed", peer_addr);
}

async fn serve_subscriber(
    stream: TcpStream,
    peer_addr: SocketAddr,
    channels: Channels,
    cancel: CancellationToken,
) {
    let messages = channels.downstream.subscribe();
    let stats = channels.stats.clone();
    stats.subscribers_connected.fetch_add(1, Ordering::Relaxed);

    let (mut reader, writer) = stream.into_split();
    // Updated here, read by the writer when each message arrives
    let (subscriptions, watched) = watch::channel(Subscriptions::new());
    let writer_task = tokio::spawn(forward_messages(
        writer,
        messages,
        watched,
        peer_addr,
        stats.clone(),
    ));

    while let Some(frame) = next_inbound(&mut reader, peer_addr, &cancel).await {
        match RelayFrame::decode(&frame) {
            Ok(RelayFrame { kind: FrameKind::Subscribe, topic, .. }) => {
                subscriptions.send_modify(|subs| subs.subscribe(&topic));
                stats.control_frames.fetch_add(1, Ordering::Relaxed);
                debug!("{} subscribed to {:?}", peer_addr, topic);
                // No producers connected is fine
                let _ = channels.upstream.send(frame);
            }
            Ok(RelayFrame { kind: FrameKind::Unsubscribe, topic, .. }) => {
                subscriptions.send_modify(|subs| {
                    subs.unsubscribe(&topic);
                });
                stats.control_frames.fetch_add(1, Ordering::Relaxed);
                debug!("{} unsubscribed from {:?}", peer_addr, topic);
                let _ = channels.upstream.send(frame);
            }
            Ok(other) => {
                stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring {:?} frame from subscriber {}", other.kind, peer_addr);
            }
            Err(e) => {
                stats.invalid_frames.fetch_add(1, Ordering::Relaxed);
                warn!("Undecodable frame from subscriber {}: {}", peer_addr, e);
            }
        }
    }

    writer_task.abort();
    stats.subscribers_connected.fetch_sub(1, Ordering::Relaxed);
    debug!("Subscriber {} closed", peer_addr);
}
