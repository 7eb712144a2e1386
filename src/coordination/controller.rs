//! Coordinator main loop
//!
//! One task owns the [`CoordinationService`]. Network requests arrive from
//! the TCP receiver, in-process queries (status API, eviction timer) arrive
//! as [`CoordinatorCommand`]s, and the loop handles them strictly one at a
//! time, so registry state needs no locks.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::messages::ServerEntry;
use super::registry::{ServerRegistry, TimeSource};
use super::service::{CoordinationService, ServiceStats};
use super::store::SnapshotStore;
use crate::error::{MurmurError, Result};
use crate::settings::Settings;
use crate::transport::{FrozenReceiverStats, ReceiverStats, TcpReceiver, TcpRequest};

const REQUEST_QUEUE: usize = 256;
const COMMAND_QUEUE: usize = 64;

/// Commands handled by the coordinator loop alongside network requests
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Currently active servers, ordered by rank
    ActiveServers {
        resp_chan: oneshot::Sender<Vec<ServerEntry>>,
    },
    /// Service counters
    Stats {
        resp_chan: oneshot::Sender<ServiceStats>,
    },
    /// Evict servers outside the stale window
    EvictStale,
}

/// Cloneable handle for talking to a running coordinator loop
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    command_tx: mpsc::Sender<CoordinatorCommand>,
    receiver_stats: Arc<ReceiverStats>,
}

impl CoordinatorHandle {
    pub async fn active_servers(&self) -> Result<Vec<ServerEntry>> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorCommand::ActiveServers { resp_chan: tx })
            .await?;
        rx.await
            .map_err(|e| MurmurError::Concurrency(format!("Coordinator dropped reply: {}", e)))
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorCommand::Stats { resp_chan: tx }).await?;
        rx.await
            .map_err(|e| MurmurError::Concurrency(format!("Coordinator dropped reply: {}", e)))
    }

    pub async fn evict_stale(&self) -> Result<()> {
        self.send(CoordinatorCommand::EvictStale).await
    }

    /// Connection-level counters of the coordinator listener
    pub fn receiver_stats(&self) -> FrozenReceiverStats {
        self.receiver_stats.freeze()
    }

    async fn send(&self, command: CoordinatorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| MurmurError::Concurrency("Coordinator is not running".to_string()))
    }
}

pub struct CoordinatorServer {
    service: CoordinationService,
    receiver: TcpReceiver,
    command_tx: mpsc::Sender<CoordinatorCommand>,
    command_rx: mpsc::Receiver<CoordinatorCommand>,
    eviction_interval: Duration,
}

impl CoordinatorServer {
    /// Restore the registry and bind the coordinator listener
    pub async fn bind(
        settings: &Settings,
        store: Arc<dyn SnapshotStore>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let registry = ServerRegistry::load(store, time).await;
        let service = CoordinationService::new(registry, settings.registry_windows());
        let receiver = TcpReceiver::new(settings.coordinator_addr()?, settings.idle_timeout()).await?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        Ok(Self {
            service,
            receiver,
            command_tx,
            command_rx,
            eviction_interval: settings.eviction_interval(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.receiver.local_addr()
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            command_tx: self.command_tx.clone(),
            receiver_stats: self.receiver.stats(),
        }
    }

    /// Serve until `cancel` fires or the listener fails.
    ///
    /// The registry snapshot is flushed on the way out either way. A listener
    /// failure is returned as the error.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let CoordinatorServer {
            mut service,
            receiver,
            command_tx,
            mut command_rx,
            eviction_interval,
        } = self;

        let shutdown = cancel.child_token();
        let local_addr = receiver.local_addr();
        let (request_tx, mut request_rx) = mpsc::channel::<TcpRequest>(REQUEST_QUEUE);
        let mut listener = receiver.start(request_tx, shutdown.clone());
        let scheduler = spawn_eviction_scheduler(eviction_interval, command_tx, shutdown.clone());

        info!("Coordinator serving on {}", local_addr);
        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Coordinator on {} shutting down", local_addr);
                    break Ok(());
                }
                joined = &mut listener => {
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => {
                            error!("Coordinator listener failed: {}", e);
                            Err(e)
                        }
                        Err(e) => Err(MurmurError::Concurrency(format!(
                            "Coordinator listener task failed: {}",
                            e
                        ))),
                    };
                }
                Some(request) = request_rx.recv() => {
                    let response = service.handle_bytes(&request.data).await;
                    if request.response_tx.send(response).is_err() {
                        debug!("Client {} left before its response", request.peer_addr);
                    }
                }
                Some(command) = command_rx.recv() => {
                    handle_command(&mut service, command).await;
                }
            }
        };

        shutdown.cancel();
        if let Err(e) = scheduler.await {
            debug!("Eviction scheduler ended abnormally: {}", e);
        }
        service.flush().await;
        info!("Coordinator stopped, registry snapshot flushed");
        outcome
    }
}

async fn handle_command(service: &mut CoordinationService, command: CoordinatorCommand) {
    match command {
        CoordinatorCommand::ActiveServers { resp_chan } => {
            let _ = resp_chan.send(service.active_servers());
        }
        CoordinatorCommand::Stats { resp_chan } => {
            let _ = resp_chan.send(service.stats());
        }
        CoordinatorCommand::EvictStale => {
            let evicted = service.evict_stale().await;
            if !evicted.is_empty() {
                info!("Evicted {} stale servers", evicted.len());
            }
        }
    }
}

/// Periodically ask the coordinator loop to evict stale servers
fn spawn_eviction_scheduler(
    interval: Duration,
    command_tx: mpsc::Sender<CoordinatorCommand>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        timer.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    if command_tx.send(CoordinatorCommand::EvictStale).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Eviction scheduler stopped");
    })
}
