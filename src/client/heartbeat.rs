//! Keeps a chat server registered with the coordinator
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::coordination_client::CoordinationClient;
use crate::coordination::ServerEntry;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// The active list is refreshed on every n-th heartbeat
pub const LIST_REFRESH_EVERY: u64 = 3;

/// What this server currently knows about the fleet
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FleetView {
    pub rank: Option<u64>,
    pub servers: Vec<ServerEntry>,
    pub coordinator: Option<ServerEntry>,
}

/// The active server with the highest rank, ties going to the greatest identity.
/// With nobody else active the local server coordinates itself.
pub fn determine_coordinator(local: &ServerEntry, active: &[ServerEntry]) -> ServerEntry {
    active
        .iter()
        .max_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.identity.cmp(&b.identity)))
        .cloned()
        .unwrap_or_else(|| local.clone())
}

pub struct HeartbeatAgent {
    identity: String,
    client: CoordinationClient,
    interval: Duration,
    view_tx: watch::Sender<FleetView>,
}

impl HeartbeatAgent {
    pub fn new(identity: impl Into<String>, client: CoordinationClient, interval: Duration) -> Self {
        let (view_tx, _) = watch::channel(FleetView::default());
        Self {
            identity: identity.into(),
            client,
            interval,
            view_tx,
        }
    }

    /// Follow the fleet view as the agent updates it
    pub fn subscribe(&self) -> watch::Receiver<FleetView> {
        self.view_tx.subscribe()
    }

    /// Register, then heartbeat on every interval until cancelled.
    ///
    /// Registration is retried on each tick until it succeeds; failed
    /// heartbeats and list refreshes are logged and retried next time.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut timer = time::interval(self.interval);
        timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut heartbeats = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let registered = self.view_tx.borrow().rank;
            let Some(rank) = registered else {
                self.register().await;
                continue;
            };

            match self.client.heartbeat(&self.identity).await {
                Ok(()) => {
                    heartbeats += 1;
                    debug!("{} heartbeat {} sent", self.identity, heartbeats);
                }
                Err(e) => {
                    warn!("{} heartbeat failed: {}", self.identity, e);
                    continue;
                }
            }

            if heartbeats % LIST_REFRESH_EVERY == 0 {
                self.refresh(rank).await;
            }
        }
        info!("Heartbeat agent for {} stopped", self.identity);
    }

    async fn register(&mut self) {
        match self.client.rank(&self.identity).await {
            Ok(rank) => {
                info!("{} registered with rank {}", self.identity, rank);
                self.view_tx.send_modify(|view| view.rank = Some(rank));
                self.refresh(rank).await;
            }
            Err(e) => warn!("{} registration failed: {}", self.identity, e),
        }
    }

    async fn refresh(&mut self, rank: u64) {
        let servers = match self.client.list().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("{} could not refresh server list: {}", self.identity, e);
                return;
            }
        };

        let local = ServerEntry {
            identity: self.identity.clone(),
            rank,
        };
        let coordinator = determine_coordinator(&local, &servers);
        let changed = self.view_tx.borrow().coordinator.as_ref() != Some(&coordinator);
        if changed {
            info!(
                "{} now follows coordinator {} (rank {})",
                self.identity, coordinator.identity, coordinator.rank
            );
        }
        // Evicted while unreachable; heartbeats alone never bring us back
        let listed = servers.iter().any(|server| server.identity == self.identity);
        if !listed {
            warn!(
                "{} missing from the active list, registering again",
                self.identity
            );
        }
        self.view_tx.send_modify(|view| {
            view.servers = servers;
            view.coordinator = Some(coordinator);
            if !listed {
                view.rank = None;
            }
        });
    }
}
