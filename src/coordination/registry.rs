//! Server registry: identity -> rank + liveness
//!
//! Owned by the coordination service loop; nothing else mutates it. The
//! complete state is flushed to the snapshot store after every new
//! registration and every eviction. Heartbeats only touch memory.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::messages::ServerEntry;
use super::store::{RegistryState, ServerRecord, SnapshotStore};

/// Wall-clock source in epoch seconds
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Settable clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    bits: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(now: f64) -> Self {
        Self {
            bits: AtomicU64::new(now.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.set(self.now() + by.as_secs_f64());
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

pub struct ServerRegistry {
    state: RegistryState,
    store: Arc<dyn SnapshotStore>,
    time: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.state.servers.len())
            .field("next_rank", &self.state.next_rank)
            .finish()
    }
}

impl ServerRegistry {
    /// Restore the registry from `store`.
    ///
    /// A missing snapshot starts an empty registry. So does an unreadable one,
    /// after logging, since refusing to start would take the whole fleet's
    /// coordination down with it.
    pub async fn load(store: Arc<dyn SnapshotStore>, time: Arc<dyn TimeSource>) -> Self {
        let state = match store.load().await {
            Ok(Some(mut state)) => {
                if state.repair_next_rank() {
                    warn!(
                        "Snapshot rank counter was behind its records, raised to {}",
                        state.next_rank
                    );
                }
                info!(
                    "Restored {} servers from snapshot, next rank {}",
                    state.servers.len(),
                    state.next_rank
                );
                state
            }
            Ok(None) => {
                info!("No registry snapshot found, starting empty");
                RegistryState::default()
            }
            Err(e) => {
                error!("Failed to load registry snapshot, starting empty: {}", e);
                RegistryState::default()
            }
        };

        Self { state, store, time }
    }

    /// Current wall-clock time from the registry's time source
    pub fn now(&self) -> f64 {
        self.time.now()
    }

    /// Return the rank for `identity`, assigning the next one on first sight
    pub async fn register(&mut self, identity: &str) -> u64 {
        let now = self.time.now();
        if let Some(record) = self.state.servers.get_mut(identity) {
            record.last_heartbeat = now;
            debug!("Re-registered {} with rank {}", identity, record.rank);
            return record.rank;
        }

        let rank = self.state.next_rank;
        self.state.next_rank += 1;
        self.state.servers.insert(
            identity.to_string(),
            ServerRecord {
                rank,
                last_heartbeat: now,
            },
        );
        info!("Registered {} with rank {}", identity, rank);
        self.save().await;
        rank
    }

    /// Refresh liveness; `false` when the identity never registered or was evicted
    pub fn heartbeat(&mut self, identity: &str) -> bool {
        match self.state.servers.get_mut(identity) {
            Some(record) => {
                record.last_heartbeat = self.time.now();
                true
            }
            None => {
                warn!("Heartbeat from unregistered server {}", identity);
                false
            }
        }
    }

    /// Servers heard from within `window` of `now`, ordered by rank
    pub fn active_list(&self, now: f64, window: Duration) -> Vec<ServerEntry> {
        let window = window.as_secs_f64();
        let mut active: Vec<ServerEntry> = self
            .state
            .servers
            .iter()
            .filter(|(_, record)| now - record.last_heartbeat < window)
            .map(|(identity, record)| ServerEntry {
                identity: identity.clone(),
                rank: record.rank,
            })
            .collect();
        active.sort_by_key(|entry| entry.rank);
        active
    }

    /// Drop servers silent for longer than `window`; returns the evicted identities
    pub async fn evict_stale(&mut self, now: f64, window: Duration) -> Vec<String> {
        let window = window.as_secs_f64();
        let stale: Vec<String> = self
            .state
            .servers
            .iter()
            .filter(|(_, record)| now - record.last_heartbeat > window)
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &stale {
            if let Some(record) = self.state.servers.remove(identity) {
                warn!(
                    "Evicted {} (rank {}), silent for {:.0}s",
                    identity,
                    record.rank,
                    now - record.last_heartbeat
                );
            }
            self.save().await;
        }
        stale
    }

    /// Flush the current state; failures are logged and otherwise ignored
    pub async fn save(&self) {
        if let Err(e) = self.store.save(&self.state).await {
            error!("Failed to persist registry snapshot: {}", e);
        }
    }

    pub fn get(&self, identity: &str) -> Option<&ServerRecord> {
        self.state.servers.get(identity)
    }

    pub fn len(&self) -> usize {
        self.state.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.servers.is_empty()
    }

    pub fn next_rank(&self) -> u64 {
        self.state.next_rank
    }
}
