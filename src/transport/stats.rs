//! Counters shared between connection tasks, readable as plain snapshots.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics for a listening side
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub connections_accepted: AtomicU64,
    pub messages_received: AtomicU64,
    pub receive_errors: AtomicU64,
    pub idle_disconnects: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenReceiverStats {
    pub connections_accepted: u64,
    pub messages_received: u64,
    pub receive_errors: u64,
    pub idle_disconnects: u64,
}

impl ReceiverStats {
    pub fn freeze(&self) -> FrozenReceiverStats {
        FrozenReceiverStats {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            idle_disconnects: self.idle_disconnects.load(Ordering::Relaxed),
        }
    }
}
