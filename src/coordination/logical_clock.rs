use std::sync::atomic::{AtomicU64, Ordering};

/// LogicalClock orders events across processes without trusting wall clocks.
///
/// The counter only moves forward: `tick` before every outbound message,
/// `observe` with the sender's value right after every inbound one. Both
/// operations are atomic, so one clock can be shared by several tasks.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    /// Create a clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `value`
    pub fn starting_at(value: u64) -> Self {
        Self {
            counter: AtomicU64::new(value),
        }
    }

    /// Advance for an outbound message and return the value to stamp on it
    pub fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a received clock value: `max(local, received) + 1`
    pub fn observe(&self, received: u64) -> u64 {
        let previous = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.max(received).saturating_add(1))
            })
            .unwrap_or_else(|current| current);
        previous.max(received).saturating_add(1)
    }

    /// Current value without advancing
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
