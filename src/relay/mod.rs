//! Publish/subscribe relay between chat producers and consumers
pub mod broker;
pub mod messages;

pub use broker::{FrozenRelayStats, RelayBroker, RelayStats};
pub use messages::{FrameKind, RelayFrame, RelayMessage, Subscriptions};
