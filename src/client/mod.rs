//! Clients used by chat servers and the admin tool
pub mod coordination_client;
pub mod heartbeat;
pub mod relay_client;

pub use coordination_client::CoordinationClient;
pub use heartbeat::{determine_coordinator, FleetView, HeartbeatAgent};
pub use relay_client::{Publication, RelayPublisher, RelaySubscriber};
