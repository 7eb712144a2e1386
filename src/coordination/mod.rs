//! Coordination: logical clock, server registry and the rank/list/heartbeat service
pub mod controller;
pub mod logical_clock;
pub mod messages;
pub mod registry;
pub mod service;
pub mod store;

pub use controller::{CoordinatorCommand, CoordinatorHandle, CoordinatorServer};
pub use logical_clock::LogicalClock;
pub use messages::{
    CoordinationRequest, CoordinationResponse, RequestData, ResponseData, ServerEntry, Service,
};
pub use registry::{ManualTimeSource, ServerRegistry, SystemTimeSource, TimeSource};
pub use service::{CoordinationService, ServiceReply, ServiceStats};
pub use store::{JsonFileStore, MemoryStore, RegistryState, ServerRecord, SnapshotStore};
