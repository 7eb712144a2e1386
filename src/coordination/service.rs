//! Coordination request handling
//!
//! Every request is merged into the logical clock before dispatch and every
//! reply is stamped with a fresh tick after it. Handlers return `Result`;
//! success and failure both leave as the same `{service, data}` envelope.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::logical_clock::LogicalClock;
use super::messages::{
    CoordinationRequest, CoordinationResponse, ResponseData, ServerEntry, Service, STATUS_OK,
    UNKNOWN_SERVICE,
};
use super::registry::ServerRegistry;
use crate::error::{MurmurError, Result};
use crate::protocol_error;
use crate::settings::RegistryWindows;

/// Pre-encoded `{"service": "unknown", "data": {"error": "internal error",
/// "timestamp": 0, "clock": 0}}`, sent when no envelope can be encoded
const BARE_ERROR_ENVELOPE: &[u8] = b"\x82\xa7service\xa7unknown\xa4data\x83\xa5error\xaeinternal error\xa9timestamp\x00\xa5clock\x00";

/// Successful outcome of one service call
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceReply {
    Rank(u64),
    List(Vec<ServerEntry>),
    Heartbeat,
}

/// Point-in-time view of the service for the status API
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub servers: usize,
    pub active_servers: usize,
    pub next_rank: u64,
    pub clock: u64,
    pub requests_handled: u64,
}

#[derive(Debug)]
pub struct CoordinationService {
    clock: Arc<LogicalClock>,
    registry: ServerRegistry,
    windows: RegistryWindows,
    requests_handled: u64,
}

impl CoordinationService {
    pub fn new(registry: ServerRegistry, windows: RegistryWindows) -> Self {
        Self::with_clock(registry, windows, Arc::new(LogicalClock::new()))
    }

    pub fn with_clock(
        registry: ServerRegistry,
        windows: RegistryWindows,
        clock: Arc<LogicalClock>,
    ) -> Self {
        Self {
            clock,
            registry,
            windows,
            requests_handled: 0,
        }
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Decode, handle and encode one frame. Always produces a reply body.
    pub async fn handle_bytes(&mut self, frame: &[u8]) -> Vec<u8> {
        let response = self.handle_frame(frame).await;
        match response.encode() {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode {} response: {}", response.service, e);
                let fallback = self.error_response(response.service, &e);
                fallback.encode().unwrap_or_else(|e| {
                    error!("Failed to encode error response, sending bare envelope: {}", e);
                    BARE_ERROR_ENVELOPE.to_vec()
                })
            }
        }
    }

    /// Handle one raw frame; undecodable bodies get an `unknown` error envelope
    pub async fn handle_frame(&mut self, frame: &[u8]) -> CoordinationResponse {
        match CoordinationRequest::decode(frame) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                self.requests_handled += 1;
                warn!("Undecodable coordination request: {}", e);
                self.clock.observe(0);
                self.error_response(UNKNOWN_SERVICE.to_string(), &protocol_error!(e))
            }
        }
    }

    pub async fn handle(&mut self, request: CoordinationRequest) -> CoordinationResponse {
        self.requests_handled += 1;
        self.clock.observe(request.data.clock);
        debug!(
            "Handling {} request (clock {})",
            request.service, request.data.clock
        );

        let service = request.service.clone();
        let result = self.dispatch(request).await;
        let timestamp = self.timestamp();

        match result {
            Ok(reply) => {
                let mut data = ResponseData {
                    timestamp,
                    clock: self.clock.tick(),
                    ..ResponseData::default()
                };
                match reply {
                    ServiceReply::Rank(rank) => data.rank = Some(rank),
                    ServiceReply::List(list) => data.list = Some(list),
                    ServiceReply::Heartbeat => data.status = Some(STATUS_OK.to_string()),
                }
                CoordinationResponse { service, data }
            }
            Err(e) => {
                debug!("{} request failed: {}", service, e);
                self.error_response(service, &e)
            }
        }
    }

    async fn dispatch(&mut self, request: CoordinationRequest) -> Result<ServiceReply> {
        let service = request
            .service
            .parse::<Service>()
            .map_err(MurmurError::UnknownService)?;

        match service {
            Service::Rank => {
                let identity = required_identity(&request)?;
                Ok(ServiceReply::Rank(self.registry.register(identity).await))
            }
            Service::List => Ok(ServiceReply::List(self.active_servers())),
            Service::Heartbeat => {
                let identity = required_identity(&request)?;
                // Unknown servers are warned about by the registry but still acknowledged
                self.registry.heartbeat(identity);
                Ok(ServiceReply::Heartbeat)
            }
        }
    }

    fn error_response(&self, service: String, err: &MurmurError) -> CoordinationResponse {
        let list = match service.parse::<Service>() {
            Ok(Service::List) => Some(Vec::new()),
            _ => None,
        };
        CoordinationResponse {
            service,
            data: ResponseData {
                list,
                error: Some(err.to_string()),
                timestamp: self.timestamp(),
                clock: self.clock.tick(),
                ..ResponseData::default()
            },
        }
    }

    fn timestamp(&self) -> i64 {
        self.registry.now() as i64
    }

    /// Servers inside the active window right now
    pub fn active_servers(&self) -> Vec<ServerEntry> {
        self.registry
            .active_list(self.registry.now(), self.windows.active)
    }

    /// Evict servers outside the stale window
    pub async fn evict_stale(&mut self) -> Vec<String> {
        let now = self.registry.now();
        self.registry.evict_stale(now, self.windows.stale).await
    }

    /// Flush the registry snapshot
    pub async fn flush(&self) {
        self.registry.save().await
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            servers: self.registry.len(),
            active_servers: self.active_servers().len(),
            next_rank: self.registry.next_rank(),
            clock: self.clock.current(),
            requests_handled: self.requests_handled,
        }
    }
}

fn required_identity(request: &CoordinationRequest) -> Result<&str> {
    match request.data.identity.as_deref().map(str::trim) {
        Some(identity) if !identity.is_empty() => Ok(identity),
        _ => Err(protocol_error!(
            "{} request is missing an identity",
            request.service
        )),
    }
}
