//! Coordination wire protocol
//!
//! Requests and responses share the `{service, data}` envelope and travel as
//! MessagePack maps keyed by field name, so peers written against the
//! `{"service": ..., "data": {...}}` shape decode them without a schema.
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Services offered by the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    Rank,
    List,
    Heartbeat,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Rank => "rank",
            Service::List => "list",
            Service::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rank" => Ok(Service::Rank),
            "list" => Ok(Service::List),
            "heartbeat" => Ok(Service::Heartbeat),
            other => Err(other.to_string()),
        }
    }
}

/// Service name used in replies to frames that could not be decoded at all
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Status string returned by a successful heartbeat
pub const STATUS_OK: &str = "OK";

/// One server in a `list` reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(alias = "name")]
    pub identity: String,
    pub rank: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    /// Server identity; older peers send it as `user`
    #[serde(default, alias = "user", skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub clock: u64,
}

/// Request envelope. `service` stays a string so unknown names can be echoed back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub service: String,
    #[serde(default)]
    pub data: RequestData,
}

impl CoordinationRequest {
    pub fn new(service: Service, identity: Option<&str>, timestamp: i64, clock: u64) -> Self {
        Self {
            service: service.as_str().to_string(),
            data: RequestData {
                identity: identity.map(str::to_string),
                timestamp: Some(timestamp),
                clock,
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// Response payload. Only `timestamp` and `clock` are always present; an
/// `error` marks the degraded shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<ServerEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    pub clock: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinationResponse {
    pub service: String,
    pub data: ResponseData,
}

impl CoordinationResponse {
    pub fn is_error(&self) -> bool {
        self.data.error.is_some()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
