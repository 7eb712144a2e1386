use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the murmur coordination and relay services
#[derive(Debug)]
pub enum MurmurError {
    /// Configuration or CLI argument errors
    Config(String),

    /// A request that could not be understood (missing fields, bad envelope)
    Protocol(String),

    /// A request naming a service the coordinator does not offer
    UnknownService(String),

    /// Snapshot load/save failures
    Persistence(String),

    /// Error envelope returned by a remote coordinator
    Remote(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Transport layer errors
    Transport(String),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// A service loop or channel went away
    Concurrency(String),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors (snapshots, HTTP)
    Json(serde_json::Error),

    /// MessagePack encoding errors (wire envelopes)
    MsgPackEncode(rmp_serde::encode::Error),

    /// MessagePack decoding errors (wire envelopes)
    MsgPackDecode(rmp_serde::decode::Error),
}

impl fmt::Display for MurmurError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MurmurError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MurmurError::Protocol(msg) => write!(f, "Malformed request: {}", msg),
            MurmurError::UnknownService(service) => write!(f, "Unknown service: {}", service),
            MurmurError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            MurmurError::Remote(msg) => write!(f, "Remote error: {}", msg),
            MurmurError::Io(err) => write!(f, "I/O error: {}", err),
            MurmurError::Transport(msg) => write!(f, "Transport error: {}", msg),
            MurmurError::Serialization(err) => write!(f, "Serialization error: {}", err),
            MurmurError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
            SerializationError::MsgPackEncode(err) => write!(f, "MessagePack encode: {}", err),
            SerializationError::MsgPackDecode(err) => write!(f, "MessagePack decode: {}", err),
        }
    }
}

impl std::error::Error for MurmurError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MurmurError::Io(err) => Some(err),
            MurmurError::Serialization(err) => err.source(),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
            SerializationError::MsgPackEncode(err) => Some(err),
            SerializationError::MsgPackDecode(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, MurmurError>;

impl MurmurError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            MurmurError::Config(_) => StatusCode::BAD_REQUEST,
            MurmurError::Protocol(_) => StatusCode::BAD_REQUEST,
            MurmurError::UnknownService(_) => StatusCode::NOT_FOUND,
            MurmurError::Remote(_) => StatusCode::BAD_GATEWAY,
            MurmurError::Concurrency(_) => StatusCode::SERVICE_UNAVAILABLE,
            MurmurError::Persistence(_)
            | MurmurError::Io(_)
            | MurmurError::Transport(_)
            | MurmurError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            MurmurError::Config(_) => "configuration_error",
            MurmurError::Protocol(_) => "protocol_error",
            MurmurError::UnknownService(_) => "unknown_service",
            MurmurError::Persistence(_) => "persistence_error",
            MurmurError::Remote(_) => "remote_error",
            MurmurError::Io(_) => "io_error",
            MurmurError::Transport(_) => "transport_error",
            MurmurError::Serialization(_) => "serialization_error",
            MurmurError::Concurrency(_) => "concurrency_error",
        }
    }
}

// Axum IntoResponse implementation for the status API
impl IntoResponse for MurmurError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for MurmurError {
    fn from(err: std::io::Error) -> Self {
        MurmurError::Io(err)
    }
}

impl From<serde_json::Error> for MurmurError {
    fn from(err: serde_json::Error) -> Self {
        MurmurError::Serialization(SerializationError::Json(err))
    }
}

impl From<rmp_serde::encode::Error> for MurmurError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        MurmurError::Serialization(SerializationError::MsgPackEncode(err))
    }
}

impl From<rmp_serde::decode::Error> for MurmurError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        MurmurError::Serialization(SerializationError::MsgPackDecode(err))
    }
}

impl From<SerializationError> for MurmurError {
    fn from(err: SerializationError) -> Self {
        MurmurError::Serialization(err)
    }
}

impl From<tokio::time::error::Elapsed> for MurmurError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MurmurError::Transport("Operation timed out".to_string())
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::MurmurError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MurmurError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::error::MurmurError::Protocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MurmurError::Protocol(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::MurmurError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MurmurError::Transport(format!($fmt, $($arg)*))
    };
}
