//! TCP Transport Module
//!
//! Length-prefixed frames over TCP. The coordinator uses the request/response
//! receiver; the relay broker accepts long-lived duplex streams; clients use
//! [`TcpConnection`] for both.

pub mod framing;
pub mod stats;
pub mod tcp_connection;
pub mod tcp_receiver;

pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use stats::{FrozenReceiverStats, ReceiverStats};
pub use tcp_connection::TcpConnection;
pub use tcp_receiver::{TcpReceiver, TcpRequest};

/// Accept errors that concern a single half-open connection rather than the
/// listening socket
pub fn is_transient_accept_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_errors() {
        let aborted = std::io::Error::from(std::io::ErrorKind::ConnectionAborted);
        assert!(is_transient_accept_error(&aborted));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!is_transient_accept_error(&denied));
    }
}
