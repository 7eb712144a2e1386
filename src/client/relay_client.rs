//! Producer and consumer ends of the relay
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::coordination::LogicalClock;
use crate::error::Result;
use crate::relay::{FrameKind, RelayFrame};
use crate::transport::TcpConnection;
use crate::protocol_error;

/// Chat message body carried as a relay payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub user: String,
    pub message: String,
    pub timestamp: i64,
    pub clock: u64,
}

impl Publication {
    /// Stamp a new message with wall time and a fresh tick of `clock`
    pub fn stamped(user: impl Into<String>, message: impl Into<String>, clock: &LogicalClock) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp(),
            clock: clock.tick(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// Connection to the broker's publish side
#[derive(Debug)]
pub struct RelayPublisher {
    connection: TcpConnection,
}

impl RelayPublisher {
    pub async fn connect(target: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            connection: TcpConnection::connect(target, connect_timeout).await?,
        })
    }

    pub async fn publish(&mut self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        let frame = RelayFrame::publish(topic, payload);
        self.connection.send_frame(&frame.encode()?).await
    }

    /// Next subscribe/unsubscribe frame forwarded from the subscriber side
    pub async fn next_control(&mut self) -> Result<RelayFrame> {
        let frame = RelayFrame::decode(&self.connection.recv_frame().await?)?;
        match frame.kind {
            FrameKind::Subscribe | FrameKind::Unsubscribe => Ok(frame),
            FrameKind::Publish => Err(protocol_error!(
                "broker forwarded a publish frame to a publisher"
            )),
        }
    }
}

/// Connection to the broker's subscribe side
#[derive(Debug)]
pub struct RelaySubscriber {
    connection: TcpConnection,
}

impl RelaySubscriber {
    pub async fn connect(target: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            connection: TcpConnection::connect(target, connect_timeout).await?,
        })
    }

    /// Receive topics starting with `prefix`; the empty prefix receives everything
    pub async fn subscribe(&mut self, prefix: &str) -> Result<()> {
        let frame = RelayFrame::subscribe(prefix);
        self.connection.send_frame(&frame.encode()?).await
    }

    pub async fn unsubscribe(&mut self, prefix: &str) -> Result<()> {
        let frame = RelayFrame::unsubscribe(prefix);
        self.connection.send_frame(&frame.encode()?).await
    }

    /// Wait for the next published frame matching one of our subscriptions
    pub async fn next_message(&mut self) -> Result<RelayFrame> {
        let frame = RelayFrame::decode(&self.connection.recv_frame().await?)?;
        if frame.kind != FrameKind::Publish {
            return Err(protocol_error!("expected a publish frame, got {:?}", frame.kind));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publication_stamps_clock() {
        let clock = LogicalClock::starting_at(4);
        let publication = Publication::stamped("bot_1234", "hello", &clock);

        assert_eq!(publication.clock, 5);
        assert_eq!(clock.current(), 5);
        assert!(publication.timestamp > 0);
    }

    #[test]
    fn test_publication_field_names() {
        let clock = LogicalClock::new();
        let bytes = Publication::stamped("alice", "hi", &clock).encode().unwrap();
        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(value["user"], "alice");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["clock"], 1);
    }
}
