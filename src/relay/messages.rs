//! Relay frames
//!
//! Producers send `publish` frames; consumers send `subscribe` and
//! `unsubscribe` frames. The broker reads only `kind` and `topic` and
//! forwards the original bytes.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub kind: FrameKind,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Bytes::is_empty")]
    pub payload: Bytes,
}

impl RelayFrame {
    pub fn publish(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Publish,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Subscribe,
            topic: topic.into(),
            payload: Bytes::new(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Unsubscribe,
            topic: topic.into(),
            payload: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// A published frame in flight from producers to subscriber connections
#[derive(Clone, Debug)]
pub struct RelayMessage {
    pub topic: String,
    /// The frame exactly as the producer sent it
    pub frame: Bytes,
}

/// Prefix subscriptions held by one subscriber connection.
///
/// A multiset: subscribing twice needs two unsubscribes. The empty prefix
/// matches every topic.
#[derive(Clone, Debug, Default)]
pub struct Subscriptions {
    prefixes: Vec<String>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, prefix: &str) {
        self.prefixes.push(prefix.to_string());
    }

    /// Remove one matching subscription; `false` when there was none
    pub fn unsubscribe(&mut self, prefix: &str) -> bool {
        match self.prefixes.iter().position(|p| p == prefix) {
            Some(index) => {
                self.prefixes.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.prefixes.iter().any(|prefix| topic.starts_with(prefix.as_str()))
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}
