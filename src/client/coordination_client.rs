//! Requester side of the coordination protocol
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::coordination::{
    CoordinationRequest, CoordinationResponse, LogicalClock, ResponseData, ServerEntry, Service,
};
use crate::error::{MurmurError, Result};
use crate::protocol_error;
use crate::transport::TcpConnection;

/// Talks to the coordinator over one lazily opened connection.
///
/// Ticks its clock before every request and observes the clock of every
/// response. A failed exchange drops the connection; the next call reconnects.
#[derive(Debug)]
pub struct CoordinationClient {
    target: SocketAddr,
    request_timeout: Duration,
    clock: Arc<LogicalClock>,
    connection: Option<TcpConnection>,
}

impl CoordinationClient {
    pub fn new(target: SocketAddr, request_timeout: Duration) -> Self {
        Self::with_clock(target, request_timeout, Arc::new(LogicalClock::new()))
    }

    /// Share a clock with other components of the same process
    pub fn with_clock(target: SocketAddr, request_timeout: Duration, clock: Arc<LogicalClock>) -> Self {
        Self {
            target,
            request_timeout,
            clock,
            connection: None,
        }
    }

    pub fn clock(&self) -> Arc<LogicalClock> {
        self.clock.clone()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub async fn rank(&mut self, identity: &str) -> Result<u64> {
        let data = self.call(Service::Rank, Some(identity)).await?;
        data.rank
            .ok_or_else(|| protocol_error!("rank response carried no rank"))
    }

    pub async fn heartbeat(&mut self, identity: &str) -> Result<()> {
        self.call(Service::Heartbeat, Some(identity)).await?;
        Ok(())
    }

    pub async fn list(&mut self) -> Result<Vec<ServerEntry>> {
        let data = self.call(Service::List, None).await?;
        Ok(data.list.unwrap_or_default())
    }

    async fn call(&mut self, service: Service, identity: Option<&str>) -> Result<ResponseData> {
        let request = CoordinationRequest::new(
            service,
            identity,
            chrono::Utc::now().timestamp(),
            self.clock.tick(),
        );
        let body = request.encode()?;

        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => TcpConnection::connect(self.target, self.request_timeout).await?,
        };
        // Dropped on failure; a half-finished exchange leaves the stream unusable
        let reply = connection.request(&body).await?;
        self.connection = Some(connection);

        let response = CoordinationResponse::decode(&reply)?;
        self.clock.observe(response.data.clock);
        debug!(
            "{} answered {} (clock {})",
            self.target, response.service, response.data.clock
        );

        match response.data.error {
            Some(error) => Err(MurmurError::Remote(error)),
            None => Ok(response.data),
        }
    }
}
