//! Transport seam for the "apply record" remote procedure

use crate::config::FederationConfig;
use crate::rpc::protocol::RecordMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Response to one "apply record" call.
///
/// `last_index` is always the responder's authoritative last applied
/// index; `applied == false` means the record was not taken at the sent
/// index and the sender should resynchronize from `last_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyAck {
    pub applied: bool,
    pub last_index: u64,
}

/// One remote "apply record" call against a single endpoint.
///
/// Implementations are stateless between calls; retry, endpoint iteration
/// and timeouts live in [`crate::rpc::DeliveryClient`].
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Deliver `command` at `index` to the endpoint at `addr`
    async fn apply_record(&self, addr: &str, index: u64, command: &str) -> Result<ApplyAck>;
}

/// TCP transport speaking the framed record protocol
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a TCP transport with the given connection timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Create a TCP transport from the engine configuration
    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(config.connect_timeout)
    }
}

#[async_trait]
impl RecordTransport for TcpTransport {
    async fn apply_record(&self, addr: &str, index: u64, command: &str) -> Result<ApplyAck> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::network(format!("Connection to {} timed out", addr)))?
            .map_err(|e| Error::network(format!("Connection to {} failed: {}", addr, e)))?;

        let request = RecordMessage::ApplyRecord {
            index,
            command: command.to_string(),
        };
        request.write_to(&mut stream).await?;

        match RecordMessage::read_from(&mut stream).await? {
            RecordMessage::ApplyAck {
                applied,
                last_index,
            } => Ok(ApplyAck {
                applied,
                last_index,
            }),
            RecordMessage::Error { code, message } => Err(Error::network(format!(
                "Zone endpoint {} rejected record {}: {} (code {})",
                addr, index, message, code
            ))),
            _ => Err(Error::network(format!(
                "Unexpected response from {}",
                addr
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_uses_connect_timeout() {
        let config =
            FederationConfig::default().with_connect_timeout(Duration::from_millis(250));
        let transport = TcpTransport::from_config(&config);
        assert_eq!(transport.connect_timeout, Duration::from_millis(250));
    }
}
