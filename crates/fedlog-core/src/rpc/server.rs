//! Inbound record server
//!
//! The follower end of the protocol: accepts connections from the
//! federation master, reads `ApplyRecord` frames and routes them into the
//! local engine, answering each with an `ApplyAck` carrying this node's
//! authoritative last applied index.

use crate::rpc::protocol::RecordMessage;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Local entry point a received record is routed to
pub trait RecordSink: Send + Sync {
    /// Validate and apply the record, returning the node's last applied
    /// index afterwards (unchanged on duplicates and gaps)
    fn apply_record(&self, index: u64, command: &str) -> Result<u64>;
}

/// Accept connections and serve apply-record requests until cancelled
pub async fn serve_records(
    listener: TcpListener,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    tracing::info!("Record server listening on {}", local);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Record server on {} shutting down", local);
                return Ok(());
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::debug!("Master connected from {}", addr);
                        let sink = sink.clone();
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, sink, cancel).await {
                                tracing::debug!("Connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }
    }
}

/// Serve one master connection; each request frame gets one response frame
async fn serve_connection(
    mut stream: TcpStream,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            msg = RecordMessage::read_from(&mut stream) => msg?,
        };

        let response = match request {
            RecordMessage::ApplyRecord { index, command } => {
                match sink.apply_record(index, &command) {
                    Ok(last_index) => RecordMessage::ApplyAck {
                        applied: last_index == index,
                        last_index,
                    },
                    Err(e @ (Error::Apply(_) | Error::Storage(_))) => {
                        tracing::warn!("Record {} failed to apply: {}", index, e);
                        RecordMessage::Error {
                            code: 1,
                            message: e.to_string(),
                        }
                    }
                    Err(e) => {
                        tracing::error!("Record {} hit an unexpected error: {}", index, e);
                        RecordMessage::Error {
                            code: 2,
                            message: e.to_string(),
                        }
                    }
                }
            }
            other => {
                tracing::warn!("Unexpected request frame: {:?}", other.message_type());
                RecordMessage::Error {
                    code: 3,
                    message: "expected ApplyRecord".into(),
                }
            }
        };

        response.write_to(&mut stream).await?;
    }
}
