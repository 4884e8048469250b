//! RPC surface of the federation log
//!
//! One remote procedure exists in either direction: "apply the record at
//! this index". The outbound side ([`DeliveryClient`]) pushes records to a
//! zone's endpoint list with bounded timeouts; the inbound side
//! ([`server::serve_records`]) receives them and routes them into the local
//! engine. Both ends speak the framed bincode protocol in [`protocol`].

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{DeliveryClient, DeliveryOutcome};
pub use protocol::{RecordMessage, RecordMessageType};
pub use server::{serve_records, RecordSink};
pub use transport::{ApplyAck, RecordTransport, TcpTransport};
