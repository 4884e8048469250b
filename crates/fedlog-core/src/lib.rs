//! fedlog-core - Federated Command-Log Replication Engine
//!
//! This crate replicates a sequence of opaque administrative commands from
//! a federation master to a set of zone followers, giving every zone an
//! eventually-identical, ordered view of the command log:
//! - Durable indexed log of committed commands (LMDB)
//! - One delivery worker per zone: send, acknowledge, retry, resynchronize
//! - Gap detection and cursor rewind for lagging or diverged zones
//! - Membership-driven worker lifecycle and retention-bounded log purge
//!
//! # Architecture
//!
//! ```text
//! replicate(cmd)                                 apply_record(i, cmd)
//!       │                                                ▲
//! ┌─────┴───────────┐    deliver(i, cmd)       ┌─────────┴─────────┐
//! │     Master      │ ───────────────────────► │      Zone 1       │
//! │ FederationMgr   │      ApplyAck(last)      └───────────────────┘
//! │  ┌───────────┐  │ ───────────────────────► ┌───────────────────┐
//! │  │ LogStore  │  │    one worker per zone   │      Zone 2       │
//! │  └───────────┘  │                          └───────────────────┘
//! └─────────────────┘
//! ```
//!
//! Within one zone, records are delivered and applied strictly in index
//! order; across zones there is no ordering relationship. A follower that
//! reports a gap is not failing - its answer carries the authoritative
//! last applied index and the master rewinds that zone's cursor to it.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod worker;

pub use config::FederationConfig;
pub use error::{Error, Result};
pub use manager::{ApplyCallback, FederationManager, FederationStats};
pub use registry::{MembershipPlan, ZoneDescriptor, ZoneId, ZoneState};
pub use rpc::{
    serve_records, ApplyAck, DeliveryClient, DeliveryOutcome, RecordMessage, RecordSink,
    RecordTransport, TcpTransport,
};
pub use store::LogStore;
