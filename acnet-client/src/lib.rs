//! # acnet-client
//!
//! Client library for the ACNET control-system gateway.
//!
//! This crate provides:
//! - A self-reconnecting WebSocket connection to a local gateway
//! - Frame dispatch: FIFO command acknowledgements and per-request
//!   reply streams multiplexed over one transport
//! - Node name/address lookups and single or streaming request/reply
//! - Level-II diagnostic helpers (ping, versions, task enumeration)

pub mod client;
pub mod connection;
pub mod error;
pub mod level2;
mod task;
mod transport;

pub use acnet_protocol::{Reply, Status};
pub use client::{Client, ReplyStream};
pub use connection::{
    ClientConfig, Connection, ConnectionState, DEFAULT_REQUEST_TIMEOUT, RECONNECT_DELAY,
};
pub use error::ClientError;
pub use level2::TaskInfo;
