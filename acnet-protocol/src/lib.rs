//! # acnet-protocol
//!
//! Wire-level types for the ACNET gateway protocol.
//!
//! This crate provides:
//! - RAD50 packing of six-character symbols into 32-bit integers
//! - Signed 16-bit status values with facility/error-code decomposition
//! - The binary command and reply frames exchanged with the gateway

pub mod frame;
pub mod rad50;
pub mod status;

pub use frame::{Reply, ReplyFrame};
pub use status::Status;

/// WebSocket sub-protocol token offered during the gateway handshake.
pub const SUB_PROTOCOL: &str = "acnet-client";

/// Sentinel node name mapping to trunk/node address 0 without a lookup.
pub const LOCAL_NODE_NAME: &str = "LOCAL";

/// Trunk/node address of the sentinel `"LOCAL"` node.
pub const LOCAL_NODE_ADDR: u16 = 0;
