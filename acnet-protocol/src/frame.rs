//! Binary frames exchanged with the gateway.
//!
//! Commands from the client carry an 8-byte header `(u16 kind, u16 1,
//! u32 handle)` in network byte order, followed by command-specific
//! arguments. Argument fields are little-endian except trunk/node
//! addresses, which stay big-endian on the wire.
//!
//! Frames from the gateway come in two shapes, discriminated by the
//! first two bytes: command acknowledgements (`00 02` lead, status at
//! offset 2, command-specific fields after) and network replies (20-byte
//! header, payload after).

use crate::status::Status;
use bytes::{BufMut, Bytes, BytesMut};

pub const CMD_CONNECT: u16 = 0x0001;
pub const CMD_CANCEL_REQUEST: u16 = 0x0008;
pub const CMD_NODE_ADDRESS: u16 = 0x000b;
pub const CMD_NODE_NAME: u16 = 0x000c;
pub const CMD_LOCAL_NODE: u16 = 0x000d;
pub const CMD_SEND_REQUEST: u16 = 0x0012;

/// Flag value marking the final reply of a request.
pub const REPLY_FLAG_LAST: u16 = 4;
/// Flag value marking a reply with more to follow.
pub const REPLY_FLAG_MORE: u16 = 5;

/// Length of the network reply header; the payload follows it.
pub const REPLY_HEADER_LEN: usize = 20;

/// Synthetic acknowledgement used to fail pending commands when the
/// transport drops. Parses to a status with facility 0xDE, error code 1.
pub const NACK_DISCONNECT: [u8; 4] = [0x00, 0x00, 0xde, 0x01];

fn header(buf: &mut BytesMut, kind: u16, handle: u32) {
    buf.put_u16(kind);
    buf.put_u16(1);
    buf.put_u32(handle);
}

/// The fixed 18-byte connect command; the gateway assigns the handle.
pub fn connect() -> Vec<u8> {
    let mut frame = vec![0u8; 18];
    frame[1] = 0x01;
    frame[3] = 0x01;
    frame
}

/// Cancels an outstanding request by its gateway-assigned id.
pub fn cancel_request(handle: u32, request_id: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(10);
    header(&mut buf, CMD_CANCEL_REQUEST, handle);
    buf.put_u16_le(request_id);
    buf.to_vec()
}

/// Looks up the trunk/node address of a packed symbolic node name.
pub fn node_address(handle: u32, name: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(20);
    header(&mut buf, CMD_NODE_ADDRESS, handle);
    buf.put_bytes(0, 8);
    buf.put_u32_le(name);
    buf.to_vec()
}

/// Looks up the symbolic name of a trunk/node address.
pub fn node_name(handle: u32, addr: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(18);
    header(&mut buf, CMD_NODE_NAME, handle);
    buf.put_bytes(0, 8);
    buf.put_u16(addr);
    buf.to_vec()
}

/// Asks the gateway which node it considers local.
pub fn local_node(handle: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16);
    header(&mut buf, CMD_LOCAL_NODE, handle);
    buf.put_bytes(0, 8);
    buf.to_vec()
}

/// Builds a send-request command addressed to `task` at `addr`. `multi`
/// selects streaming semantics; `timeout_ms` is enforced by the gateway.
pub fn send_request(
    handle: u32,
    task: u32,
    addr: u16,
    multi: bool,
    timeout_ms: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(28 + payload.len());
    header(&mut buf, CMD_SEND_REQUEST, handle);
    buf.put_bytes(0, 8);
    buf.put_u32_le(task);
    buf.put_u16(addr);
    buf.put_u16_le(multi as u16);
    buf.put_u32_le(timeout_ms);
    buf.put_slice(payload);
    buf.to_vec()
}

/// True when a gateway frame is a command acknowledgement.
pub fn is_ack(frame: &[u8]) -> bool {
    frame.len() >= 2 && frame[0] == 0x00 && frame[1] == 0x02
}

/// Status carried by a command acknowledgement.
pub fn ack_status(frame: &[u8]) -> Status {
    if frame.len() < 4 {
        return Status::BUG;
    }
    Status::from_raw(i16::from_le_bytes([frame[2], frame[3]]))
}

/// Validates an ack before field extraction. A short frame carrying a
/// failure status (the disconnect NACK) surfaces that status; a short
/// frame claiming success is a protocol bug.
fn checked(frame: &[u8], need: usize) -> Result<(), Status> {
    let status = ack_status(frame);
    if status.is_bad() {
        return Err(status);
    }
    if frame.len() < need {
        return Err(if status.is_success() { Status::BUG } else { status });
    }
    Ok(())
}

/// Handle assigned by a connect acknowledgement.
pub fn connect_handle(frame: &[u8]) -> Result<u32, Status> {
    checked(frame, 11)?;
    Ok(u32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]]))
}

/// Request id granted by a send-request acknowledgement.
pub fn accept_request_id(frame: &[u8]) -> Result<u16, Status> {
    checked(frame, 10)?;
    let result_kind = u16::from_le_bytes([frame[4], frame[5]]);
    if result_kind != 2 {
        return Err(Status::BUG);
    }
    Ok(u16::from_le_bytes([frame[8], frame[9]]))
}

/// Trunk/node address from a name-lookup or local-node acknowledgement.
pub fn node_address_result(frame: &[u8]) -> Result<u16, Status> {
    checked(frame, 8)?;
    Ok(u16::from_be_bytes([frame[6], frame[7]]))
}

/// Packed RAD50 name from an address-lookup acknowledgement.
pub fn node_name_result(frame: &[u8]) -> Result<u32, Status> {
    checked(frame, 10)?;
    Ok(u32::from_be_bytes([frame[6], frame[7], frame[8], frame[9]]))
}

/// A single reply from a remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Trunk/node address of the replying node.
    pub sender: u16,
    /// Outcome reported with this reply.
    pub status: Status,
    /// Service-specific payload bytes.
    pub payload: Bytes,
}

impl Reply {
    /// A locally synthesized reply carrying only a status.
    pub fn synthetic(status: Status) -> Self {
        Self {
            sender: 0,
            status,
            payload: Bytes::new(),
        }
    }
}

/// A parsed network reply frame.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    /// Gateway-assigned correlator of the owning request.
    pub request_id: u16,
    /// True when this is the final reply of the request.
    pub last: bool,
    pub reply: Reply,
}

/// Parses a network reply frame.
///
/// Returns `None` when the buffer cannot hold the 20-byte reply header.
pub fn parse_reply(frame: &Bytes) -> Option<ReplyFrame> {
    if frame.len() < REPLY_HEADER_LEN {
        return None;
    }
    let flags = u16::from_le_bytes([frame[2], frame[3]]);
    let status = Status::from_raw(i16::from_le_bytes([frame[4], frame[5]]));
    let sender = u16::from_be_bytes([frame[6], frame[7]]);
    let request_id = u16::from_le_bytes([frame[18], frame[19]]);
    Some(ReplyFrame {
        request_id,
        last: flags == REPLY_FLAG_LAST,
        reply: Reply {
            sender,
            status,
            payload: frame.slice(REPLY_HEADER_LEN..),
        },
    })
}
