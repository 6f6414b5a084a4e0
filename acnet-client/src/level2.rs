//! Level-II diagnostics.
//!
//! Thin wrappers over `request_reply`, addressed to the gateway's own
//! `ACNET@<node>` service. Reply payloads are fixed-offset little-endian
//! records.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use acnet_protocol::{rad50, Status};

use crate::client::Client;
use crate::error::ClientError;

const PING_TIMEOUT: Duration = Duration::from_millis(100);
const VERSIONS_TIMEOUT: Duration = Duration::from_millis(100);
const TASK_ID_TIMEOUT: Duration = Duration::from_millis(200);
const TASK_NAME_TIMEOUT: Duration = Duration::from_millis(500);
const TASK_IP_TIMEOUT: Duration = Duration::from_millis(200);
const TASK_INFO_TIMEOUT: Duration = Duration::from_millis(500);

const TASK_INFO_PREFIX: usize = 8;
const TASK_INFO_RECORD: usize = 18;

/// Per-task traffic counters reported by [`Client::get_task_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Decoded RAD50 handle of the task.
    pub handle: String,
    pub usm_xmt: u16,
    pub req_xmt: u16,
    pub rpy_xmt: u16,
    pub usm_rcv: u16,
    pub req_rcv: u16,
    pub rpy_rcv: u16,
}

impl Client {
    fn level2_target(node: &str) -> String {
        format!("ACNET@{node}")
    }

    /// Pings the ACNET service at `node`. True on a good, well-formed
    /// two-byte reply; false on anything else.
    pub async fn ping(&self, node: &str) -> bool {
        let reply = self
            .request_reply(&Self::level2_target(node), &[0x00, 0x00], Some(PING_TIMEOUT))
            .await;
        reply.status.is_good() && reply.payload.len() == 2
    }

    /// Reports the three version pairs of the ACNET service at `node`.
    pub async fn get_versions(&self, node: &str) -> Result<[String; 3], ClientError> {
        let reply = self
            .request_reply(&Self::level2_target(node), &[0x03, 0x00], Some(VERSIONS_TIMEOUT))
            .await;
        require_good(reply.status)?;
        decode_versions(&reply.payload).map_err(ClientError::Acnet)
    }

    /// Looks up the id of `task` at `node`.
    pub async fn get_task_id(&self, task: &str, node: &str) -> Result<u16, ClientError> {
        let mut data = vec![0x01, 0x00];
        data.extend_from_slice(&rad50::encode(task).to_le_bytes());
        let reply = self
            .request_reply(&Self::level2_target(node), &data, Some(TASK_ID_TIMEOUT))
            .await;
        require_good(reply.status)?;
        decode_task_id(&reply.payload).map_err(ClientError::Acnet)
    }

    /// Looks up the name of the task with `id` at `node`.
    pub async fn get_task_name(&self, id: u16, node: &str) -> Result<String, ClientError> {
        let reply = self
            .request_reply(&Self::level2_target(node), &task_name_request(id), Some(TASK_NAME_TIMEOUT))
            .await;
        require_good(reply.status)?;
        decode_task_name(&reply.payload).map_err(ClientError::Acnet)
    }

    /// Reports the IP address registered for the task with `id` at
    /// `node`. Nodes that do not track task addresses fail with `LEVEL2`.
    pub async fn get_task_ip(&self, id: u16, node: &str) -> Result<Ipv4Addr, ClientError> {
        let mut data = vec![0x13, 0x00];
        data.extend_from_slice(&id.to_le_bytes());
        let reply = self
            .request_reply(&Self::level2_target(node), &data, Some(TASK_IP_TIMEOUT))
            .await;
        require_good(reply.status)?;
        decode_task_ip(&reply.payload).map_err(ClientError::Acnet)
    }

    /// Enumerates connected tasks and their traffic counters at `node`,
    /// optionally resetting the counters.
    pub async fn get_task_info(
        &self,
        node: &str,
        reset: bool,
    ) -> Result<HashMap<u16, TaskInfo>, ClientError> {
        let data = [0x07, reset as u8];
        let reply = self
            .request_reply(&Self::level2_target(node), &data, Some(TASK_INFO_TIMEOUT))
            .await;
        require_good(reply.status)?;
        decode_task_info(&reply.payload).map_err(ClientError::Acnet)
    }
}

fn require_good(status: Status) -> Result<(), ClientError> {
    if status.is_good() {
        Ok(())
    } else {
        Err(ClientError::Acnet(status))
    }
}

fn task_name_request(id: u16) -> Vec<u8> {
    if id < 256 {
        vec![0x02, id as u8]
    } else {
        vec![0x12, 0x00, (id / 256) as u8, (id % 256) as u8]
    }
}

fn decode_versions(payload: &[u8]) -> Result<[String; 3], Status> {
    if payload.len() < 6 {
        return Err(Status::TRUNC_REPLY);
    }
    let pair = |i: usize| {
        let v = u16::from_le_bytes([payload[i], payload[i + 1]]);
        format!("{}.{}", v / 256, v % 256)
    };
    Ok([pair(0), pair(2), pair(4)])
}

fn decode_task_id(payload: &[u8]) -> Result<u16, Status> {
    if payload.len() < 2 {
        return Err(Status::TRUNC_REPLY);
    }
    Ok(u16::from_le_bytes([payload[0], payload[1]]))
}

fn decode_task_name(payload: &[u8]) -> Result<String, Status> {
    if payload.len() < 4 {
        return Err(Status::TRUNC_REPLY);
    }
    let packed = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(rad50::decode(packed))
}

fn decode_task_ip(payload: &[u8]) -> Result<Ipv4Addr, Status> {
    if payload.len() != 4 {
        return Err(Status::LEVEL2);
    }
    Ok(Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]))
}

fn decode_task_info(payload: &[u8]) -> Result<HashMap<u16, TaskInfo>, Status> {
    if payload.len() < TASK_INFO_PREFIX
        || (payload.len() - TASK_INFO_PREFIX) % TASK_INFO_RECORD != 0
    {
        return Err(Status::TRUNC_REPLY);
    }
    let mut tasks = HashMap::new();
    for record in payload[TASK_INFO_PREFIX..].chunks_exact(TASK_INFO_RECORD) {
        let word = |i: usize| u16::from_le_bytes([record[i], record[i + 1]]);
        let handle = rad50::decode(u32::from_le_bytes([
            record[2], record[3], record[4], record[5],
        ]));
        tasks.insert(
            word(0),
            TaskInfo {
                handle,
                usm_xmt: word(6),
                req_xmt: word(8),
                rpy_xmt: word(10),
                usm_rcv: word(12),
                req_rcv: word(14),
                rpy_rcv: word(16),
            },
        );
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_decoding() {
        let payload = [0x0a, 0x01, 0x05, 0x02, 0x01, 0x00];
        assert_eq!(
            decode_versions(&payload),
            Ok(["1.10".to_string(), "2.5".to_string(), "0.1".to_string()])
        );
    }

    #[test]
    fn test_versions_truncated() {
        assert_eq!(decode_versions(&[0x0a, 0x01]), Err(Status::TRUNC_REPLY));
    }

    #[test]
    fn test_task_name_request_forms() {
        assert_eq!(task_name_request(5), vec![0x02, 0x05]);
        assert_eq!(task_name_request(255), vec![0x02, 0xff]);
        assert_eq!(task_name_request(0x1234), vec![0x12, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn test_task_id_decoding() {
        assert_eq!(decode_task_id(&[0x2a, 0x01, 0xff]), Ok(0x012a));
        assert_eq!(decode_task_id(&[0x2a]), Err(Status::TRUNC_REPLY));
    }

    #[test]
    fn test_task_name_decoding() {
        let packed = rad50::encode("RETDAT").to_le_bytes();
        assert_eq!(decode_task_name(&packed), Ok("RETDAT".to_string()));
        assert_eq!(decode_task_name(&packed[..3]), Err(Status::TRUNC_REPLY));
    }

    #[test]
    fn test_task_ip_requires_exactly_four_bytes() {
        assert_eq!(
            decode_task_ip(&[131, 225, 120, 1]),
            Ok(Ipv4Addr::new(131, 225, 120, 1))
        );
        assert_eq!(decode_task_ip(&[1, 2, 3]), Err(Status::LEVEL2));
        assert_eq!(decode_task_ip(&[1, 2, 3, 4, 5]), Err(Status::LEVEL2));
    }

    #[test]
    fn test_task_info_decoding() {
        let mut payload = vec![0u8; TASK_INFO_PREFIX];
        // Record for task id 3, handle "ACNET", counters 10..=15.
        payload.extend_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(&rad50::encode("ACNET").to_le_bytes());
        for counter in 10u16..=15 {
            payload.extend_from_slice(&counter.to_le_bytes());
        }

        let tasks = decode_task_info(&payload).unwrap();
        assert_eq!(tasks.len(), 1);
        let info = &tasks[&3];
        assert_eq!(info.handle, "ACNET");
        assert_eq!(info.usm_xmt, 10);
        assert_eq!(info.req_xmt, 11);
        assert_eq!(info.rpy_xmt, 12);
        assert_eq!(info.usm_rcv, 13);
        assert_eq!(info.req_rcv, 14);
        assert_eq!(info.rpy_rcv, 15);
    }

    #[test]
    fn test_task_info_truncated() {
        assert_eq!(decode_task_info(&[0u8; 4]), Err(Status::TRUNC_REPLY));
        assert_eq!(decode_task_info(&[0u8; 19]), Err(Status::TRUNC_REPLY));
    }

    #[test]
    fn test_task_info_empty_listing() {
        let tasks = decode_task_info(&[0u8; TASK_INFO_PREFIX]).unwrap();
        assert!(tasks.is_empty());
    }
}
