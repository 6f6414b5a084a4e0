//! Client error types.

use acnet_protocol::Status;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by lookup and connection operations.
///
/// Request operations never return these; they fold every pre-dispatch
/// failure into a synthetic [`Reply`](acnet_protocol::Reply) so callers
/// read a single status field either way.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The gateway or a remote task reported a failing status.
    #[error("ACNET status {0}")]
    Acnet(Status),

    /// No gateway session is established.
    #[error("not connected to gateway")]
    Disconnected,

    /// The websocket transport failed.
    #[error("websocket error: {0}")]
    Ws(#[source] Box<tungstenite::Error>),

    /// The configured gateway URL could not be used for a handshake.
    #[error("invalid gateway URL: {0}")]
    Url(String),
}

impl ClientError {
    /// Projects the error onto an ACNET status for callers that surface
    /// every outcome as a status value.
    pub fn status(&self) -> Status {
        match self {
            ClientError::Acnet(status) => *status,
            ClientError::Disconnected | ClientError::Ws(_) => Status::DISCONNECTED,
            ClientError::Url(_) => Status::INVARG,
        }
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Acnet(status)
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        ClientError::Ws(Box::new(err))
    }
}
