//! High-level client API.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use acnet_protocol::{frame, rad50, Reply, Status};
use tokio::sync::{mpsc, oneshot, watch};

use crate::connection::{
    ClientConfig, Connection, ConnectionState, ReplySink, Shared,
};
use crate::error::ClientError;
use crate::task::{parse_task, NodeSpec};

/// High-level ACNET client.
///
/// Operations wait for the connection to register with the gateway, so
/// callers issued before the first connect simply queue up.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a client and begins connecting immediately.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Subscribes to connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.subscribe_state()
    }

    /// Waits for registration and returns the decoded gateway handle.
    pub async fn handle(&self) -> String {
        self.conn.handle().await
    }

    fn shared(&self) -> &Arc<Shared> {
        self.conn.shared()
    }

    // =========================================================================
    // Node lookups
    // =========================================================================

    /// Resolves a symbolic node name to its trunk/node address.
    /// `"LOCAL"` resolves to 0 without consulting the gateway.
    pub async fn get_node_address(&self, name: &str) -> Result<u16, ClientError> {
        if name.eq_ignore_ascii_case(acnet_protocol::LOCAL_NODE_NAME) {
            return Ok(acnet_protocol::LOCAL_NODE_ADDR);
        }
        let ctx = self.shared().context().await;
        let cmd = frame::node_address(ctx.handle, rad50::encode(name));
        let ack = self.shared().command(cmd, None).await?;
        frame::node_address_result(&ack).map_err(ClientError::Acnet)
    }

    /// Resolves a trunk/node address to its symbolic name.
    /// Address 0 resolves to `"LOCAL"` without consulting the gateway.
    pub async fn get_node_name(&self, addr: u16) -> Result<String, ClientError> {
        if addr == acnet_protocol::LOCAL_NODE_ADDR {
            return Ok(acnet_protocol::LOCAL_NODE_NAME.to_string());
        }
        let ctx = self.shared().context().await;
        let cmd = frame::node_name(ctx.handle, addr);
        let ack = self.shared().command(cmd, None).await?;
        let packed = frame::node_name_result(&ack).map_err(ClientError::Acnet)?;
        Ok(rad50::decode(packed))
    }

    /// Returns the symbolic name of the gateway's local node.
    pub async fn get_local_node(&self) -> Result<String, ClientError> {
        let ctx = self.shared().context().await;
        let cmd = frame::local_node(ctx.handle);
        let ack = self.shared().command(cmd, None).await?;
        let addr = frame::node_address_result(&ack).map_err(ClientError::Acnet)?;
        self.get_node_name(addr).await
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Issues a single-reply request to `task` (`TASK@NODE` form).
    /// `None` falls back to the configured request timeout.
    ///
    /// Never fails: parse and dispatch problems come back as a synthetic
    /// reply with sender 0 and an empty payload, so callers uniformly
    /// inspect the reply status. The timeout is enforced by the gateway,
    /// which reports expiry as a `UTIME` reply.
    pub async fn request_reply(&self, task: &str, data: &[u8], timeout: Option<Duration>) -> Reply {
        let timeout = self.effective_timeout(timeout);
        match self.request_single(task, data, timeout).await {
            Ok(reply) => reply,
            Err(error) => Reply::synthetic(error.status()),
        }
    }

    async fn request_single(
        &self,
        task: &str,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Reply, ClientError> {
        let (task_name, node) = self.resolve_task(task).await?;
        let ctx = self.shared().context().await;
        let (tx, rx) = oneshot::channel();
        let cmd = frame::send_request(
            ctx.handle,
            task_name,
            node,
            false,
            timeout_millis(timeout),
            data,
        );
        let ack = self
            .shared()
            .command(cmd, Some(ReplySink::OneShot(tx)))
            .await?;
        frame::accept_request_id(&ack).map_err(ClientError::Acnet)?;
        rx.await.map_err(|_| ClientError::Disconnected)
    }

    /// Issues a streaming request to `task`; replies arrive until the
    /// terminal one, or until the stream is dropped, which cancels the
    /// request at the gateway. `None` falls back to the configured
    /// request timeout, which restarts at the gateway between replies.
    ///
    /// Like [`request_reply`](Self::request_reply) this never fails:
    /// early errors yield a stream of exactly one synthetic reply.
    pub async fn request_reply_stream(
        &self,
        task: &str,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> ReplyStream {
        let timeout = self.effective_timeout(timeout);
        match self.request_stream(task, data, timeout).await {
            Ok(stream) => stream,
            Err(error) => ReplyStream::failed(error.status()),
        }
    }

    async fn request_stream(
        &self,
        task: &str,
        data: &[u8],
        timeout: Duration,
    ) -> Result<ReplyStream, ClientError> {
        let (task_name, node) = self.resolve_task(task).await?;
        let ctx = self.shared().context().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let cmd = frame::send_request(
            ctx.handle,
            task_name,
            node,
            true,
            timeout_millis(timeout),
            data,
        );
        let ack = self
            .shared()
            .command(cmd, Some(ReplySink::Stream(tx)))
            .await?;
        let request_id = frame::accept_request_id(&ack).map_err(ClientError::Acnet)?;
        let epoch = self.shared().dispatch.lock().unwrap().current_epoch();
        Ok(ReplyStream {
            rx,
            guard: Some(CancelGuard {
                request_id,
                epoch,
                shared: self.shared().clone(),
            }),
        })
    }

    fn effective_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.shared().config().request_timeout)
    }

    /// Splits `TASK@NODE` and resolves the node half: a `#<decimal>`
    /// literal directly, a symbolic name through the gateway.
    async fn resolve_task(&self, task: &str) -> Result<(u32, u16), ClientError> {
        let (task_part, node) = parse_task(task).map_err(ClientError::Acnet)?;
        let addr = match node {
            NodeSpec::Literal(addr) => addr,
            NodeSpec::Name(name) => self.get_node_address(name).await?,
        };
        Ok((rad50::encode(task_part), addr))
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

/// Replies of a streaming request.
///
/// Ends after the terminal reply. Dropping the stream early removes the
/// request locally and sends a cancel-request to the gateway; straggler
/// replies are silently discarded.
pub struct ReplyStream {
    rx: mpsc::UnboundedReceiver<Reply>,
    guard: Option<CancelGuard>,
}

impl ReplyStream {
    /// A stream of exactly one synthetic reply, used when the request
    /// never reached the dispatch stage.
    fn failed(status: Status) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Reply::synthetic(status));
        Self { rx, guard: None }
    }

    /// Receives the next reply; `None` after the terminal reply.
    pub async fn recv(&mut self) -> Option<Reply> {
        let reply = self.rx.recv().await;
        if reply.is_none() {
            // Ended at the terminal reply: the table entry is gone and
            // the request id may be reused, so disarm the cancel guard.
            self.guard = None;
        }
        reply
    }
}

impl futures_util::Stream for ReplyStream {
    type Item = Reply;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Reply>> {
        let this = self.get_mut();
        let poll = this.rx.poll_recv(cx);
        if matches!(poll, Poll::Ready(None)) {
            this.guard = None;
        }
        poll
    }
}

struct CancelGuard {
    request_id: u16,
    /// Session epoch that granted the request id. A drop that happens
    /// after a reconnect is a no-op: the id may already belong to an
    /// unrelated request of the new session.
    epoch: u64,
    shared: Arc<Shared>,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let removed = self
            .shared
            .dispatch
            .lock()
            .unwrap()
            .remove_request(self.request_id, self.epoch);
        if removed {
            let _ = self.shared.cancel_tx.send(self.request_id);
        }
    }
}
