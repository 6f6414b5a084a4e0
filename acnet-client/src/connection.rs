//! Gateway connection: dispatch state and the reconnecting session task.
//!
//! One task owns the transport. Callers enqueue pending commands, which
//! are matched FIFO against gateway acknowledgements, and receive request
//! replies through per-request sinks keyed by the gateway-assigned
//! request id. Dispatch state lives behind a plain mutex that is never
//! held across I/O; socket writes go through the shared writer half.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acnet_protocol::{frame, rad50, Reply};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::ClientError;
use crate::transport::Transport;

/// Delay between reconnection attempts after a failed or dropped session.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default gateway-side timeout for requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Observable connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway URL, e.g. `wss://host:443/acnet-ws-test`.
    pub url: String,
    /// Gateway-side timeout used by requests that do not name their own.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Established-session context: the gateway-assigned RAD50 handle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Context {
    pub(crate) handle: u32,
}

/// Destination for the replies of one pending request.
pub(crate) enum ReplySink {
    /// Resolves a single-reply request with the first reply seen.
    OneShot(oneshot::Sender<Reply>),
    /// Forwards every reply; dropping the sender closes the stream.
    Stream(mpsc::UnboundedSender<Reply>),
}

impl ReplySink {
    fn deliver(self, reply: Reply) {
        match self {
            ReplySink::OneShot(tx) => {
                let _ = tx.send(reply);
            }
            ReplySink::Stream(tx) => {
                let _ = tx.send(reply);
            }
        }
    }
}

/// A command awaiting the gateway's next acknowledgement.
pub(crate) struct PendingCommand {
    ack: oneshot::Sender<Bytes>,
    /// Reply sink to register under the granted request id, for
    /// send-request commands.
    install: Option<ReplySink>,
}

impl PendingCommand {
    pub(crate) fn new(ack: oneshot::Sender<Bytes>, install: Option<ReplySink>) -> Self {
        Self { ack, install }
    }
}

/// A reply sink registered under a gateway-assigned request id, tagged
/// with the session epoch that granted the id.
pub(crate) struct RequestEntry {
    epoch: u64,
    sink: ReplySink,
}

/// Dispatcher state: the FIFO ack queue and the reply-routing table.
#[derive(Default)]
pub(crate) struct Dispatch {
    cmd_queue: VecDeque<PendingCommand>,
    req_table: HashMap<u16, RequestEntry>,
    /// Bumped on every successful registration. Request ids are assigned
    /// per session, so removals carrying an earlier epoch must not touch
    /// a recycled id.
    epoch: u64,
}

impl Dispatch {
    pub(crate) fn enqueue(&mut self, pending: PendingCommand) {
        self.cmd_queue.push_back(pending);
    }

    /// Routes one gateway frame.
    pub(crate) fn dispatch(&mut self, pkt: Bytes) {
        if pkt.len() < 2 || pkt[0] != 0x00 {
            tracing::warn!(len = pkt.len(), "discarding malformed gateway frame");
            return;
        }
        if frame::is_ack(&pkt) {
            self.dispatch_ack(pkt);
        } else if pkt.len() >= frame::REPLY_HEADER_LEN {
            self.dispatch_reply(pkt);
        } else {
            tracing::warn!(len = pkt.len(), "discarding short gateway frame");
        }
    }

    fn dispatch_ack(&mut self, pkt: Bytes) {
        let Some(pending) = self.cmd_queue.pop_front() else {
            tracing::warn!("command ack with no pending command");
            return;
        };
        if let Some(sink) = pending.install {
            // Register the reply sink before the caller sees the ack, so
            // an immediate first reply cannot race past it.
            if let Ok(id) = frame::accept_request_id(&pkt) {
                let entry = RequestEntry {
                    epoch: self.epoch,
                    sink,
                };
                if self.req_table.insert(id, entry).is_some() {
                    tracing::warn!(request_id = id, "request id granted over a stale entry");
                }
            }
        }
        let _ = pending.ack.send(pkt);
    }

    fn dispatch_reply(&mut self, pkt: Bytes) {
        let Some(parsed) = frame::parse_reply(&pkt) else {
            tracing::warn!(len = pkt.len(), "discarding unparsable reply frame");
            return;
        };
        let id = parsed.request_id;
        let single = matches!(
            self.req_table.get(&id),
            Some(RequestEntry {
                sink: ReplySink::OneShot(_),
                ..
            })
        );
        if parsed.last || single {
            // Remove before delivery so the table is already clean when
            // the receiving side runs.
            match self.req_table.remove(&id) {
                Some(entry) => entry.sink.deliver(parsed.reply),
                None => tracing::debug!(request_id = id, "dropping reply for unknown request"),
            }
        } else if let Some(RequestEntry {
            sink: ReplySink::Stream(tx),
            ..
        }) = self.req_table.get(&id)
        {
            let _ = tx.send(parsed.reply);
        } else {
            tracing::debug!(request_id = id, "dropping reply for unknown request");
        }
    }

    /// Removes the request entry installed under `epoch`; true when it
    /// was present. A removal from an earlier session is ignored, so a
    /// stale cancel guard cannot take out an unrelated request that was
    /// granted the recycled id after a reconnect.
    pub(crate) fn remove_request(&mut self, id: u16, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match self.req_table.get(&id) {
            Some(entry) if entry.epoch == epoch => {
                self.req_table.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Epoch under which the current session registers request ids.
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Fails every queued pending command with the disconnect NACK.
    /// Entries in `req_table` are deliberately left alone: requests past
    /// their accept-ack stay with the gateway-side timeout contract.
    pub(crate) fn fail_pending(&mut self) {
        for pending in self.cmd_queue.drain(..) {
            let _ = pending
                .ack
                .send(Bytes::from_static(&frame::NACK_DISCONNECT));
        }
    }
}

/// State shared between the session task and callers.
pub(crate) struct Shared {
    config: ClientConfig,
    pub(crate) dispatch: Mutex<Dispatch>,
    writer: AsyncMutex<Option<crate::transport::FrameSink>>,
    context: watch::Sender<Option<Context>>,
    state: watch::Sender<ConnectionState>,
    pub(crate) cancel_tx: mpsc::UnboundedSender<u16>,
}

impl Shared {
    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Waits until a session is established and returns its context.
    pub(crate) async fn context(&self) -> Context {
        let mut rx = self.context.subscribe();
        loop {
            if let Some(ctx) = *rx.borrow_and_update() {
                return ctx;
            }
            // The sender is a field of self, so this cannot fail here.
            let _ = rx.changed().await;
        }
    }

    /// Queues a pending command and writes its frame. The writer lock is
    /// held across both steps so queue order always matches wire order.
    pub(crate) async fn command(
        &self,
        frame_bytes: Vec<u8>,
        install: Option<ReplySink>,
    ) -> Result<Bytes, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            let sink = writer.as_mut().ok_or(ClientError::Disconnected)?;
            self.dispatch
                .lock()
                .unwrap()
                .enqueue(PendingCommand::new(tx, install));
            sink.send(Message::Binary(frame_bytes.into())).await?;
        }
        rx.await.map_err(|_| ClientError::Disconnected)
    }

    fn publish_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// A self-maintaining gateway connection.
///
/// Construction starts the connect loop immediately; dropping the
/// connection aborts it, which also tears down the transport.
pub struct Connection {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Creates the connection and begins connecting. Must be called from
    /// within a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (context_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            config,
            dispatch: Mutex::new(Dispatch::default()),
            writer: AsyncMutex::new(None),
            context: context_tx,
            state: state_tx,
            cancel_tx,
        });
        let task = tokio::spawn(run(shared.clone(), cancel_rx));
        Self { shared, task }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Current lifecycle state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribes to lifecycle transitions; the receiver also exposes
    /// the current state as a snapshot.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Waits for registration and returns the decoded gateway handle.
    pub async fn handle(&self) -> String {
        rad50::decode(self.shared.context().await.handle)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Connect loop. Every failed or dropped session publishes
/// `Disconnected`, fails queued commands with the NACK sentinel, and
/// retries after the backoff delay; only the first attempt is immediate.
async fn run(shared: Arc<Shared>, mut cancel_rx: mpsc::UnboundedReceiver<u16>) {
    let mut delay = Duration::ZERO;
    loop {
        tokio::time::sleep(delay).await;
        delay = RECONNECT_DELAY;
        match session(&shared, &mut cancel_rx).await {
            Ok(()) => tracing::debug!("gateway session closed"),
            Err(error) => tracing::warn!(%error, "gateway session ended"),
        }
        shared.writer.lock().await.take();
        shared.context.send_replace(None);
        shared.publish_state(ConnectionState::Disconnected);
        shared.dispatch.lock().unwrap().fail_pending();
    }
}

/// Runs one connection lifetime: register the handle, then dispatch
/// frames and forward stream cancellations until the transport drops.
async fn session(
    shared: &Arc<Shared>,
    cancel_rx: &mut mpsc::UnboundedReceiver<u16>,
) -> Result<(), ClientError> {
    let transport = Transport::connect(&shared.config).await?;
    let (sink, mut source) = transport.split();

    // Queue the connect command and write it while holding the writer
    // lock, so no caller's command can land in between.
    let (ack_tx, mut ack_rx) = oneshot::channel();
    {
        let mut writer = shared.writer.lock().await;
        shared
            .dispatch
            .lock()
            .unwrap()
            .enqueue(PendingCommand::new(ack_tx, None));
        let sink = writer.insert(sink);
        sink.send(Message::Binary(frame::connect().into())).await?;
    }

    // Keep dispatching while waiting for the connect ack.
    let ack = loop {
        tokio::select! {
            msg = source.next() => feed(shared, msg)?,
            ack = &mut ack_rx => break ack.map_err(|_| ClientError::Disconnected)?,
        }
    };
    let handle = frame::connect_handle(&ack).map_err(ClientError::Acnet)?;
    shared.dispatch.lock().unwrap().bump_epoch();
    tracing::info!(handle = %rad50::decode(handle), "registered with gateway");
    shared.context.send_replace(Some(Context { handle }));
    shared.publish_state(ConnectionState::Connected);

    loop {
        tokio::select! {
            msg = source.next() => feed(shared, msg)?,
            Some(request_id) = cancel_rx.recv() => {
                let mut writer = shared.writer.lock().await;
                if let Some(sink) = writer.as_mut() {
                    let cancel = frame::cancel_request(handle, request_id);
                    sink.send(Message::Binary(cancel.into())).await?;
                }
            }
        }
    }
}

/// Pushes one transport event into the dispatcher. Close and
/// end-of-stream surface as errors so the session resets.
fn feed(shared: &Arc<Shared>, msg: Option<Result<Message, WsError>>) -> Result<(), ClientError> {
    match msg {
        Some(Ok(Message::Binary(data))) => {
            let pkt = Bytes::from(data);
            tracing::debug!(len = pkt.len(), "gateway frame received");
            shared.dispatch.lock().unwrap().dispatch(pkt);
            Ok(())
        }
        Some(Ok(Message::Close(_))) | None => Err(ClientError::Disconnected),
        Some(Ok(_)) => Ok(()),
        Some(Err(error)) => Err(error.into()),
    }
}
