//! WebSocket transport to the gateway.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connection::ClientConfig;
use crate::error::ClientError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type FrameSink = SplitSink<WsStream, Message>;
pub(crate) type FrameSource = SplitStream<WsStream>;

/// A framed session with the gateway.
pub(crate) struct Transport {
    ws: WsStream,
}

impl Transport {
    /// Opens the configured URL, offering the `acnet-client`
    /// sub-protocol. Message compression is never negotiated.
    pub(crate) async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Url(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(acnet_protocol::SUB_PROTOCOL),
        );
        let (ws, _response) = connect_async(request).await?;
        tracing::debug!(url = %config.url, "gateway transport open");
        Ok(Self { ws })
    }

    /// Splits into independently owned write and read halves.
    pub(crate) fn split(self) -> (FrameSink, FrameSource) {
        self.ws.split()
    }
}
