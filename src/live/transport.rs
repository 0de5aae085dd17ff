//! Bidirectional streaming transport.
//!
//! [`LiveConnector::connect`] performs the handshake (connect, send setup,
//! wait for `setupComplete`) and returns a [`LiveLink`]: a pair of channels.
//! Everything pushed into `outbound` is serialised and written to the
//! socket by a dedicated task; every server message is parsed into
//! [`ServerEvent`]s and delivered on `inbound` by another.  When the socket
//! closes, `inbound` yields [`ServerEvent::Closed`] and then ends.
//!
//! ```text
//! OutboundFrame ──mpsc──▶ outbound_loop ──▶ WebSocket ──▶ inbound_loop ──mpsc──▶ ServerEvent
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::messages::{
    parse_server_message, realtime_input_json, OutboundFrame, ServerEvent, SetupMessage,
};
use crate::config::LiveConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send setup message: {0}")]
    Setup(String),

    #[error("server did not acknowledge setup within {0}s")]
    SetupTimeout(u64),

    #[error("connection closed during setup: {0}")]
    ClosedDuringSetup(String),

    #[error("server rejected setup: {0}")]
    Rejected(String),

    #[error("failed to serialise message: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// LiveLink / LiveConnector
// ---------------------------------------------------------------------------

/// Channel pair for one open session.
pub struct LiveLink {
    /// Frames to send.  Dropping every sender closes the connection.
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Parsed server events, ending after [`ServerEvent::Closed`].
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// Opens live sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and complete the setup handshake.
    async fn connect(&self, setup: &SetupMessage) -> Result<LiveLink, TransportError>;
}

// ---------------------------------------------------------------------------
// WsConnector
// ---------------------------------------------------------------------------

/// WebSocket implementation of [`LiveConnector`].
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
    api_key: Option<String>,
    setup_timeout: Duration,
    queue: usize,
}

impl WsConnector {
    pub fn from_config(config: &LiveConfig, queue: usize) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            setup_timeout: Duration::from_secs(config.setup_timeout_secs.max(1)),
            queue: queue.max(1),
        }
    }

    /// Endpoint with the API key appended as a query parameter.
    fn url(&self) -> String {
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let sep = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{sep}key={key}", self.endpoint)
            }
            None => self.endpoint.clone(),
        }
    }

    async fn await_setup_complete(ws: &mut WsStream) -> Result<(), TransportError> {
        while let Some(msg) = ws.next().await {
            let text = match msg {
                Ok(WsMessage::Text(text)) => text,
                // The service may send JSON in binary frames.
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(WsMessage::Close(frame)) => {
                    return Err(TransportError::ClosedDuringSetup(format!("{frame:?}")));
                }
                Ok(_) => continue,
                Err(e) => return Err(TransportError::ClosedDuringSetup(e.to_string())),
            };

            for event in parse_server_message(&text) {
                match event {
                    ServerEvent::SetupComplete => return Ok(()),
                    ServerEvent::Error(message) => return Err(TransportError::Rejected(message)),
                    other => log::debug!("transport: ignoring {other:?} before setupComplete"),
                }
            }
        }
        Err(TransportError::ClosedDuringSetup("stream ended".into()))
    }

    async fn outbound_loop(
        mut rx: mpsc::Receiver<OutboundFrame>,
        mut sink: SplitSink<WsStream, WsMessage>,
    ) {
        let mut sent: u64 = 0;

        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Media(blob) => {
                    let json = match realtime_input_json(&blob) {
                        Ok(json) => json,
                        Err(e) => {
                            log::error!("transport: failed to serialise frame: {e}");
                            continue;
                        }
                    };
                    sent += 1;
                    if sent == 1 || sent % 100 == 0 {
                        log::debug!(
                            "transport: sent {sent} frames (last {} bytes, {})",
                            json.len(),
                            blob.mime_type
                        );
                    }
                    if let Err(e) = sink.send(WsMessage::Text(json)).await {
                        log::warn!("transport: send failed, closing outbound loop: {e}");
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        let _ = sink.close().await;
        log::debug!("transport: outbound loop finished after {sent} frames");
    }

    async fn inbound_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<ServerEvent>) {
        let reason = loop {
            let text = match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        log::warn!("transport: dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map(|f| format!("{} {}", f.code, f.reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            };

            for event in parse_server_message(&text) {
                if tx.send(event).await.is_err() {
                    log::debug!("transport: event receiver dropped");
                    return;
                }
            }
        };

        log::info!("transport: connection closed ({reason:?})");
        let _ = tx.send(ServerEvent::Closed { reason }).await;
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(&self, setup: &SetupMessage) -> Result<LiveLink, TransportError> {
        log::info!("transport: connecting to {}", self.endpoint);

        let (mut ws, _response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let setup_json = serde_json::to_string(setup)?;
        ws.send(WsMessage::Text(setup_json))
            .await
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        tokio::time::timeout(self.setup_timeout, Self::await_setup_complete(&mut ws))
            .await
            .map_err(|_| TransportError::SetupTimeout(self.setup_timeout.as_secs()))??;
        log::info!("transport: setup complete");

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        tokio::spawn(Self::outbound_loop(outbound_rx, sink));
        tokio::spawn(Self::inbound_loop(stream, inbound_tx));

        Ok(LiveLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
