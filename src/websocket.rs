//! WebSocket signaling transport.
//!
//! Carries the JSON wire catalogue as text frames over a single
//! long-lived connection per authenticated client. The bearer credential
//! travels as a query-string token on the connection URL.

use crate::transport::{Transport, TransportError, TransportEvent, TransportFactory};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// WebSocket transport carrying JSON text frames.
pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::text(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            if let Err(e) = sink.close().await {
                debug!(target: "Transport", "Error closing websocket: {e}");
            }
        }
    }
}

async fn read_task(
    mut stream: WsStream,
    sink: Arc<Mutex<Option<WsSink>>>,
    events: mpsc::Sender<TransportEvent>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if events
                    .send(TransportEvent::MessageReceived(text.to_string()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let mut sink_guard = sink.lock().await;
                if let Some(sink) = sink_guard.as_mut() {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        debug!(target: "Transport", "Failed to answer ping: {e}");
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(target: "Transport", "WebSocket read error: {e}");
                break;
            }
        }
    }
    let _ = events.send(TransportEvent::Disconnected).await;
}

/// Factory dialing the relay with the bearer token as a query parameter.
pub struct WebSocketTransportFactory {
    url: String,
}

impl WebSocketTransportFactory {
    pub fn new(endpoint: &str, token: &str) -> Self {
        let url = format!("{endpoint}?token={}", urlencoding::encode(token));
        Self { url }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        // The URL carries the credential; keep it out of the logs.
        info!(target: "Transport", "Dialing signaling relay");
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!(TransportError::ConnectFailed(e.to_string())))?;

        let (sink, stream) = ws.split();
        let transport = Arc::new(WebSocketTransport::new(sink));

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        events_tx.send(TransportEvent::Connected).await.ok();
        tokio::spawn(read_task(stream, transport.ws_sink.clone(), events_tx));

        Ok((transport as Arc<dyn Transport>, events_rx))
    }
}
