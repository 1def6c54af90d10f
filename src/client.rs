//! Signaling client: channel lifecycle and the user-facing call API.
//!
//! One client owns one [`CallManager`] behind a mutex; inbound frames,
//! engine events and user operations all serialize on it, which gives
//! the handle-to-completion ordering the protocol assumes. The channel
//! itself auto-reconnects after a fixed delay, indefinitely, until
//! [`SignalingClient::disconnect`] is called.

use crate::calls::error::CallError;
use crate::calls::handler::SignalHandler;
use crate::calls::manager::{CallManager, SignalSender};
use crate::calls::media::{MediaEngine, MediaEvent};
use crate::calls::message::SignalMessage;
use crate::calls::state::CallPhase;
use crate::transport::{Transport, TransportError, TransportEvent, TransportFactory};
use crate::types::call::{CallId, RejectReason};
use crate::types::events::{Event, EventBus, EventHandler};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, sleep};

/// Connection settings for the signaling relay.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the relay, e.g. `wss://relay.example/ws/call`.
    pub endpoint: String,
    /// Authenticated identity; the `from` field on every signal.
    pub username: String,
    /// Opaque bearer credential, passed as a query-string token.
    pub token: String,
    /// Fixed delay between reconnection attempts. There is intentionally
    /// no growth and no cap; the channel retries until `disconnect`.
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            token: token.into(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Outbound seam handed to the manager; tracks whichever transport is
/// currently connected.
struct TransportSink {
    transport: Arc<Mutex<Option<Arc<dyn Transport>>>>,
}

#[async_trait]
impl SignalSender for TransportSink {
    async fn send_signal(&self, message: &SignalMessage) -> Result<(), TransportError> {
        let transport = self.transport.lock().await.as_ref().cloned();
        let Some(transport) = transport else {
            return Err(TransportError::NotConnected);
        };
        let frame = message
            .to_json()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        debug!(target: "Signaling", "-> {}", message.type_name());
        transport.send(&frame).await
    }
}

pub struct SignalingClient {
    config: ClientConfig,
    transport_factory: Arc<dyn TransportFactory>,
    transport: Arc<Mutex<Option<Arc<dyn Transport>>>>,
    manager: Mutex<CallManager>,
    event_bus: EventBus,
    media_events: Mutex<Option<mpsc::UnboundedReceiver<MediaEvent>>>,
    is_running: AtomicBool,
    is_connecting: AtomicBool,
    expected_disconnect: AtomicBool,
    enable_auto_reconnect: AtomicBool,
}

impl SignalingClient {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media_engine: Arc<dyn MediaEngine>,
    ) -> Arc<Self> {
        let event_bus = EventBus::new();
        let transport: Arc<Mutex<Option<Arc<dyn Transport>>>> = Arc::new(Mutex::new(None));
        let sink = Arc::new(TransportSink {
            transport: transport.clone(),
        });
        let mut manager = CallManager::new(
            config.username.clone(),
            media_engine,
            sink,
            event_bus.clone(),
        );
        let media_events = manager.take_media_events();

        Arc::new(Self {
            config,
            transport_factory,
            transport,
            manager: Mutex::new(manager),
            event_bus,
            media_events: Mutex::new(media_events),
            is_running: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            enable_auto_reconnect: AtomicBool::new(true),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_bus.add_handler(handler);
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Runs the channel until [`SignalingClient::disconnect`]. Connection
    /// losses schedule a reconnect after the fixed configured delay.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "run called while already running");
            return;
        }
        self.enable_auto_reconnect.store(true, Ordering::Relaxed);

        let mut media_guard = self.media_events.lock().await;
        let Some(media_rx) = media_guard.as_mut() else {
            warn!(target: "Client", "Media event stream missing, cannot run");
            self.is_running.store(false, Ordering::Relaxed);
            return;
        };

        while self.is_running.load(Ordering::Relaxed) {
            // A disconnect during the reconnect delay must win; don't dial
            // again after the user asked to stop.
            if !self.enable_auto_reconnect.load(Ordering::Relaxed) {
                self.is_running.store(false, Ordering::Relaxed);
                break;
            }
            self.expected_disconnect.store(false, Ordering::Relaxed);

            match self.connect().await {
                Ok(events) => {
                    self.read_loop(events, media_rx).await;
                    self.cleanup_connection().await;
                    if self.expected_disconnect.load(Ordering::Relaxed) {
                        debug!(target: "Client", "Channel closed on request");
                    } else {
                        warn!(target: "Client", "Signaling channel lost");
                    }
                    self.event_bus.dispatch(&Event::Disconnected);
                }
                Err(e) => {
                    error!(target: "Client", "Failed to connect to the signaling relay: {e}");
                }
            }

            if !self.enable_auto_reconnect.load(Ordering::Relaxed) {
                info!(target: "Client", "Auto-reconnect disabled, shutting down");
                self.is_running.store(false, Ordering::Relaxed);
                break;
            }

            let delay = self.config.reconnect_delay;
            info!(target: "Client", "Reconnecting in {delay:?}");
            sleep(delay).await;
        }
        info!(target: "Client", "Signaling client stopped");
    }

    /// Closes the channel and suppresses the auto-reconnect. Ends any
    /// ongoing call first so participants are notified while the channel
    /// is still up. Idempotent; calling it when already disconnected is a
    /// no-op.
    pub async fn disconnect(&self) {
        self.enable_auto_reconnect.store(false, Ordering::Relaxed);
        self.expected_disconnect.store(true, Ordering::Relaxed);

        {
            let mut manager = self.manager.lock().await;
            if matches!(
                manager.phase(),
                CallPhase::Active | CallPhase::PendingOutbound
            ) {
                let _ = manager.end_call().await;
            }
        }

        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
    }

    async fn connect(self: &Arc<Self>) -> Result<mpsc::Receiver<TransportEvent>, anyhow::Error> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("already connecting"));
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.is_connected().await {
            return Err(anyhow::anyhow!("already connected"));
        }

        info!(target: "Client", "Connecting to {}", self.config.endpoint);
        let (transport, events) = self.transport_factory.create_transport().await?;
        *self.transport.lock().await = Some(transport);
        Ok(events)
    }

    async fn read_loop(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
        media_rx: &mut mpsc::UnboundedReceiver<MediaEvent>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        info!(target: "Client", "Signaling channel established");
                        self.event_bus.dispatch(&Event::Connected);
                    }
                    Some(TransportEvent::MessageReceived(frame)) => {
                        let mut manager = self.manager.lock().await;
                        SignalHandler::handle_frame(&mut manager, &frame).await;
                    }
                    Some(TransportEvent::Disconnected) | None => break,
                },
                event = media_rx.recv() => {
                    if let Some(event) = event {
                        let mut manager = self.manager.lock().await;
                        manager.handle_media_event(event).await;
                    }
                }
            }
        }
    }

    async fn cleanup_connection(&self) {
        *self.transport.lock().await = None;
        if !self.expected_disconnect.load(Ordering::Relaxed) {
            let mut manager = self.manager.lock().await;
            manager.handle_transport_lost().await;
        }
    }

    // ---------- call API ----------

    pub async fn initiate_call(&self, target: &str) -> Result<(), CallError> {
        self.manager.lock().await.initiate(target).await
    }

    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.manager.lock().await.accept().await
    }

    pub async fn reject_call(&self, reason: RejectReason) -> Result<(), CallError> {
        self.manager.lock().await.reject(reason).await
    }

    pub async fn add_participant(&self, username: &str) -> Result<(), CallError> {
        self.manager.lock().await.add_participant(username).await
    }

    pub async fn end_call(&self) -> Result<(), CallError> {
        self.manager.lock().await.end_call().await
    }

    // ---------- snapshots for presentation ----------

    pub async fn call_phase(&self) -> CallPhase {
        self.manager.lock().await.phase()
    }

    pub async fn current_call_id(&self) -> Option<CallId> {
        self.manager.lock().await.call_id()
    }

    pub async fn participants(&self) -> Vec<String> {
        self.manager.lock().await.participants()
    }

    pub async fn pending_invite(&self) -> Option<(String, CallId)> {
        self.manager.lock().await.pending_invite()
    }

    pub async fn last_call_error(&self) -> Option<String> {
        self.manager.lock().await.last_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::media::mock::MockMediaEngine;
    use crate::transport::mock::MockTransportFactory;

    fn client() -> (Arc<SignalingClient>, Arc<MockTransportFactory>, Arc<MockMediaEngine>) {
        let factory = MockTransportFactory::new();
        let engine = MockMediaEngine::new();
        let config = ClientConfig::new("wss://relay.example/ws/call", "alice", "secret-token");
        let client = SignalingClient::new(config, factory.clone(), engine.clone());
        (client, factory, engine)
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, _factory, _engine) = client();

        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn sending_without_a_channel_is_a_nonfatal_error() {
        let (client, _factory, engine) = client();

        let err = client.initiate_call("bob").await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Transport(TransportError::NotConnected)
        ));
        // The attempt was fully unwound: idle again, capture released.
        assert_eq!(client.call_phase().await, CallPhase::Idle);
        assert_eq!(engine.media_stop_count(), 1);
        assert!(client.last_call_error().await.is_some());
    }
}
