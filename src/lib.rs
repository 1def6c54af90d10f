//! Multi-party call signaling client.
//!
//! Negotiates peer-to-peer media sessions over a JSON WebSocket relay:
//! asynchronous offer/answer/ICE exchange, per-call participant and
//! connection bookkeeping, and a reconnecting signaling channel.
//!
//! # Architecture
//!
//! - [`transport`] / [`websocket`]: the signaling channel abstraction and
//!   its WebSocket implementation (token-authenticated, one connection
//!   per attempt)
//! - [`calls`]: wire catalogue, call state machine, peer registry, the
//!   media-engine seam and the manager orchestrating them
//! - [`client`]: connection lifecycle (fixed-delay auto-reconnect) and
//!   the user-facing call API
//! - [`types`]: call identity types and the user-visible event bus
//!
//! The media-transport primitive itself (codec negotiation, NAT
//! traversal) is an external collaborator behind
//! [`calls::media::MediaEngine`]; this crate only decides *when* offers,
//! answers and candidates are produced or applied.

pub mod calls;
pub mod client;
pub mod transport;
pub mod types;
pub mod websocket;

pub use calls::error::CallError;
pub use calls::manager::{CallManager, SignalSender};
pub use calls::media::{LocalMedia, MediaEngine, MediaError, MediaEvent, PeerConnection};
pub use calls::message::{IceCandidateInit, SdpType, SessionDescription, SignalMessage};
pub use calls::state::{CallPhase, CallSession, IncomingCallOffer};
pub use client::{ClientConfig, SignalingClient};
pub use transport::{Transport, TransportError, TransportEvent, TransportFactory};
pub use types::call::{CallDirection, CallId, RejectReason};
pub use types::events::{Event, EventBus, EventHandler};
pub use websocket::WebSocketTransportFactory;
