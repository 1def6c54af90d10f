//! User-visible events emitted by the signaling client.
//!
//! Presentation layers register an [`EventHandler`] on the [`EventBus`].
//! Dispatch is synchronous and happens in registration order, from the
//! same loop that processes inbound signaling, so handlers observe events
//! in protocol order.

use crate::types::call::CallId;
use serde::Serialize;
use std::sync::{Arc, RwLock};

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

/// An unanswered invite arrived and is now held for accept/reject.
#[derive(Debug, Clone, Serialize)]
pub struct IncomingCall {
    pub from: String,
    pub call_id: CallId,
}

/// The relay confirmed an outgoing call and the invite went out.
#[derive(Debug, Clone, Serialize)]
pub struct CallRinging {
    pub target: String,
    pub call_id: CallId,
}

/// The local side entered an active call (accepted an invite).
#[derive(Debug, Clone, Serialize)]
pub struct CallStarted {
    pub call_id: CallId,
}

/// A remote participant answered our offer.
#[derive(Debug, Clone, Serialize)]
pub struct CallAnswered {
    pub from: String,
    pub call_id: CallId,
}

/// A remote participant left the call (the call itself stays up).
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantLeft {
    pub participant: String,
    pub call_id: CallId,
}

/// A remote participant rejected an invite. Expected control flow, not a
/// failure.
#[derive(Debug, Clone, Serialize)]
pub struct CallRejected {
    pub participant: String,
    pub reason: String,
}

/// The call was torn down, locally or because the channel was lost.
#[derive(Debug, Clone, Serialize)]
pub struct CallEnded {
    pub call_id: Option<CallId>,
    pub duration_secs: Option<i64>,
}

/// A remote media track started flowing from a participant.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteTrack {
    pub participant: String,
}

/// Something went wrong; `message` mirrors the latest-error field.
#[derive(Debug, Clone, Serialize)]
pub struct CallFailure {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    /// Signaling channel established and authenticated.
    Connected,
    /// Signaling channel lost; a reconnect is scheduled unless the
    /// disconnect was requested.
    Disconnected,
    IncomingCall(IncomingCall),
    CallRinging(CallRinging),
    CallStarted(CallStarted),
    CallAnswered(CallAnswered),
    ParticipantLeft(ParticipantLeft),
    CallRejected(CallRejected),
    CallEnded(CallEnded),
    RemoteTrack(RemoteTrack),
    CallFailure(CallFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            let tag = match event {
                Event::Connected => "connected",
                Event::Disconnected => "disconnected",
                _ => "other",
            };
            self.0.lock().unwrap().push(tag.to_string());
        }
    }

    #[test]
    fn dispatches_to_every_handler_in_order() {
        let bus = EventBus::new();
        assert!(!bus.has_handlers());

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.add_handler(recorder.clone());
        assert!(bus.has_handlers());

        bus.dispatch(&Event::Connected);
        bus.dispatch(&Event::Disconnected);

        assert_eq!(*recorder.0.lock().unwrap(), vec!["connected", "disconnected"]);
    }
}
