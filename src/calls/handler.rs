//! Inbound signal dispatch.
//!
//! One decoded frame in, exactly one manager routine per message type
//! out. Unknown discriminants and malformed frames are ignored (logged,
//! never an error): the relay is allowed to speak a newer catalogue.

use super::manager::CallManager;
use super::message::SignalMessage;
use log::{debug, warn};

pub struct SignalHandler;

impl SignalHandler {
    /// Decodes and dispatches one raw frame from the channel.
    pub async fn handle_frame(manager: &mut CallManager, raw: &str) {
        let msg = match SignalMessage::from_json(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(target: "Signaling", "Discarding malformed signaling frame: {e}");
                return;
            }
        };
        Self::handle(manager, msg).await;
    }

    /// Dispatches one decoded message.
    pub async fn handle(manager: &mut CallManager, msg: SignalMessage) {
        debug!(target: "Signaling", "<- {}", msg.type_name());
        match msg {
            SignalMessage::CallCreated { target, call_id } => {
                manager.handle_call_created(&target, call_id).await;
            }
            SignalMessage::CallInvite {
                from, call_id, sdp, ..
            } => {
                manager.handle_call_invite(from, call_id, sdp).await;
            }
            SignalMessage::CallAnswer {
                from, call_id, sdp, ..
            } => {
                manager.handle_call_answer(&from, &call_id, sdp).await;
            }
            SignalMessage::CallRejected { from, reason, .. } => {
                manager.handle_call_rejected(&from, &reason).await;
            }
            SignalMessage::IceCandidate {
                from,
                call_id,
                candidate,
                ..
            } => {
                manager.handle_ice_candidate(&from, &call_id, candidate).await;
            }
            SignalMessage::ParticipantLeft { from, call_id, .. } => {
                manager.handle_participant_left(&from, &call_id).await;
            }
            SignalMessage::CallError { message } => {
                manager.handle_call_error(message).await;
            }
            SignalMessage::CreateCall { .. } => {
                // Client-to-relay only; an echo back is a violation.
                debug!(target: "Signaling", "Ignoring unexpected create-call frame");
            }
            SignalMessage::Unknown => {
                debug!(target: "Signaling", "Ignoring unknown signaling type");
            }
        }
    }
}
