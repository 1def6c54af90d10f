//! Call manager orchestrating the call lifecycle.
//!
//! Owns the [`CallSession`], the [`PeerRegistry`], the shared local media
//! handle and the outbound half of the signaling channel. Every inbound
//! signal and every user operation runs here to completion before the
//! next one is processed; suspension points inside a handler only ever
//! queue further events, they never interleave handler bodies.
//!
//! Failure policy: every failure is recovered to the smallest affected
//! scope (one peer, one pending attempt), mirrored into the session's
//! latest-error field and dispatched as a `CallFailure` event. Frames
//! that reference an unknown call or peer are logged and ignored without
//! mutating state.

use super::error::CallError;
use super::media::{LocalMedia, MediaEngine, MediaEvent};
use super::message::{IceCandidateInit, SessionDescription, SignalMessage};
use super::negotiator;
use super::registry::{CandidateDisposition, NegotiationRole, PeerEntry, PeerRegistry};
use super::state::{CallPhase, CallSession, IncomingCallOffer};
use crate::transport::TransportError;
use crate::types::call::{CallId, RejectReason};
use crate::types::events::{self, Event, EventBus};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of the signaling channel as seen by the manager.
#[async_trait]
pub trait SignalSender: Send + Sync {
    /// Sends one signaling message. Fails with
    /// [`TransportError::NotConnected`] when the channel is closed; the
    /// manager surfaces that to the user instead of queuing.
    async fn send_signal(&self, message: &SignalMessage) -> Result<(), TransportError>;
}

pub struct CallManager {
    session: CallSession,
    registry: PeerRegistry,
    engine: Arc<dyn MediaEngine>,
    sender: Arc<dyn SignalSender>,
    event_bus: EventBus,
    local_media: Option<Arc<dyn LocalMedia>>,
    media_events_tx: mpsc::UnboundedSender<MediaEvent>,
    media_events_rx: Option<mpsc::UnboundedReceiver<MediaEvent>>,
}

impl CallManager {
    pub fn new(
        local_participant: impl Into<String>,
        engine: Arc<dyn MediaEngine>,
        sender: Arc<dyn SignalSender>,
        event_bus: EventBus,
    ) -> Self {
        let (media_events_tx, media_events_rx) = mpsc::unbounded_channel();
        Self {
            session: CallSession::new(local_participant),
            registry: PeerRegistry::new(),
            engine,
            sender,
            event_bus,
            local_media: None,
            media_events_tx,
            media_events_rx: Some(media_events_rx),
        }
    }

    /// Takes the engine event stream. The owner of the run loop feeds
    /// these back through [`CallManager::handle_media_event`] strictly
    /// after the handler that caused them has completed.
    pub fn take_media_events(&mut self) -> Option<mpsc::UnboundedReceiver<MediaEvent>> {
        self.media_events_rx.take()
    }

    pub fn local_participant(&self) -> &str {
        self.session.local_participant()
    }

    pub fn phase(&self) -> CallPhase {
        self.session.phase()
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.session.call_id().cloned()
    }

    pub fn participants(&self) -> Vec<String> {
        self.session.participants().iter().cloned().collect()
    }

    /// The held invite, if one is waiting for accept/reject.
    pub fn pending_invite(&self) -> Option<(String, CallId)> {
        self.session
            .incoming_offer()
            .map(|offer| (offer.from.clone(), offer.call_id.clone()))
    }

    pub fn last_error(&self) -> Option<String> {
        self.session.last_error().map(str::to_string)
    }

    // ---------- user operations ----------

    /// Starts an outgoing call: acquires local media, asks the relay to
    /// create the call and waits for `call-created`.
    pub async fn initiate(&mut self, target: &str) -> Result<(), CallError> {
        if target == self.session.local_participant() {
            return Err(CallError::SelfTarget);
        }
        if self.session.phase() != CallPhase::Idle {
            return Err(CallError::AlreadyInCall);
        }

        self.ensure_local_media().await?;

        let msg = SignalMessage::CreateCall {
            from: self.session.local_participant().to_string(),
            target: target.to_string(),
        };
        if let Err(e) = self.sender.send_signal(&msg).await {
            // The attempt never left the ground; give the capture back.
            self.release_local_media();
            self.report_failure(format!("could not reach the signaling relay: {e}"));
            return Err(e.into());
        }

        self.session.begin_outbound(target)?;
        info!(target: "Calls", "Outgoing call to {target}, waiting for relay confirmation");
        Ok(())
    }

    /// Accepts the held invite: acquires media, connects to the inviter,
    /// applies their offer (flushing any early candidates) and answers.
    pub async fn accept(&mut self) -> Result<(), CallError> {
        let Some(offer) = self.session.incoming_offer() else {
            return Err(CallError::NoPendingOffer);
        };
        let from = offer.from.clone();
        let call_id = offer.call_id.clone();

        // Fallible media work happens before the state commits, so a
        // failed accept leaves the offer pending and the user can still
        // reject it cleanly.
        let media = self.ensure_local_media().await?;
        let conn = match self
            .engine
            .create_peer_connection(&from, media, self.media_events_tx.clone())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.release_local_media();
                self.report_failure(format!("could not open a connection to {from}: {e}"));
                return Err(e.into());
            }
        };

        let offer = self.session.accept_incoming()?;
        let mut entry = PeerEntry::new(conn, NegotiationRole::Answerer);
        entry.seed_candidates(offer.buffered_candidates);

        match entry.apply_remote_description(offer.remote_description).await {
            Ok(outcome) => {
                if let Some(error) = outcome.error {
                    self.report_failure(format!(
                        "dropped {} buffered candidates from {from}: {error}",
                        outcome.dropped
                    ));
                }
            }
            Err(e) => {
                // The offer is unusable; nobody else is in this call yet,
                // so the whole attempt is aborted.
                return Err(self.abort_accept(entry, &from, e).await);
            }
        }

        let answer = match negotiator::create_answer(entry.connection().as_ref()).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.abort_accept(entry, &from, e).await),
        };

        self.registry.insert(from.clone(), entry);

        let msg = SignalMessage::CallAnswer {
            from: self.session.local_participant().to_string(),
            target: from.clone(),
            call_id: call_id.clone(),
            sdp: answer,
        };
        if let Err(e) = self.sender.send_signal(&msg).await {
            // Relay hiccup; the call state stays up and the user is told.
            self.report_failure(format!("could not send the answer to {from}: {e}"));
        }

        info!(target: "Calls", "Accepted call {call_id} from {from}");
        self.event_bus
            .dispatch(&Event::CallStarted(events::CallStarted { call_id }));
        Ok(())
    }

    /// Rejects the held invite and tells the inviter why.
    pub async fn reject(&mut self, reason: RejectReason) -> Result<(), CallError> {
        let Ok(offer) = self.session.reject_incoming() else {
            return Err(CallError::NoPendingOffer);
        };
        info!(target: "Calls", "Rejected call {} from {}", offer.call_id, offer.from);

        let msg = SignalMessage::CallRejected {
            from: self.session.local_participant().to_string(),
            target: offer.from,
            call_id: offer.call_id,
            reason: reason.as_str().to_string(),
        };
        if let Err(e) = self.sender.send_signal(&msg).await {
            self.report_failure(format!("could not deliver the rejection: {e}"));
            return Err(e.into());
        }
        Ok(())
    }

    /// Invites another participant into the active call.
    pub async fn add_participant(&mut self, username: &str) -> Result<(), CallError> {
        if self.session.phase() != CallPhase::Active {
            return Err(CallError::NoActiveCall);
        }
        if username == self.session.local_participant() {
            return Err(CallError::SelfTarget);
        }
        if self.session.participants().contains(username) || self.registry.contains(username) {
            self.report_failure(format!("{username} is already in the call"));
            return Err(CallError::AlreadyParticipant(username.to_string()));
        }
        let Some(call_id) = self.session.call_id().cloned() else {
            return Err(CallError::NoActiveCall);
        };

        let media = self.ensure_local_media().await?;
        let conn = match self
            .engine
            .create_peer_connection(username, media, self.media_events_tx.clone())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.report_failure(format!("could not open a connection to {username}: {e}"));
                return Err(e.into());
            }
        };

        let offer = match negotiator::start_offer(conn.as_ref()).await {
            Ok(offer) => offer,
            Err(e) => {
                conn.close().await;
                self.report_failure(format!("offer negotiation with {username} failed: {e}"));
                return Err(e.into());
            }
        };

        let msg = SignalMessage::CallInvite {
            from: self.session.local_participant().to_string(),
            target: username.to_string(),
            call_id,
            sdp: offer,
        };
        if let Err(e) = self.sender.send_signal(&msg).await {
            // The invite never went out; don't keep a peer nobody will
            // ever answer from.
            conn.close().await;
            self.report_failure(format!("could not invite {username}: {e}"));
            return Err(e.into());
        }

        self.session.add_participant(username)?;
        self.registry
            .insert(username, PeerEntry::new(conn, NegotiationRole::Offerer));
        info!(target: "Calls", "Invited {username} into the call");
        Ok(())
    }

    /// Ends the call: notifies every current participant, destroys every
    /// peer entry and releases local media.
    pub async fn end_call(&mut self) -> Result<(), CallError> {
        match self.session.phase() {
            CallPhase::PendingOutbound | CallPhase::Active => {}
            _ => return Err(CallError::NoActiveCall),
        }

        let call_id = self.session.call_id().cloned();
        if let Some(call_id) = &call_id {
            for participant in self.session.participants().clone() {
                let msg = SignalMessage::ParticipantLeft {
                    from: self.session.local_participant().to_string(),
                    target: participant.clone(),
                    call_id: call_id.clone(),
                };
                if let Err(e) = self.sender.send_signal(&msg).await {
                    warn!(target: "Calls", "Could not notify {participant} of the hang-up: {e}");
                }
            }
        }

        let destroyed = self.registry.destroy_all().await;
        self.release_local_media();
        let duration_secs = self.session.end()?;

        info!(target: "Calls", "Call ended, {destroyed} peer connections closed");
        self.event_bus.dispatch(&Event::CallEnded(events::CallEnded {
            call_id,
            duration_secs,
        }));
        Ok(())
    }

    // ---------- inbound signals ----------

    /// `call-created`: the relay assigned an id to our pending attempt.
    pub async fn handle_call_created(&mut self, target: &str, call_id: CallId) {
        if self.session.phase() != CallPhase::PendingOutbound
            || self.session.pending_outbound_target() != Some(target)
        {
            warn!(target: "Calls", "Ignoring call-created for {target}: no matching pending call");
            return;
        }

        let media = match self.ensure_local_media().await {
            Ok(media) => media,
            Err(_) => {
                self.abort_outbound();
                return;
            }
        };
        let conn = match self
            .engine
            .create_peer_connection(target, media, self.media_events_tx.clone())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.report_failure(format!("could not open a connection to {target}: {e}"));
                self.abort_outbound();
                return;
            }
        };

        let offer = match negotiator::start_offer(conn.as_ref()).await {
            Ok(offer) => offer,
            Err(e) => {
                conn.close().await;
                self.report_failure(format!("offer negotiation with {target} failed: {e}"));
                self.abort_outbound();
                return;
            }
        };

        if self.session.confirm_outbound(target, call_id.clone()).is_err() {
            // Guarded above; don't leak the connection regardless.
            conn.close().await;
            return;
        }
        self.registry
            .insert(target, PeerEntry::new(conn, NegotiationRole::Offerer));

        let msg = SignalMessage::CallInvite {
            from: self.session.local_participant().to_string(),
            target: target.to_string(),
            call_id: call_id.clone(),
            sdp: offer,
        };
        if let Err(e) = self.sender.send_signal(&msg).await {
            // Without the invite the call can never be answered; tear the
            // attempt back down to idle.
            self.report_failure(format!("could not send the invite to {target}: {e}"));
            self.registry.destroy(target).await;
            self.release_local_media();
            let _ = self.session.end();
            return;
        }

        info!(target: "Calls", "Call {call_id} created, invite sent to {target}");
        self.event_bus.dispatch(&Event::CallRinging(events::CallRinging {
            target: target.to_string(),
            call_id,
        }));
    }

    /// `call-invite`: busy clients auto-reject; otherwise the offer is
    /// held (superseding any previous one without replying to it).
    pub async fn handle_call_invite(
        &mut self,
        from: String,
        call_id: CallId,
        sdp: SessionDescription,
    ) {
        match self.session.phase() {
            CallPhase::Active | CallPhase::PendingOutbound => {
                info!(target: "Calls", "Busy, auto-rejecting call {call_id} from {from}");
                let msg = SignalMessage::CallRejected {
                    from: self.session.local_participant().to_string(),
                    target: from,
                    call_id,
                    reason: RejectReason::Busy.as_str().to_string(),
                };
                if let Err(e) = self.sender.send_signal(&msg).await {
                    warn!(target: "Calls", "Could not deliver the busy rejection: {e}");
                }
            }
            CallPhase::Idle | CallPhase::PendingInbound => {
                let offer = IncomingCallOffer::new(from.clone(), call_id.clone(), sdp);
                match self.session.store_incoming_offer(offer) {
                    Ok(Some(replaced)) => debug!(
                        target: "Calls",
                        "Invite from {from} supersedes the pending offer from {} (implicitly rejected)",
                        replaced.from
                    ),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(target: "Calls", "Could not hold invite from {from}: {e}");
                        return;
                    }
                }
                info!(target: "Calls", "Incoming call {call_id} from {from}");
                self.event_bus
                    .dispatch(&Event::IncomingCall(events::IncomingCall { from, call_id }));
            }
        }
    }

    /// `call-answer`: a participant accepted our offer; apply their
    /// description and flush whatever candidates got ahead of it.
    pub async fn handle_call_answer(&mut self, from: &str, call_id: &CallId, sdp: SessionDescription) {
        if self.session.phase() != CallPhase::Active || self.session.call_id() != Some(call_id) {
            warn!(target: "Calls", "Ignoring call-answer from {from}: no active call {call_id}");
            return;
        }
        let result = match self.registry.get_mut(from) {
            Some(entry) => entry.apply_remote_description(sdp).await,
            None => {
                warn!(target: "Calls", "Ignoring call-answer from {from}: not in the peer registry");
                return;
            }
        };

        match result {
            Ok(outcome) => {
                if let Some(error) = outcome.error {
                    self.report_failure(format!(
                        "dropped {} buffered candidates from {from}: {error}",
                        outcome.dropped
                    ));
                }
                debug!(
                    target: "Calls",
                    "Answer from {from} applied, {} buffered candidates flushed",
                    outcome.applied
                );
                self.event_bus
                    .dispatch(&Event::CallAnswered(events::CallAnswered {
                        from: from.to_string(),
                        call_id: call_id.clone(),
                    }));
            }
            Err(e) => {
                // That peer's negotiation is dead; the rest of the call
                // survives.
                self.registry.destroy(from).await;
                let _ = self.session.remove_participant(from);
                self.report_failure(format!("answer from {from} could not be applied: {e}"));
            }
        }
    }

    /// `call-rejected`: expected control flow. The peer (or its pending
    /// invite) is dropped; rejection of the sole pending outbound target
    /// abandons the whole attempt.
    pub async fn handle_call_rejected(&mut self, from: &str, reason: &str) {
        match self.session.phase() {
            CallPhase::PendingOutbound | CallPhase::Active => {}
            _ => {
                debug!(target: "Calls", "Ignoring call-rejected from {from}: no call in progress");
                return;
            }
        }

        let _ = self.session.remove_participant(from);
        self.registry.destroy(from).await;

        if self.session.pending_outbound_target() == Some(from) {
            info!(target: "Calls", "{from} rejected the call: {reason}");
            self.abort_outbound();
        }

        self.event_bus
            .dispatch(&Event::CallRejected(events::CallRejected {
                participant: from.to_string(),
                reason: reason.to_string(),
            }));
    }

    /// `ice-candidate`: apply immediately when the peer's remote
    /// description is set, buffer otherwise. Candidates for the held
    /// (not yet accepted) invite buffer on the offer itself.
    pub async fn handle_ice_candidate(
        &mut self,
        from: &str,
        call_id: &CallId,
        candidate: IceCandidateInit,
    ) {
        match self.session.phase() {
            CallPhase::Active if self.session.call_id() == Some(call_id) => {
                let disposition = match self.registry.get_mut(from) {
                    Some(entry) => entry.add_or_buffer(candidate).await,
                    None => {
                        warn!(target: "Calls", "Ignoring candidate from {from}: not in the peer registry");
                        return;
                    }
                };
                match disposition {
                    Ok(CandidateDisposition::Applied) => {
                        debug!(target: "Calls", "Applied candidate from {from}")
                    }
                    Ok(CandidateDisposition::Buffered) => {
                        debug!(target: "Calls", "Buffered candidate from {from} until their description lands")
                    }
                    Err(e) => {
                        // One bad candidate does not end the peer's ICE.
                        self.report_failure(format!("candidate from {from} dropped: {e}"));
                    }
                }
            }
            CallPhase::PendingInbound => {
                if self.session.buffer_offer_candidate(from, call_id, candidate) {
                    debug!(target: "Calls", "Buffered candidate from {from} until the invite is answered");
                } else {
                    debug!(target: "Calls", "Ignoring candidate from {from} for unknown call {call_id}");
                }
            }
            _ => {
                debug!(target: "Calls", "Ignoring candidate from {from}: no call {call_id}");
            }
        }
    }

    /// `participant-left`: drop the peer; the call stays active even when
    /// the last participant leaves; ending it is the user's decision.
    pub async fn handle_participant_left(&mut self, from: &str, call_id: &CallId) {
        if self.session.phase() != CallPhase::Active || self.session.call_id() != Some(call_id) {
            debug!(target: "Calls", "Ignoring participant-left from {from}: no active call {call_id}");
            return;
        }
        match self.session.remove_participant(from) {
            Ok(true) => {
                self.registry.destroy(from).await;
                info!(target: "Calls", "{from} left the call");
                self.event_bus
                    .dispatch(&Event::ParticipantLeft(events::ParticipantLeft {
                        participant: from.to_string(),
                        call_id: call_id.clone(),
                    }));
            }
            _ => {
                debug!(target: "Calls", "Ignoring participant-left for non-participant {from}")
            }
        }
    }

    /// `call-error`: the relay failed our pending attempt.
    pub async fn handle_call_error(&mut self, message: String) {
        if self.session.phase() != CallPhase::PendingOutbound {
            warn!(target: "Calls", "Relay call-error outside a pending call: {message}");
            return;
        }
        self.report_failure(message);
        self.abort_outbound();
    }

    /// The signaling channel dropped out from under an ongoing call. No
    /// notifications can be sent; tear local state down and tell the user.
    pub async fn handle_transport_lost(&mut self) {
        if self.session.phase() == CallPhase::Idle {
            return;
        }
        warn!(target: "Calls", "Signaling channel lost, tearing down call state");
        let call_id = self.session.call_id().cloned();
        self.registry.destroy_all().await;
        self.release_local_media();

        let duration_secs = match self.session.phase() {
            CallPhase::PendingInbound => {
                let _ = self.session.reject_incoming();
                None
            }
            _ => self.session.end().ok().flatten(),
        };

        self.event_bus.dispatch(&Event::CallEnded(events::CallEnded {
            call_id,
            duration_secs,
        }));
    }

    // ---------- engine events ----------

    /// Events the media engine produced, re-entering the loop strictly
    /// after the handler that caused them. Events for peers that have
    /// since been destroyed are stale results of abandoned negotiations
    /// and are dropped.
    pub async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate {
                participant,
                candidate,
            } => {
                if self.session.phase() != CallPhase::Active
                    || !self.registry.contains(&participant)
                {
                    debug!(target: "Calls", "Dropping stale local candidate for {participant}");
                    return;
                }
                let Some(call_id) = self.session.call_id().cloned() else {
                    return;
                };
                let msg = SignalMessage::IceCandidate {
                    from: self.session.local_participant().to_string(),
                    target: participant.clone(),
                    call_id,
                    candidate,
                };
                if let Err(e) = self.sender.send_signal(&msg).await {
                    self.report_failure(format!("could not send a candidate to {participant}: {e}"));
                }
            }
            MediaEvent::RemoteTrack { participant } => {
                if self.registry.contains(&participant) {
                    self.event_bus
                        .dispatch(&Event::RemoteTrack(events::RemoteTrack { participant }));
                } else {
                    debug!(target: "Calls", "Dropping track event from stale peer {participant}");
                }
            }
        }
    }

    // ---------- internals ----------

    async fn ensure_local_media(&mut self) -> Result<Arc<dyn LocalMedia>, CallError> {
        if let Some(media) = &self.local_media {
            return Ok(media.clone());
        }
        match self.engine.acquire_local_media().await {
            Ok(media) => {
                self.local_media = Some(media.clone());
                Ok(media)
            }
            Err(e) => {
                self.report_failure(format!("{e}"));
                Err(e.into())
            }
        }
    }

    fn release_local_media(&mut self) {
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
    }

    fn abort_outbound(&mut self) {
        self.release_local_media();
        let _ = self.session.fail_outbound();
    }

    /// Rolls a half-accepted invite back to idle. The offer was already
    /// consumed; it cannot be salvaged once its description was refused.
    async fn abort_accept(&mut self, entry: PeerEntry, from: &str, error: super::media::MediaError) -> CallError {
        entry.connection().close().await;
        let _ = self.session.remove_participant(from);
        self.release_local_media();
        let _ = self.session.end();
        self.report_failure(format!("accepting the call from {from} failed: {error}"));
        error.into()
    }

    fn report_failure(&mut self, message: String) {
        warn!(target: "Calls", "{message}");
        self.session.set_last_error(message.clone());
        self.event_bus
            .dispatch(&Event::CallFailure(events::CallFailure { message }));
    }
}
