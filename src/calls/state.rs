//! Call session state machine.
//!
//! [`CallSession`] is the single authoritative answer to "am I in a call,
//! with whom, under which id". Every mutator validates the current phase
//! and rejects illegal transitions with [`InvalidTransition`]; effects on
//! peer connections and the wire live in the manager, not here.

use super::message::{IceCandidateInit, SessionDescription};
use crate::types::call::CallId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Phase of the call context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallPhase {
    /// No call in progress.
    #[default]
    Idle,
    /// `create-call` sent, waiting for the relay to assign an id.
    PendingOutbound,
    /// An unanswered inbound invite is held.
    PendingInbound,
    /// Call established; participants may join and leave.
    Active,
}

/// Transient record of an unanswered inbound invite.
///
/// At most one exists; a newer invite replaces it and the replaced offer
/// is implicitly rejected (no reply is emitted for it).
#[derive(Debug, Clone)]
pub struct IncomingCallOffer {
    pub from: String,
    pub call_id: CallId,
    pub remote_description: SessionDescription,
    pub received_at: DateTime<Utc>,
    /// Candidates from the inviter that arrived before the local
    /// accept/reject decision; seeded into the peer entry on accept.
    pub buffered_candidates: Vec<IceCandidateInit>,
}

impl IncomingCallOffer {
    pub fn new(
        from: impl Into<String>,
        call_id: CallId,
        remote_description: SessionDescription,
    ) -> Self {
        Self {
            from: from.into(),
            call_id,
            remote_description,
            received_at: Utc::now(),
            buffered_candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub phase: CallPhase,
    pub attempted: &'static str,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in phase {:?}",
            self.attempted, self.phase
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// The authoritative call context. At most one non-terminal session
/// exists per client; mutators return it to [`CallPhase::Idle`] rather
/// than dropping it.
#[derive(Debug)]
pub struct CallSession {
    local_participant: String,
    phase: CallPhase,
    call_id: Option<CallId>,
    participants: BTreeSet<String>,
    pending_outbound_target: Option<String>,
    incoming_offer: Option<IncomingCallOffer>,
    active_since: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl CallSession {
    pub fn new(local_participant: impl Into<String>) -> Self {
        Self {
            local_participant: local_participant.into(),
            phase: CallPhase::Idle,
            call_id: None,
            participants: BTreeSet::new(),
            pending_outbound_target: None,
            incoming_offer: None,
            active_since: None,
            last_error: None,
        }
    }

    pub fn local_participant(&self) -> &str {
        &self.local_participant
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    /// Remote participants only; never contains the local participant.
    pub fn participants(&self) -> &BTreeSet<String> {
        &self.participants
    }

    pub fn pending_outbound_target(&self) -> Option<&str> {
        self.pending_outbound_target.as_deref()
    }

    pub fn incoming_offer(&self) -> Option<&IncomingCallOffer> {
        self.incoming_offer.as_ref()
    }

    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        self.active_since
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Idle → PendingOutbound. The relay has not assigned an id yet, so
    /// `call_id` stays unset until `confirm_outbound`.
    pub fn begin_outbound(&mut self, target: impl Into<String>) -> Result<(), InvalidTransition> {
        if self.phase != CallPhase::Idle {
            return Err(self.invalid("initiate"));
        }
        self.pending_outbound_target = Some(target.into());
        self.phase = CallPhase::PendingOutbound;
        Ok(())
    }

    /// PendingOutbound → Active once the relay confirms the id for the
    /// pending target. A confirmation naming anyone else is rejected.
    pub fn confirm_outbound(
        &mut self,
        target: &str,
        call_id: CallId,
    ) -> Result<(), InvalidTransition> {
        if self.phase != CallPhase::PendingOutbound
            || self.pending_outbound_target.as_deref() != Some(target)
        {
            return Err(self.invalid("call-created"));
        }
        self.pending_outbound_target = None;
        self.participants.insert(target.to_string());
        self.call_id = Some(call_id);
        self.active_since = Some(Utc::now());
        self.phase = CallPhase::Active;
        Ok(())
    }

    /// PendingOutbound → Idle: the attempt was rejected by its sole
    /// target, failed at the relay, or failed locally before going active.
    pub fn fail_outbound(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != CallPhase::PendingOutbound {
            return Err(self.invalid("call-error"));
        }
        self.reset();
        Ok(())
    }

    /// Stores an inbound invite (Idle or PendingInbound → PendingInbound).
    /// Returns the offer it replaced, if any, so the caller can log the
    /// implicit rejection; no reply is ever emitted for the replaced one.
    pub fn store_incoming_offer(
        &mut self,
        offer: IncomingCallOffer,
    ) -> Result<Option<IncomingCallOffer>, InvalidTransition> {
        match self.phase {
            CallPhase::Idle | CallPhase::PendingInbound => {
                self.call_id = Some(offer.call_id.clone());
                let replaced = self.incoming_offer.replace(offer);
                self.phase = CallPhase::PendingInbound;
                Ok(replaced)
            }
            _ => Err(self.invalid("call-invite")),
        }
    }

    /// Appends an early candidate from the inviter to the held offer.
    /// Returns false (and changes nothing) unless sender and call id both
    /// match the pending offer.
    pub fn buffer_offer_candidate(
        &mut self,
        from: &str,
        call_id: &CallId,
        candidate: IceCandidateInit,
    ) -> bool {
        match self.incoming_offer.as_mut() {
            Some(offer) if offer.from == from && &offer.call_id == call_id => {
                offer.buffered_candidates.push(candidate);
                true
            }
            _ => false,
        }
    }

    /// PendingInbound → Active. The held offer is consumed and its sender
    /// becomes the first participant.
    pub fn accept_incoming(&mut self) -> Result<IncomingCallOffer, InvalidTransition> {
        if self.phase != CallPhase::PendingInbound {
            return Err(self.invalid("accept"));
        }
        let Some(offer) = self.incoming_offer.take() else {
            return Err(self.invalid("accept"));
        };
        self.call_id = Some(offer.call_id.clone());
        self.participants.insert(offer.from.clone());
        self.active_since = Some(Utc::now());
        self.phase = CallPhase::Active;
        Ok(offer)
    }

    /// PendingInbound → Idle. The held offer is consumed so the caller
    /// can notify the inviter.
    pub fn reject_incoming(&mut self) -> Result<IncomingCallOffer, InvalidTransition> {
        if self.phase != CallPhase::PendingInbound {
            return Err(self.invalid("reject"));
        }
        let Some(offer) = self.incoming_offer.take() else {
            return Err(self.invalid("reject"));
        };
        self.reset();
        Ok(offer)
    }

    /// Active → Active. Returns false when the id is already present or
    /// names the local participant.
    pub fn add_participant(&mut self, participant: &str) -> Result<bool, InvalidTransition> {
        if self.phase != CallPhase::Active {
            return Err(self.invalid("add-participant"));
        }
        if participant == self.local_participant {
            return Ok(false);
        }
        Ok(self.participants.insert(participant.to_string()))
    }

    /// Active → Active. Returns whether the participant was present. The
    /// call stays active even when the set empties; ending it is explicit.
    pub fn remove_participant(&mut self, participant: &str) -> Result<bool, InvalidTransition> {
        if self.phase != CallPhase::Active {
            return Err(self.invalid("participant-left"));
        }
        Ok(self.participants.remove(participant))
    }

    /// PendingOutbound | Active → Idle. Returns the call duration when the
    /// session had gone active.
    pub fn end(&mut self) -> Result<Option<i64>, InvalidTransition> {
        match self.phase {
            CallPhase::PendingOutbound | CallPhase::Active => {
                let duration = self
                    .active_since
                    .map(|since| Utc::now().signed_duration_since(since).num_seconds());
                self.reset();
                Ok(duration)
            }
            _ => Err(self.invalid("end-call")),
        }
    }

    fn reset(&mut self) {
        self.phase = CallPhase::Idle;
        self.call_id = None;
        self.participants.clear();
        self.pending_outbound_target = None;
        self.incoming_offer = None;
        self.active_since = None;
    }

    fn invalid(&self, attempted: &'static str) -> InvalidTransition {
        InvalidTransition {
            phase: self.phase,
            attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::call::CallId;

    fn session() -> CallSession {
        CallSession::new("alice")
    }

    fn offer_from(from: &str, call_id: &str) -> IncomingCallOffer {
        IncomingCallOffer::new(
            from,
            CallId::new(call_id),
            SessionDescription::offer(format!("v=0 offer from {from}")),
        )
    }

    /// Flow: Idle → PendingOutbound → Active → Idle.
    #[test]
    fn outgoing_call_flow() {
        let mut session = session();
        assert_eq!(session.phase(), CallPhase::Idle);

        session.begin_outbound("bob").unwrap();
        assert_eq!(session.phase(), CallPhase::PendingOutbound);
        assert_eq!(session.pending_outbound_target(), Some("bob"));
        // The relay has not assigned an id yet.
        assert!(session.call_id().is_none());

        session.confirm_outbound("bob", CallId::new("c1")).unwrap();
        assert_eq!(session.phase(), CallPhase::Active);
        assert_eq!(session.call_id(), Some(&CallId::new("c1")));
        assert!(session.participants().contains("bob"));
        assert!(session.pending_outbound_target().is_none());

        let duration = session.end().unwrap();
        assert!(duration.is_some());
        assert_eq!(session.phase(), CallPhase::Idle);
        assert!(session.call_id().is_none());
        assert!(session.participants().is_empty());
    }

    #[test]
    fn confirmation_for_wrong_target_is_rejected() {
        let mut session = session();
        session.begin_outbound("bob").unwrap();

        assert!(session.confirm_outbound("carol", CallId::new("c1")).is_err());
        // Nothing changed.
        assert_eq!(session.phase(), CallPhase::PendingOutbound);
        assert_eq!(session.pending_outbound_target(), Some("bob"));
    }

    /// Flow: Idle → PendingInbound → Active.
    #[test]
    fn incoming_call_flow() {
        let mut session = session();

        let replaced = session.store_incoming_offer(offer_from("bob", "c1")).unwrap();
        assert!(replaced.is_none());
        assert_eq!(session.phase(), CallPhase::PendingInbound);
        assert_eq!(session.call_id(), Some(&CallId::new("c1")));

        let offer = session.accept_incoming().unwrap();
        assert_eq!(offer.from, "bob");
        assert_eq!(session.phase(), CallPhase::Active);
        assert!(session.participants().contains("bob"));
        assert!(session.incoming_offer().is_none());
    }

    #[test]
    fn newer_invite_supersedes_pending_offer() {
        let mut session = session();
        session.store_incoming_offer(offer_from("bob", "c1")).unwrap();

        let replaced = session
            .store_incoming_offer(offer_from("carol", "c2"))
            .unwrap()
            .expect("first offer should be replaced");
        assert_eq!(replaced.from, "bob");
        assert_eq!(session.incoming_offer().unwrap().from, "carol");
        assert_eq!(session.call_id(), Some(&CallId::new("c2")));
    }

    #[test]
    fn reject_returns_offer_and_resets() {
        let mut session = session();
        session.store_incoming_offer(offer_from("bob", "c1")).unwrap();

        let offer = session.reject_incoming().unwrap();
        assert_eq!(offer.from, "bob");
        assert_eq!(session.phase(), CallPhase::Idle);
        assert!(session.call_id().is_none());

        assert!(session.reject_incoming().is_err());
    }

    #[test]
    fn offer_candidates_buffer_only_for_matching_invite() {
        let mut session = session();
        session.store_incoming_offer(offer_from("bob", "c1")).unwrap();

        let candidate = IceCandidateInit::new("candidate:1");
        assert!(session.buffer_offer_candidate("bob", &CallId::new("c1"), candidate.clone()));
        // Wrong sender or wrong call: dropped.
        assert!(!session.buffer_offer_candidate("carol", &CallId::new("c1"), candidate.clone()));
        assert!(!session.buffer_offer_candidate("bob", &CallId::new("c2"), candidate));

        assert_eq!(session.incoming_offer().unwrap().buffered_candidates.len(), 1);
    }

    #[test]
    fn participants_never_contain_the_local_side() {
        let mut session = session();
        session.begin_outbound("bob").unwrap();
        session.confirm_outbound("bob", CallId::new("c1")).unwrap();

        assert!(!session.add_participant("alice").unwrap());
        assert!(!session.participants().contains("alice"));

        assert!(session.add_participant("carol").unwrap());
        // Second add of the same participant reports false.
        assert!(!session.add_participant("carol").unwrap());
    }

    #[test]
    fn call_stays_active_when_everyone_leaves() {
        let mut session = session();
        session.begin_outbound("bob").unwrap();
        session.confirm_outbound("bob", CallId::new("c1")).unwrap();

        assert!(session.remove_participant("bob").unwrap());
        assert!(session.participants().is_empty());
        assert_eq!(session.phase(), CallPhase::Active);

        assert!(!session.remove_participant("bob").unwrap());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut session = session();

        // Nothing to confirm, accept, reject or end while idle.
        assert!(session.confirm_outbound("bob", CallId::new("c1")).is_err());
        assert!(session.accept_incoming().is_err());
        assert!(session.reject_incoming().is_err());
        assert!(session.end().is_err());
        assert!(session.add_participant("bob").is_err());
        assert!(session.remove_participant("bob").is_err());

        // A second initiate while one is pending is illegal.
        session.begin_outbound("bob").unwrap();
        assert!(session.begin_outbound("carol").is_err());

        // An invite cannot be stored while an outgoing call is pending;
        // the manager auto-rejects it instead.
        assert!(session.store_incoming_offer(offer_from("carol", "c9")).is_err());
    }

    #[test]
    fn pending_outbound_end_has_no_duration() {
        let mut session = session();
        session.begin_outbound("bob").unwrap();
        assert_eq!(session.end().unwrap(), None);
        assert_eq!(session.phase(), CallPhase::Idle);
    }

    #[test]
    fn fail_outbound_only_from_pending() {
        let mut session = session();
        assert!(session.fail_outbound().is_err());

        session.begin_outbound("bob").unwrap();
        session.fail_outbound().unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
        assert!(session.pending_outbound_target().is_none());
    }
}
