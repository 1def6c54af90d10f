//! Per-call registry of remote participants' connection state.
//!
//! One [`PeerEntry`] per live participant, owned exclusively by the
//! registry and scoped to the enclosing call session. The entry carries
//! the candidate buffer that reconciles the "set remote description" /
//! "ice candidate" race: candidates arriving early are buffered in
//! receipt order and flushed the moment the description lands.

use super::media::{MediaError, PeerConnection};
use super::message::{IceCandidateInit, SessionDescription};
use log::warn;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Which side of the offer/answer exchange an entry plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum NegotiationRole {
    #[default]
    None,
    Offerer,
    Answerer,
}

/// What happened to a remote candidate handed to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Buffered,
}

/// Result of a candidate flush. The buffer is always empty afterwards:
/// on failure the remaining candidates are dropped, never retried.
#[derive(Debug)]
pub struct FlushOutcome {
    pub applied: usize,
    pub dropped: usize,
    pub error: Option<MediaError>,
}

pub struct PeerEntry {
    connection: Arc<dyn PeerConnection>,
    role: NegotiationRole,
    buffered_candidates: Vec<IceCandidateInit>,
    remote_description_set: bool,
}

impl PeerEntry {
    pub fn new(connection: Arc<dyn PeerConnection>, role: NegotiationRole) -> Self {
        Self {
            connection,
            role,
            buffered_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered_candidates.len()
    }

    /// Seeds candidates collected before this entry existed (the
    /// invite-to-accept window). Only meaningful before the remote
    /// description is applied.
    pub fn seed_candidates(&mut self, candidates: Vec<IceCandidateInit>) {
        debug_assert!(!self.remote_description_set);
        self.buffered_candidates.extend(candidates);
    }

    /// Applies the remote description, then flushes the buffer in receipt
    /// order. An `Err` means the description itself was refused and the
    /// entry is unusable; a flush failure is reported in the outcome and
    /// the remaining candidates are dropped, with the description staying
    /// applied.
    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<FlushOutcome, MediaError> {
        self.connection.set_remote_description(desc).await?;
        self.remote_description_set = true;
        Ok(self.flush_candidates().await)
    }

    /// Applies the candidate immediately once the remote description is
    /// set, buffers it otherwise.
    pub async fn add_or_buffer(
        &mut self,
        candidate: IceCandidateInit,
    ) -> Result<CandidateDisposition, MediaError> {
        if self.remote_description_set {
            self.connection.add_ice_candidate(candidate).await?;
            Ok(CandidateDisposition::Applied)
        } else {
            self.buffered_candidates.push(candidate);
            Ok(CandidateDisposition::Buffered)
        }
    }

    async fn flush_candidates(&mut self) -> FlushOutcome {
        let pending = std::mem::take(&mut self.buffered_candidates);
        let total = pending.len();
        let mut applied = 0;
        for candidate in pending {
            if let Err(error) = self.connection.add_ice_candidate(candidate).await {
                let dropped = total - applied;
                warn!(
                    target: "Calls",
                    "Candidate flush failed after {applied} of {total}; dropping {dropped}: {error}"
                );
                return FlushOutcome {
                    applied,
                    dropped,
                    error: Some(error),
                };
            }
            applied += 1;
        }
        FlushOutcome {
            applied,
            dropped: 0,
            error: None,
        }
    }

    async fn close(self) {
        self.connection.close().await;
    }
}

/// One entry per live participant in the current call session. Holds no
/// cross-peer invariants beyond that.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerEntry>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.peers.contains_key(participant)
    }

    pub fn get(&self, participant: &str) -> Option<&PeerEntry> {
        self.peers.get(participant)
    }

    pub fn get_mut(&mut self, participant: &str) -> Option<&mut PeerEntry> {
        self.peers.get_mut(participant)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Registers an entry. Not idempotent: inserting over a live entry
    /// leaks its connection handle, so callers check `contains` first.
    pub fn insert(&mut self, participant: impl Into<String>, entry: PeerEntry) {
        self.peers.insert(participant.into(), entry);
    }

    /// Closes the connection and discards buffered candidates. No-op on
    /// absent ids.
    pub async fn destroy(&mut self, participant: &str) -> bool {
        match self.peers.remove(participant) {
            Some(entry) => {
                entry.close().await;
                true
            }
            None => false,
        }
    }

    /// Tears down every entry; returns how many were destroyed.
    pub async fn destroy_all(&mut self) -> usize {
        let peers = std::mem::take(&mut self.peers);
        let count = peers.len();
        for (_, entry) in peers {
            entry.close().await;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::media::mock::MockPeerConnection;
    use std::sync::atomic::Ordering;

    fn candidate(n: u32) -> IceCandidateInit {
        IceCandidateInit::new(format!("candidate:{n} 1 UDP 2130706431 192.0.2.1 5000 typ host"))
    }

    #[tokio::test]
    async fn candidates_buffer_until_remote_description_then_flush_in_order() {
        let conn = Arc::new(MockPeerConnection::new("bob"));
        let mut entry = PeerEntry::new(conn.clone(), NegotiationRole::Offerer);

        for n in 1..=3 {
            let disposition = entry.add_or_buffer(candidate(n)).await.unwrap();
            assert_eq!(disposition, CandidateDisposition::Buffered);
        }
        assert_eq!(entry.buffered_len(), 3);
        assert!(conn.applied().is_empty());

        let outcome = entry
            .apply_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.dropped, 0);
        assert!(outcome.error.is_none());
        assert_eq!(entry.buffered_len(), 0);

        let applied: Vec<String> = conn.applied().into_iter().map(|c| c.candidate).collect();
        assert_eq!(applied, vec![
            candidate(1).candidate,
            candidate(2).candidate,
            candidate(3).candidate,
        ]);

        // Once the description is set, candidates apply immediately.
        let disposition = entry.add_or_buffer(candidate(4)).await.unwrap();
        assert_eq!(disposition, CandidateDisposition::Applied);
        assert_eq!(conn.applied().len(), 4);
    }

    #[tokio::test]
    async fn flush_failure_drops_the_remainder() {
        let conn = Arc::new(MockPeerConnection::new("bob"));
        *conn.fail_candidate_at.lock().unwrap() = Some(1);
        let mut entry = PeerEntry::new(conn.clone(), NegotiationRole::Answerer);

        for n in 1..=3 {
            entry.add_or_buffer(candidate(n)).await.unwrap();
        }

        let outcome = entry
            .apply_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.dropped, 2);
        assert!(outcome.error.is_some());
        // The buffer is empty either way; nothing is retried.
        assert_eq!(entry.buffered_len(), 0);
        assert_eq!(conn.applied().len(), 1);
        assert!(entry.has_remote_description());
    }

    #[tokio::test]
    async fn seeded_candidates_flush_before_later_arrivals() {
        let conn = Arc::new(MockPeerConnection::new("bob"));
        let mut entry = PeerEntry::new(conn.clone(), NegotiationRole::Answerer);

        entry.seed_candidates(vec![candidate(1), candidate(2)]);
        entry.add_or_buffer(candidate(3)).await.unwrap();

        entry
            .apply_remote_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let applied: Vec<String> = conn.applied().into_iter().map(|c| c.candidate).collect();
        assert_eq!(applied, vec![
            candidate(1).candidate,
            candidate(2).candidate,
            candidate(3).candidate,
        ]);
    }

    #[tokio::test]
    async fn destroy_closes_the_connection_and_is_noop_on_absent_ids() {
        let mut registry = PeerRegistry::new();
        let conn = Arc::new(MockPeerConnection::new("bob"));
        registry.insert("bob", PeerEntry::new(conn.clone(), NegotiationRole::Offerer));
        assert!(registry.contains("bob"));
        assert_eq!(registry.get("bob").unwrap().role(), NegotiationRole::Offerer);

        assert!(registry.destroy("bob").await);
        assert!(conn.closed.load(Ordering::SeqCst));
        assert!(!registry.contains("bob"));

        // Absent ids are a no-op.
        assert!(!registry.destroy("bob").await);
        assert!(!registry.destroy("nobody").await);
    }

    #[tokio::test]
    async fn destroy_all_counts_and_closes_everything() {
        let mut registry = PeerRegistry::new();
        let bob = Arc::new(MockPeerConnection::new("bob"));
        let carol = Arc::new(MockPeerConnection::new("carol"));
        registry.insert("bob", PeerEntry::new(bob.clone(), NegotiationRole::Offerer));
        registry.insert("carol", PeerEntry::new(carol.clone(), NegotiationRole::Offerer));

        assert_eq!(registry.destroy_all().await, 2);
        assert!(registry.is_empty());
        assert!(bob.closed.load(Ordering::SeqCst));
        assert!(carol.closed.load(Ordering::SeqCst));
    }
}
