//! Seam to the external media-transport primitive.
//!
//! The call manager decides *when* offers, answers and candidates are
//! produced or applied; the engine owns codec negotiation and NAT
//! traversal. Engine callbacks (locally gathered candidates, incoming
//! tracks) are turned into [`MediaEvent`]s and fed back through the same
//! loop that processes inbound signaling, so handler bodies never
//! interleave.

use super::message::{IceCandidateInit, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum MediaError {
    /// The capture device was denied or is unavailable.
    #[error("media acquisition failed: {0}")]
    AcquisitionFailed(String),

    /// Offer/answer creation or description/candidate application failed.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
}

/// Event emitted by a peer connection, re-entering the signaling loop.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// The engine gathered a local ICE candidate for `participant`.
    LocalCandidate {
        participant: String,
        candidate: IceCandidateInit,
    },
    /// A remote media track arrived from `participant`.
    RemoteTrack { participant: String },
}

/// Handle to the local capture stream, shared read-only by every peer
/// connection in a session.
pub trait LocalMedia: Send + Sync {
    /// Stops capture. Owned by the teardown path, but implementations must
    /// tolerate repeated calls: teardown and failed-initiation cleanup can
    /// race.
    fn stop(&self);
}

/// One remote participant's media connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MediaError>;

    /// Releases the underlying transport. Infallible; close errors are the
    /// engine's to log.
    async fn close(&self);
}

/// Factory for capture streams and peer connections.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn acquire_local_media(&self) -> Result<Arc<dyn LocalMedia>, MediaError>;

    /// Creates a connection towards `participant` carrying the shared
    /// local stream. The engine forwards its candidate/track callbacks
    /// into `events`.
    async fn create_peer_connection(
        &self,
        participant: &str,
        local_media: Arc<dyn LocalMedia>,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MockLocalMedia {
        pub stop_count: AtomicUsize,
    }

    impl LocalMedia for MockLocalMedia {
        fn stop(&self) {
            self.stop_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Scripted peer connection recording everything applied to it.
    #[derive(Default)]
    pub struct MockPeerConnection {
        pub participant: String,
        pub local_description: Mutex<Option<SessionDescription>>,
        pub remote_description: Mutex<Option<SessionDescription>>,
        pub applied_candidates: Mutex<Vec<IceCandidateInit>>,
        pub closed: AtomicBool,
        pub fail_create_offer: AtomicBool,
        pub fail_create_answer: AtomicBool,
        pub fail_set_remote: AtomicBool,
        /// When set, the Nth (0-based) `add_ice_candidate` call fails.
        pub fail_candidate_at: Mutex<Option<usize>>,
        candidate_calls: AtomicUsize,
    }

    impl MockPeerConnection {
        pub fn new(participant: &str) -> Self {
            Self {
                participant: participant.to_string(),
                ..Default::default()
            }
        }

        pub fn applied(&self) -> Vec<IceCandidateInit> {
            self.applied_candidates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PeerConnection for MockPeerConnection {
        async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
            if self.fail_create_offer.load(Ordering::SeqCst) {
                return Err(MediaError::NegotiationFailed("offer refused".into()));
            }
            Ok(SessionDescription::offer(format!(
                "v=0 offer for {}",
                self.participant
            )))
        }

        async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
            if self.fail_create_answer.load(Ordering::SeqCst) {
                return Err(MediaError::NegotiationFailed("answer refused".into()));
            }
            Ok(SessionDescription::answer(format!(
                "v=0 answer for {}",
                self.participant
            )))
        }

        async fn set_local_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), MediaError> {
            *self.local_description.lock().unwrap() = Some(desc);
            Ok(())
        }

        async fn set_remote_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), MediaError> {
            if self.fail_set_remote.load(Ordering::SeqCst) {
                return Err(MediaError::NegotiationFailed("description refused".into()));
            }
            *self.remote_description.lock().unwrap() = Some(desc);
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MediaError> {
            let call = self.candidate_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_candidate_at.lock().unwrap() == Some(call) {
                return Err(MediaError::NegotiationFailed("candidate refused".into()));
            }
            self.applied_candidates.lock().unwrap().push(candidate);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Engine handing out [`MockPeerConnection`]s and tracking the capture
    /// stream lifecycle.
    #[derive(Default)]
    pub struct MockMediaEngine {
        pub connections: Mutex<HashMap<String, Arc<MockPeerConnection>>>,
        pub last_media: Mutex<Option<Arc<MockLocalMedia>>>,
        pub fail_acquire: AtomicBool,
        pub fail_connect: AtomicBool,
    }

    impl MockMediaEngine {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn connection(&self, participant: &str) -> Option<Arc<MockPeerConnection>> {
            self.connections.lock().unwrap().get(participant).cloned()
        }

        pub fn media_stop_count(&self) -> usize {
            self.last_media
                .lock()
                .unwrap()
                .as_ref()
                .map(|m| m.stop_count.load(Ordering::SeqCst))
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl MediaEngine for MockMediaEngine {
        async fn acquire_local_media(&self) -> Result<Arc<dyn LocalMedia>, MediaError> {
            if self.fail_acquire.load(Ordering::SeqCst) {
                return Err(MediaError::AcquisitionFailed("capture device denied".into()));
            }
            let media = Arc::new(MockLocalMedia::default());
            *self.last_media.lock().unwrap() = Some(media.clone());
            Ok(media)
        }

        async fn create_peer_connection(
            &self,
            participant: &str,
            _local_media: Arc<dyn LocalMedia>,
            _events: mpsc::UnboundedSender<MediaEvent>,
        ) -> Result<Arc<dyn PeerConnection>, MediaError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(MediaError::NegotiationFailed("no transport".into()));
            }
            let conn = Arc::new(MockPeerConnection::new(participant));
            self.connections
                .lock()
                .unwrap()
                .insert(participant.to_string(), conn.clone());
            Ok(conn)
        }
    }
}
