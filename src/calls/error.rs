//! Call-related error types.
//!
//! Two conditions from the failure taxonomy deliberately have no variant
//! here: protocol violations (frames referencing an unknown call or peer)
//! are logged and ignored without mutating state, and remote rejections
//! are expected control flow dispatched as events.

use thiserror::Error;

use super::media::MediaError;
use super::state::InvalidTransition;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum CallError {
    /// The signaling channel is not open. Non-fatal; nothing is queued.
    #[error("signaling transport unavailable: {0}")]
    Transport(#[from] TransportError),

    /// Capture device denied or unavailable; the call attempt is aborted.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Offer/answer or description application failed for one peer.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("no call in progress")]
    NoActiveCall,

    #[error("a call is already in progress")]
    AlreadyInCall,

    #[error("no pending incoming call")]
    NoPendingOffer,

    #[error("{0} is already in the call")]
    AlreadyParticipant(String),

    #[error("cannot call yourself")]
    SelfTarget,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::AcquisitionFailed(msg) => Self::MediaAcquisition(msg),
            MediaError::NegotiationFailed(msg) => Self::Negotiation(msg),
        }
    }
}
