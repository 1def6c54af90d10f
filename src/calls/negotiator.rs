//! Offer/answer orchestration over a [`PeerConnection`].
//!
//! Remote descriptions are applied through the peer registry entry so the
//! candidate buffer/flush discipline holds; these helpers only cover the
//! local half of each exchange. Failures propagate as
//! [`MediaError::NegotiationFailed`] for the manager to turn into a
//! rejection or error signal; nothing here retries.

use super::media::{MediaError, PeerConnection};
use super::message::SessionDescription;

/// Creates an offer and applies it as the local description.
pub async fn start_offer(conn: &dyn PeerConnection) -> Result<SessionDescription, MediaError> {
    let offer = conn.create_offer().await?;
    conn.set_local_description(offer.clone()).await?;
    Ok(offer)
}

/// Creates an answer and applies it as the local description. The remote
/// offer must already have been applied.
pub async fn create_answer(conn: &dyn PeerConnection) -> Result<SessionDescription, MediaError> {
    let answer = conn.create_answer().await?;
    conn.set_local_description(answer.clone()).await?;
    Ok(answer)
}
