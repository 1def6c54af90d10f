//! Call identity types shared across the signaling modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque call identifier. Assigned by the relay when a call is created;
/// the client never generates one locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Direction of a call relative to the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Reason attached to an outgoing `call-rejected` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The local client already has a call in progress.
    Busy,
    /// The user declined the invite.
    Declined,
    /// Caller-supplied reason text.
    Custom(String),
}

impl RejectReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Busy => "User is already in another call",
            Self::Declined => "Call declined",
            Self::Custom(reason) => reason,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
