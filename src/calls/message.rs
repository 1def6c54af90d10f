//! Wire catalogue for the signaling channel.
//!
//! Every frame is a JSON object with a required `type` discriminant plus
//! `from`/`target` participant identifiers where applicable. Unknown
//! discriminants decode to [`SignalMessage::Unknown`] and are ignored by
//! the router rather than treated as errors; the relay is free to grow
//! the catalogue without breaking older clients.

use crate::types::call::CallId;
use serde::{Deserialize, Serialize};

/// One half of a session-description exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A single ICE candidate: the RFC 5245 candidate line plus the SDP
/// correlation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }
}

/// Signaling messages exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Ask the relay to create a call towards `target`. The relay answers
    /// with `call-created` carrying the assigned id.
    #[serde(rename_all = "camelCase")]
    CreateCall { from: String, target: String },

    /// Relay confirmation of `create-call`.
    #[serde(rename_all = "camelCase")]
    CallCreated { target: String, call_id: CallId },

    /// Offer carried to (or received from) a participant.
    #[serde(rename_all = "camelCase")]
    CallInvite {
        from: String,
        target: String,
        call_id: CallId,
        sdp: SessionDescription,
    },

    /// Answer to a previously sent invite.
    #[serde(rename_all = "camelCase")]
    CallAnswer {
        from: String,
        target: String,
        call_id: CallId,
        sdp: SessionDescription,
    },

    /// Invite declined, either by a user or automatically (busy).
    #[serde(rename_all = "camelCase")]
    CallRejected {
        from: String,
        target: String,
        call_id: CallId,
        reason: String,
    },

    /// Connectivity candidate for one peer's negotiation.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        from: String,
        target: String,
        call_id: CallId,
        candidate: IceCandidateInit,
    },

    /// A participant left the call (also sent to every participant on a
    /// local hang-up).
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        from: String,
        target: String,
        call_id: CallId,
    },

    /// Relay-side failure for a pending call.
    #[serde(rename_all = "camelCase")]
    CallError { message: String },

    /// Any discriminant this client does not know. Ignored.
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    /// Wire discriminant, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CreateCall { .. } => "create-call",
            Self::CallCreated { .. } => "call-created",
            Self::CallInvite { .. } => "call-invite",
            Self::CallAnswer { .. } => "call-answer",
            Self::CallRejected { .. } => "call-rejected",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ParticipantLeft { .. } => "participant-left",
            Self::CallError { .. } => "call-error",
            Self::Unknown => "unknown",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_uses_wire_field_names() {
        let msg = SignalMessage::CallInvite {
            from: "alice".into(),
            target: "bob".into(),
            call_id: CallId::new("c1"),
            sdp: SessionDescription::offer("v=0"),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"call-invite""#), "{json}");
        assert!(json.contains(r#""callId":"c1""#), "{json}");
        assert!(json.contains(r#""kind":"offer""#), "{json}");
    }

    #[test]
    fn unknown_types_decode_to_unknown() {
        let msg =
            SignalMessage::from_json(r#"{"type":"typing-indicator","from":"bob"}"#).unwrap();
        assert_eq!(msg, SignalMessage::Unknown);
    }

    #[test]
    fn candidate_omits_absent_correlation_fields() {
        let msg = SignalMessage::IceCandidate {
            from: "bob".into(),
            target: "alice".into(),
            call_id: CallId::new("c1"),
            candidate: IceCandidateInit::new("candidate:1 1 UDP 2130706431 192.0.2.1 5000 typ host"),
        };
        let json = msg.to_json().unwrap();
        assert!(!json.contains("sdpMid"), "{json}");

        let with_fields = IceCandidateInit::new("candidate:2")
            .with_sdp_mid("0")
            .with_sdp_m_line_index(0);
        let json = serde_json::to_string(&with_fields).unwrap();
        assert!(json.contains(r#""sdpMid":"0""#), "{json}");
        assert!(json.contains(r#""sdpMLineIndex":0"#), "{json}");
    }
}
