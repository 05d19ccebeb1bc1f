//! Participants, session descriptions and transport fragments.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result};

/// Display identifier registered with the relay.
///
/// Ordering is plain lexicographic string ordering; glare resolution relies on
/// both peers comparing the same two identifiers the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Participant(String);

impl Participant {
    /// Create a participant, trimming surrounding whitespace.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(CallError::InvalidParticipant(
                "participant name is empty".to_string(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    /// Identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Participant {
    type Error = CallError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Participant> for String {
    fn from(participant: Participant) -> Self {
        participant.0
    }
}

impl std::str::FromStr for Participant {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Proposed media parameters
    Offer,
    /// Accepted media parameters
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Opaque session description (`RTCSessionDescriptionInit` shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body, never interpreted by the engine
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Check the description is a non-empty blob of the expected kind.
    pub fn validate(&self, expected: SdpType) -> Result<()> {
        if self.sdp_type != expected {
            return Err(CallError::MalformedPayload(format!(
                "expected {expected} description, got {}",
                self.sdp_type
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(CallError::MalformedPayload(format!(
                "{expected} description has an empty body"
            )));
        }
        Ok(())
    }
}

/// Transport-establishment fragment (`RTCIceCandidateInit` shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line this candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate without media line association
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    /// Associate the candidate with a media line
    pub fn with_mid(mut self, mid: impl Into<String>, m_line_index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_m_line_index = Some(m_line_index);
        self
    }

    /// Check the candidate line is not empty.
    pub fn validate(&self) -> Result<()> {
        if self.candidate.trim().is_empty() {
            return Err(CallError::MalformedPayload(
                "candidate line is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kind of a signal payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
    /// Transport fragment
    Candidate,
}

impl SignalKind {
    /// Lowercase name as used on the wire and in logs
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of a `signal` relay message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    /// Session offer
    Offer {
        /// Offered description
        offer: SessionDescription,
    },
    /// Session answer
    Answer {
        /// Answering description
        answer: SessionDescription,
    },
    /// Transport fragment
    Candidate {
        /// Discovered candidate
        candidate: IceCandidate,
    },
}

impl SignalPayload {
    /// Payload kind
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalPayload::Offer { .. } => SignalKind::Offer,
            SignalPayload::Answer { .. } => SignalKind::Answer,
            SignalPayload::Candidate { .. } => SignalKind::Candidate,
        }
    }
}
