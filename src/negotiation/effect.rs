//! Effects produced by transitions and completions fed back into them.
//!
//! Transitions never perform I/O. They return [`Effect`]s which the agent
//! dispatches: relay messages go to the relay, media operations go to the
//! media worker in order, notifications go to the application. Media
//! operations finish asynchronously and come back as an [`Outcome`] tagged
//! with the [`Ticket`] they were issued under.

use std::fmt;

use super::state::NegotiationState;
use crate::protocol::{IceCandidate, Participant, RelayMessage, SessionDescription};

/// Identifies the negotiation attempt a media operation belongs to.
///
/// The attempt is bumped when a glare rollback discards the local offer, so a
/// completion for the discarded offer no longer matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Session ID
    pub session: String,
    /// Negotiation attempt within the session
    pub attempt: u32,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.session.get(..8).unwrap_or(self.session.as_str());
        write!(f, "{}#{}", short, self.attempt)
    }
}

/// Local description plus the fragments gathered for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescription {
    /// Offer or answer to send
    pub description: SessionDescription,
    /// Candidates to trickle after the description
    pub candidates: Vec<IceCandidate>,
}

impl LocalDescription {
    /// Description without gathered candidates
    pub fn new(description: SessionDescription) -> Self {
        Self {
            description,
            candidates: Vec::new(),
        }
    }

    /// Attach gathered candidates
    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Operation for the media backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOp {
    /// Acquire camera/microphone
    AcquireMedia,
    /// Produce a local offer
    CreateOffer,
    /// Produce a local answer to the given remote offer
    CreateAnswer {
        /// Offer being answered
        remote: SessionDescription,
    },
    /// Discard a local offer (glare rollback)
    Rollback,
    /// Apply the remote description
    ApplyRemoteDescription(SessionDescription),
    /// Apply a remote fragment
    ApplyCandidate(IceCandidate),
    /// Close the transport and release camera/microphone
    ReleaseMedia,
}

impl MediaOp {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            MediaOp::AcquireMedia => "acquire-media",
            MediaOp::CreateOffer => "create-offer",
            MediaOp::CreateAnswer { .. } => "create-answer",
            MediaOp::Rollback => "rollback",
            MediaOp::ApplyRemoteDescription(_) => "apply-remote-description",
            MediaOp::ApplyCandidate(_) => "apply-candidate",
            MediaOp::ReleaseMedia => "release-media",
        }
    }

    /// Whether the operation belongs to the session as a whole rather than
    /// one negotiation attempt. Such operations survive a glare rollback.
    pub fn is_session_scoped(&self) -> bool {
        matches!(self, MediaOp::AcquireMedia | MediaOp::ReleaseMedia)
    }
}

/// Stage at which a media operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Camera/microphone acquisition
    Media,
    /// Creating the local description
    LocalDescription,
    /// Applying the remote description
    RemoteDescription,
}

/// Result of a media operation, fed back into the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Media acquired
    MediaAcquired,
    /// Local offer ready
    OfferCreated(LocalDescription),
    /// Local answer ready
    AnswerCreated(LocalDescription),
    /// Remote description applied
    RemoteDescriptionApplied,
    /// Fragment applied
    CandidateApplied(IceCandidate),
    /// Fragment rejected by the transport (transient)
    CandidateFailed {
        /// Rejected fragment
        candidate: IceCandidate,
        /// Backend reason
        reason: String,
    },
    /// Structural failure
    Failed {
        /// Where it failed
        stage: FailureStage,
        /// Backend reason
        reason: String,
    },
}

impl Outcome {
    /// Whether the outcome answers a session-scoped operation
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            Outcome::MediaAcquired
                | Outcome::Failed {
                    stage: FailureStage::Media,
                    ..
                }
        )
    }
}

/// Notification for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Call could not be established or broke down
    CallFailed {
        /// Remote participant
        remote: Participant,
        /// Why
        reason: String,
    },
    /// Call ended
    CallEnded {
        /// Remote participant
        remote: Participant,
        /// Hung up by the remote side (or the remote left the roster)
        by_remote: bool,
    },
    /// Remote hung up before answering our offer
    CallRejected {
        /// Called participant
        from: Participant,
    },
    /// Incoming offer rejected because a session with someone else exists
    Busy {
        /// Rejected caller
        from: Participant,
    },
    /// Remote fragment could not be applied; the session carries on
    CandidateRejected {
        /// Remote participant
        remote: Participant,
        /// Why
        reason: String,
    },
}

/// Side effect of a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to the relay
    Send(RelayMessage),
    /// Run on the media backend
    Media {
        /// Attempt the operation belongs to
        ticket: Ticket,
        /// Operation
        op: MediaOp,
    },
    /// Session state changed
    StateChanged {
        /// Remote participant
        remote: Participant,
        /// Previous state
        from: NegotiationState,
        /// New state
        to: NegotiationState,
    },
    /// Notification for the application
    Notify(SessionNotice),
    /// Roster update for the application
    Roster(Vec<Participant>),
    /// Non-core relay message for the chat/UI collaborator
    Forward(RelayMessage),
}
