//! Peercall error types.
//!
//! # Fatal vs. transient
//!
//! Errors are split by what they do to the current call:
//!
//! - **Structural** errors (`MediaAcquisition`, `InvalidStateTransition`,
//!   `MalformedPayload`, `Backend`) destroy the session and move it to
//!   `Failed`. They are never retried.
//! - **Rejections** (`AlreadyInSession`, `OfferOutstanding`, `NoActiveSession`,
//!   ...) report local misuse or an unwanted message and leave the session
//!   untouched.
//!
//! A single transport fragment failing to apply is not an error at this level;
//! it is reported as a notice and the session carries on.

use thiserror::Error;

use crate::negotiation::NegotiationState;
use crate::protocol::Participant;

/// Peercall errors.
#[derive(Error, Debug)]
pub enum CallError {
    /// Camera/microphone could not be acquired.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// A call was requested while another session exists.
    #[error("Already in a session with {remote}")]
    AlreadyInSession {
        /// Remote participant of the existing session.
        remote: Participant,
    },

    /// A message arrived in a state that cannot process it.
    #[error("Cannot process {event} in state {state}")]
    InvalidStateTransition {
        /// State the session was in.
        state: NegotiationState,
        /// Event that was rejected.
        event: &'static str,
    },

    /// A description or fragment failed validation.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A second, different offer arrived while one is being answered.
    #[error("Offer already outstanding for {remote}")]
    OfferOutstanding {
        /// Remote participant of the session.
        remote: Participant,
    },

    /// Operation requires an active session with the addressed participant.
    #[error("No active session with {0}")]
    NoActiveSession(Participant),

    /// `start_call` without a target and nothing selected.
    #[error("No remote participant selected")]
    NoRemoteSelected,

    /// Empty identifier or an attempt to call oneself.
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// Identifier already registered with the relay.
    #[error("Participant name already taken: {0}")]
    NameTaken(Participant),

    /// Participant is not on the relay's roster.
    #[error("Unknown participant: {0}")]
    UnknownParticipant(Participant),

    /// Media backend failure outside media acquisition.
    #[error("Media backend error: {0}")]
    Backend(String),

    /// Agent or relay task is gone.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallError {
    /// Whether this error destroys the session it was raised against.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::MediaAcquisition(_)
                | CallError::InvalidStateTransition { .. }
                | CallError::MalformedPayload(_)
                | CallError::Backend(_)
        )
    }
}

/// Result type alias for peercall operations
pub type Result<T> = std::result::Result<T, CallError>;

impl From<toml::de::Error> for CallError {
    fn from(err: toml::de::Error) -> Self {
        CallError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for CallError {
    fn from(err: base64::DecodeError) -> Self {
        CallError::MalformedPayload(format!("Base64 decode error: {err}"))
    }
}
