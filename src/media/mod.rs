//! Media backend seam.
//!
//! The negotiation engine never touches cameras, microphones or the peer
//! transport itself. It emits [`MediaOp`]s; the agent runs them in order
//! against a [`MediaBackend`] and feeds the resulting [`Outcome`] back.
//!
//! ```text
//! ┌────────────────────┐   MediaOp (FIFO)   ┌─────────────────┐
//! │ SessionLifecycle   │ ─────────────────> │  MediaBackend   │
//! │ Manager            │ <───────────────── │ (loopback, ...) │
//! └────────────────────┘  Outcome + Ticket  └─────────────────┘
//! ```

mod loopback;

pub use loopback::{LoopbackMedia, LoopbackSnapshot};

pub use crate::negotiation::LocalDescription;

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::{CallError, Result};
use crate::negotiation::{FailureStage, MediaOp, Outcome};
use crate::protocol::{IceCandidate, SessionDescription};

/// Boxed future returned by backend operations
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Media stack used by a call agent.
///
/// Implementations own the local camera/microphone and the peer transport.
/// Calls arrive strictly in the order the session issued them.
pub trait MediaBackend: Send + Sync {
    /// Acquire local camera/microphone.
    fn acquire_media(&self) -> BackendFuture<'_, ()>;

    /// Create a local offer and gather its candidates.
    fn create_offer(&self) -> BackendFuture<'_, LocalDescription>;

    /// Create a local answer for an applied remote offer.
    fn create_answer<'a>(
        &'a self,
        remote: &'a SessionDescription,
    ) -> BackendFuture<'a, LocalDescription>;

    /// Apply the remote description.
    fn apply_remote_description<'a>(
        &'a self,
        description: &'a SessionDescription,
    ) -> BackendFuture<'a, ()>;

    /// Apply one remote candidate.
    fn apply_candidate<'a>(&'a self, candidate: &'a IceCandidate) -> BackendFuture<'a, ()>;

    /// Discard the local offer after losing glare.
    fn rollback(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Close the transport and release camera/microphone.
    fn release_media(&self) -> BackendFuture<'_, ()>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Run one operation and translate the result into an [`Outcome`].
///
/// Returns `None` for operations the session does not wait on
/// (rollback and release). Their failures are only logged.
pub async fn execute(backend: &dyn MediaBackend, op: MediaOp) -> Option<Outcome> {
    debug!(backend = backend.name(), op = op.name(), "Running media operation");

    match op {
        MediaOp::AcquireMedia => Some(match backend.acquire_media().await {
            Ok(()) => Outcome::MediaAcquired,
            Err(e) => failed(FailureStage::Media, e),
        }),
        MediaOp::CreateOffer => Some(match backend.create_offer().await {
            Ok(local) => Outcome::OfferCreated(local),
            Err(e) => failed(FailureStage::LocalDescription, e),
        }),
        MediaOp::CreateAnswer { remote } => Some(match backend.create_answer(&remote).await {
            Ok(local) => Outcome::AnswerCreated(local),
            Err(e) => failed(FailureStage::LocalDescription, e),
        }),
        MediaOp::ApplyRemoteDescription(description) => {
            Some(match backend.apply_remote_description(&description).await {
                Ok(()) => Outcome::RemoteDescriptionApplied,
                Err(e) => failed(FailureStage::RemoteDescription, e),
            })
        },
        MediaOp::ApplyCandidate(candidate) => Some(match backend.apply_candidate(&candidate).await {
            Ok(()) => Outcome::CandidateApplied(candidate),
            Err(e) => Outcome::CandidateFailed {
                candidate,
                reason: e.to_string(),
            },
        }),
        MediaOp::Rollback => {
            if let Err(e) = backend.rollback().await {
                warn!(backend = backend.name(), "Rollback failed: {}", e);
            }
            None
        },
        MediaOp::ReleaseMedia => {
            if let Err(e) = backend.release_media().await {
                warn!(backend = backend.name(), "Releasing media failed: {}", e);
            }
            None
        },
    }
}

fn failed(stage: FailureStage, error: CallError) -> Outcome {
    let reason = match error {
        CallError::MediaAcquisition(reason) | CallError::Backend(reason) => reason,
        other => other.to_string(),
    };
    Outcome::Failed { stage, reason }
}
