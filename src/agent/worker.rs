//! Media worker task.
//!
//! Runs media operations strictly in issue order. Operations whose ticket is
//! no longer current are skipped. Media acquisition only needs the session to
//! match, and `release-media` always runs.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::AgentInput;
use crate::media::{self, MediaBackend};
use crate::negotiation::{MediaOp, Ticket};

/// One queued media operation
#[derive(Debug)]
pub(crate) struct MediaJob {
    pub ticket: Ticket,
    pub op: MediaOp,
}

pub(crate) async fn run(
    backend: Arc<dyn MediaBackend>,
    mut jobs: mpsc::UnboundedReceiver<MediaJob>,
    current: watch::Receiver<Option<Ticket>>,
    completions: mpsc::Sender<AgentInput>,
) {
    debug!(backend = backend.name(), "Media worker started");

    while let Some(MediaJob { ticket, op }) = jobs.recv().await {
        let stale = match (&*current.borrow(), &op) {
            (_, MediaOp::ReleaseMedia) => false,
            (Some(live), op) if op.is_session_scoped() => live.session != ticket.session,
            (live, _) => live.as_ref() != Some(&ticket),
        };
        if stale {
            debug!(ticket = %ticket, op = op.name(), "Skipping stale media operation");
            continue;
        }

        let Some(outcome) = media::execute(backend.as_ref(), op).await else {
            continue;
        };
        if completions
            .send(AgentInput::Completion { ticket, outcome })
            .await
            .is_err()
        {
            break;
        }
    }

    // agent is gone; never leave devices held
    if let Err(e) = backend.release_media().await {
        warn!(backend = backend.name(), "Final media release failed: {}", e);
    }
    debug!(backend = backend.name(), "Media worker stopped");
}
