//! Per-peer negotiation session.
//!
//! Every transition takes the current state plus one event, mutates the
//! session and appends the resulting [`Effect`]s. Nothing here awaits or
//! touches the network; the agent dispatches the effects.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::buffer::CandidateBuffer;
use super::effect::{Effect, FailureStage, LocalDescription, MediaOp, Outcome, SessionNotice, Ticket};
use super::glare::TieBreak;
use super::state::{NegotiationState, Role};
use crate::error::{CallError, Result};
use crate::protocol::{IceCandidate, Participant, RelayMessage, SdpType, SessionDescription};

/// Negotiation state for one pairing with a remote participant
#[derive(Debug)]
pub struct Session {
    /// Session ID
    id: String,
    /// Remote participant
    remote: Participant,
    /// Initiator, responder or not yet known
    role: Role,
    /// Current state
    state: NegotiationState,
    /// Bumped on glare rollback
    attempt: u32,
    /// Committed local description
    local_description: Option<SessionDescription>,
    /// Accepted remote description
    remote_description: Option<SessionDescription>,
    /// Fragments waiting for the remote description
    pending: CandidateBuffer,
    /// Fragments that arrived before our offer; only a competing remote
    /// offer can own them
    early: CandidateBuffer,
    /// Fragments handed to the media backend
    applied_fragments: u64,
    /// Media acquisition requested and not yet released
    media_requested: bool,
    /// Creation time
    created_at: Instant,
    /// Last event time
    last_activity: Instant,
}

impl Session {
    /// Create an idle session with an undetermined role
    pub fn new(remote: Participant) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            remote,
            role: Role::Undetermined,
            state: NegotiationState::Idle,
            attempt: 0,
            local_description: None,
            remote_description: None,
            pending: CandidateBuffer::new(),
            early: CandidateBuffer::new(),
            applied_fragments: 0,
            media_requested: false,
            created_at: now,
            last_activity: now,
        }
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote participant
    pub fn remote(&self) -> &Participant {
        &self.remote
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Negotiation attempt counter
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Ticket for media operations issued now
    pub fn ticket(&self) -> Ticket {
        Ticket {
            session: self.id.clone(),
            attempt: self.attempt,
        }
    }

    /// Committed local description
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    /// Accepted remote description
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Fragments still waiting for a remote description
    pub fn pending_fragments(&self) -> &CandidateBuffer {
        &self.pending
    }

    /// Fragments handed to the media backend so far
    pub fn applied_fragments(&self) -> u64 {
        self.applied_fragments
    }

    /// Check if session is established
    pub fn is_established(&self) -> bool {
        self.state == NegotiationState::Established
    }

    /// Session that exists only because fragments arrived before any offer
    pub fn is_pending_stub(&self) -> bool {
        self.state == NegotiationState::Idle && self.role == Role::Undetermined
    }

    /// Local call start: `Idle -> Offering`.
    ///
    /// Requests media and a local offer; the offer is sent once
    /// [`Outcome::OfferCreated`] comes back.
    pub fn start_call(&mut self, fx: &mut Vec<Effect>) -> Result<()> {
        if self.state != NegotiationState::Idle || self.role == Role::Responder {
            return Err(CallError::InvalidStateTransition {
                state: self.state,
                event: "start-call",
            });
        }

        self.touch();
        self.role = Role::Initiator;
        self.transition(NegotiationState::Offering, fx);
        self.request_media(fx);
        self.media(fx, MediaOp::CreateOffer);
        Ok(())
    }

    /// Take the fragments buffered so far, leaving none behind.
    pub fn take_pending(&mut self) -> Vec<IceCandidate> {
        self.pending.drain()
    }

    /// Keep fragments that arrived before our offer was sent. They are
    /// replayed only if a competing offer from the remote wins glare, and
    /// discarded once the remote answers.
    pub fn hold_early_fragments(&mut self, fragments: Vec<IceCandidate>) {
        for fragment in fragments {
            self.early.enqueue(fragment);
        }
    }

    /// Inbound offer.
    ///
    /// In `Idle` this makes the session a responder. While a local offer is
    /// outstanding the glare rule decides which offer survives.
    pub fn receive_offer(
        &mut self,
        local: &Participant,
        offer: SessionDescription,
        tie_break: TieBreak,
        fx: &mut Vec<Effect>,
    ) -> Result<()> {
        self.touch();

        match self.state {
            NegotiationState::Idle => self.accept_offer(offer, fx),
            NegotiationState::Offering | NegotiationState::AwaitingRemote => {
                if !tie_break.local_yields(local, &self.remote) {
                    info!(
                        session = %self.id,
                        remote = %self.remote,
                        rule = %tie_break,
                        "Glare: keeping local offer, ignoring remote offer"
                    );
                    return Ok(());
                }

                offer.validate(SdpType::Offer)?;
                info!(
                    session = %self.id,
                    remote = %self.remote,
                    rule = %tie_break,
                    "Glare: discarding local offer, answering remote offer"
                );

                self.attempt += 1;
                self.local_description = None;
                self.media(fx, MediaOp::Rollback);
                self.transition(NegotiationState::Idle, fx);

                let later = self.pending.drain();
                for fragment in self.early.drain().into_iter().chain(later) {
                    self.pending.enqueue(fragment);
                }
                self.accept_offer(offer, fx)
            },
            NegotiationState::Negotiating | NegotiationState::Established => {
                if self.remote_description.as_ref() == Some(&offer) {
                    debug!(session = %self.id, "Ignoring duplicate offer");
                    return Ok(());
                }
                Err(CallError::OfferOutstanding {
                    remote: self.remote.clone(),
                })
            },
            NegotiationState::Ended | NegotiationState::Failed => {
                Err(CallError::InvalidStateTransition {
                    state: self.state,
                    event: "offer",
                })
            },
        }
    }

    fn accept_offer(&mut self, offer: SessionDescription, fx: &mut Vec<Effect>) -> Result<()> {
        offer.validate(SdpType::Offer)?;

        self.role = Role::Responder;
        self.remote_description = Some(offer.clone());
        self.transition(NegotiationState::Negotiating, fx);
        self.request_media(fx);
        self.media(fx, MediaOp::ApplyRemoteDescription(offer.clone()));
        self.flush_pending(fx);
        self.media(fx, MediaOp::CreateAnswer { remote: offer });
        Ok(())
    }

    /// Inbound answer: `AwaitingRemote -> Negotiating -> Established`.
    pub fn receive_answer(&mut self, answer: SessionDescription, fx: &mut Vec<Effect>) -> Result<()> {
        self.touch();

        match self.state {
            NegotiationState::AwaitingRemote => {
                answer.validate(SdpType::Answer)?;

                let stale = self.early.clear();
                if stale > 0 {
                    debug!(session = %self.id, stale, "Discarded candidates sent before our offer");
                }
                self.transition(NegotiationState::Negotiating, fx);
                self.remote_description = Some(answer.clone());
                self.media(fx, MediaOp::ApplyRemoteDescription(answer));
                self.flush_pending(fx);
                self.transition(NegotiationState::Established, fx);
                Ok(())
            },
            _ if self.remote_description.as_ref() == Some(&answer) => {
                debug!(session = %self.id, "Ignoring duplicate answer");
                Ok(())
            },
            state => Err(CallError::InvalidStateTransition {
                state,
                event: "answer",
            }),
        }
    }

    /// Inbound fragment: applied once a remote description exists, buffered before.
    ///
    /// A malformed fragment is reported and dropped without affecting the session.
    pub fn receive_candidate(&mut self, candidate: IceCandidate, fx: &mut Vec<Effect>) {
        self.touch();

        if self.state.is_terminal() {
            debug!(session = %self.id, "Ignoring candidate for finished session");
            return;
        }

        if let Err(e) = candidate.validate() {
            warn!(session = %self.id, remote = %self.remote, "Rejected candidate: {}", e);
            fx.push(Effect::Notify(SessionNotice::CandidateRejected {
                remote: self.remote.clone(),
                reason: e.to_string(),
            }));
            return;
        }

        if self.remote_description.is_some() {
            self.apply_candidate(candidate, fx);
        } else {
            self.pending.enqueue(candidate);
            debug!(
                session = %self.id,
                state = %self.state,
                buffered = self.pending.len(),
                "Buffered candidate until remote description"
            );
        }
    }

    /// Completion of a media operation issued under the current ticket.
    pub fn complete(
        &mut self,
        local: &Participant,
        outcome: Outcome,
        fx: &mut Vec<Effect>,
    ) -> Result<()> {
        self.touch();

        match outcome {
            Outcome::MediaAcquired => {
                debug!(session = %self.id, "Local media acquired");
            },
            Outcome::OfferCreated(created) => {
                if self.state != NegotiationState::Offering {
                    debug!(session = %self.id, state = %self.state, "Discarding late local offer");
                    return Ok(());
                }
                created.description.validate(SdpType::Offer)?;
                self.commit_local(local, created, fx);
                self.transition(NegotiationState::AwaitingRemote, fx);
            },
            Outcome::AnswerCreated(created) => {
                if self.state != NegotiationState::Negotiating || self.role != Role::Responder {
                    debug!(session = %self.id, state = %self.state, "Discarding late local answer");
                    return Ok(());
                }
                created.description.validate(SdpType::Answer)?;
                self.commit_local(local, created, fx);
                self.transition(NegotiationState::Established, fx);
            },
            Outcome::RemoteDescriptionApplied => {
                debug!(session = %self.id, "Remote description applied");
            },
            Outcome::CandidateApplied(candidate) => {
                debug!(session = %self.id, candidate = %candidate.candidate, "Candidate applied");
            },
            Outcome::CandidateFailed { candidate, reason } => {
                warn!(
                    session = %self.id,
                    candidate = %candidate.candidate,
                    "Candidate failed to apply: {}",
                    reason
                );
                fx.push(Effect::Notify(SessionNotice::CandidateRejected {
                    remote: self.remote.clone(),
                    reason,
                }));
            },
            Outcome::Failed { stage, reason } => {
                return Err(match stage {
                    FailureStage::Media => CallError::MediaAcquisition(reason),
                    FailureStage::LocalDescription | FailureStage::RemoteDescription => {
                        CallError::Backend(reason)
                    },
                });
            },
        }
        Ok(())
    }

    /// Hang up: `any -> Ended`. Sends `end_call` only for a local hangup.
    pub fn end(&mut self, local: &Participant, notify_remote: bool, fx: &mut Vec<Effect>) {
        if self.state.is_terminal() {
            return;
        }

        let rejected = !notify_remote
            && self.role == Role::Initiator
            && self.state.has_local_offer();

        if notify_remote {
            fx.push(Effect::Send(RelayMessage::end_call(&self.remote, local)));
        }
        self.teardown(fx);
        self.transition(NegotiationState::Ended, fx);

        let notice = if rejected {
            SessionNotice::CallRejected {
                from: self.remote.clone(),
            }
        } else {
            SessionNotice::CallEnded {
                remote: self.remote.clone(),
                by_remote: !notify_remote,
            }
        };
        fx.push(Effect::Notify(notice));
    }

    /// Structural error: `any -> Failed`. The remote is not notified.
    pub fn fail(&mut self, error: &CallError, fx: &mut Vec<Effect>) {
        if self.state.is_terminal() {
            return;
        }

        warn!(
            session = %self.id,
            remote = %self.remote,
            state = %self.state,
            "Negotiation failed: {}",
            error
        );
        self.teardown(fx);
        self.transition(NegotiationState::Failed, fx);
        fx.push(Effect::Notify(SessionNotice::CallFailed {
            remote: self.remote.clone(),
            reason: error.to_string(),
        }));
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            remote: self.remote.clone(),
            role: self.role,
            state: self.state,
            attempt: self.attempt,
            buffered_fragments: self.pending.len(),
            applied_fragments: self.applied_fragments,
            uptime_secs: self.created_at.elapsed().as_secs(),
            idle_secs: self.last_activity.elapsed().as_secs(),
        }
    }

    fn commit_local(&mut self, local: &Participant, created: LocalDescription, fx: &mut Vec<Effect>) {
        let LocalDescription {
            description,
            candidates,
        } = created;

        self.local_description = Some(description.clone());
        let message = match description.sdp_type {
            SdpType::Offer => RelayMessage::offer(&self.remote, local, description),
            SdpType::Answer => RelayMessage::answer(&self.remote, local, description),
        };
        fx.push(Effect::Send(message));

        for candidate in candidates {
            fx.push(Effect::Send(RelayMessage::candidate(
                &self.remote,
                local,
                candidate,
            )));
        }
    }

    fn flush_pending(&mut self, fx: &mut Vec<Effect>) {
        let drained = self.pending.drain();
        if !drained.is_empty() {
            debug!(session = %self.id, count = drained.len(), "Replaying buffered candidates");
        }
        for candidate in drained {
            self.apply_candidate(candidate, fx);
        }
    }

    fn apply_candidate(&mut self, candidate: IceCandidate, fx: &mut Vec<Effect>) {
        self.applied_fragments += 1;
        self.media(fx, MediaOp::ApplyCandidate(candidate));
    }

    fn request_media(&mut self, fx: &mut Vec<Effect>) {
        if !self.media_requested {
            self.media_requested = true;
            self.media(fx, MediaOp::AcquireMedia);
        }
    }

    fn teardown(&mut self, fx: &mut Vec<Effect>) {
        if self.media_requested {
            self.media_requested = false;
            self.media(fx, MediaOp::ReleaseMedia);
        }

        let dropped = self.pending.clear() + self.early.clear();
        if dropped > 0 {
            debug!(session = %self.id, dropped, "Discarded buffered candidates");
        }
        self.local_description = None;
        self.remote_description = None;
    }

    fn media(&self, fx: &mut Vec<Effect>, op: MediaOp) {
        fx.push(Effect::Media {
            ticket: self.ticket(),
            op,
        });
    }

    fn transition(&mut self, to: NegotiationState, fx: &mut Vec<Effect>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(
            session = %self.id,
            remote = %self.remote,
            role = %self.role,
            "{} -> {}",
            from,
            to
        );
        fx.push(Effect::StateChanged {
            remote: self.remote.clone(),
            from,
            to,
        });
    }

    /// Update last activity timestamp
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session ID
    pub session_id: String,
    /// Remote participant
    pub remote: Participant,
    /// Current role
    pub role: Role,
    /// Current state
    pub state: NegotiationState,
    /// Negotiation attempt
    pub attempt: u32,
    /// Fragments still buffered
    pub buffered_fragments: usize,
    /// Fragments handed to the backend
    pub applied_fragments: u64,
    /// Seconds since creation
    pub uptime_secs: u64,
    /// Seconds since the last event
    pub idle_secs: u64,
}
