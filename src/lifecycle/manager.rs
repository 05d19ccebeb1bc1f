//! Session lifecycle management.
//!
//! Holds the one optional [`Session`] of the local endpoint and routes every
//! input to it: local actions, relay messages, roster updates and media
//! completions. Effects accumulate in an outbox that the caller drains after
//! each input.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::negotiation::{
    Effect, NegotiationState, Outcome, Session, SessionNotice, TieBreak, Ticket,
};
use crate::protocol::{
    Addressed, ChatMessage, EndCall, FileMessage, Participant, RelayMessage, SignalEnvelope,
    SignalPayload,
};

/// Owner of the local endpoint's session
#[derive(Debug)]
pub struct SessionLifecycleManager {
    /// Local participant
    local: Participant,
    /// Glare rule shared with every peer
    tie_break: TieBreak,
    /// Remote picked for the next call
    selected: Option<Participant>,
    /// Registered participants, excluding the local one
    roster: Vec<Participant>,
    /// Whether the relay has sent a roster yet
    roster_seen: bool,
    /// At most one session
    session: Option<Session>,
    /// Terminal state of the last destroyed session
    last_terminal: Option<NegotiationState>,
    /// Effects not yet handed to the caller
    outbox: VecDeque<Effect>,
}

impl SessionLifecycleManager {
    /// Create manager for a local participant
    pub fn new(local: Participant, tie_break: TieBreak) -> Self {
        Self {
            local,
            tie_break,
            selected: None,
            roster: Vec::new(),
            roster_seen: false,
            session: None,
            last_terminal: None,
            outbox: VecDeque::new(),
        }
    }

    /// Local participant
    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Glare rule in use
    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Participant selected for the next call
    pub fn selected(&self) -> Option<&Participant> {
        self.selected.as_ref()
    }

    /// Last roster, excluding the local participant
    pub fn roster(&self) -> &[Participant] {
        &self.roster
    }

    /// Current session
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// State of the current session, or how the last one finished.
    /// Buffered candidates alone do not make a call.
    pub fn state(&self) -> NegotiationState {
        match &self.session {
            Some(session) if !session.is_pending_stub() => session.state(),
            _ => self.last_terminal.unwrap_or(NegotiationState::Idle),
        }
    }

    /// Ticket of the current session
    pub fn current_ticket(&self) -> Option<Ticket> {
        self.session.as_ref().map(Session::ticket)
    }

    /// Whether a completion still belongs to the live negotiation attempt
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.id() == ticket.session && s.attempt() == ticket.attempt)
    }

    /// Take every pending effect in emission order
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.outbox.drain(..).collect()
    }

    /// Registration message for the relay
    pub fn join_message(&self) -> RelayMessage {
        RelayMessage::Join(self.local.clone())
    }

    /// Record the remote for a future call. Does not touch the current session.
    pub fn select_remote(&mut self, participant: Participant) -> Result<()> {
        if participant == self.local {
            return Err(CallError::InvalidParticipant(format!(
                "cannot select yourself ({participant})"
            )));
        }
        self.require_online(&participant)?;
        debug!(remote = %participant, "Selected remote participant");
        self.selected = Some(participant);
        Ok(())
    }

    /// Start a call to `target`, or to the selected participant.
    pub fn start_call(&mut self, target: Option<Participant>) -> Result<()> {
        let target = target
            .or_else(|| self.selected.clone())
            .ok_or(CallError::NoRemoteSelected)?;
        if target == self.local {
            return Err(CallError::InvalidParticipant(format!(
                "cannot call yourself ({target})"
            )));
        }
        self.require_online(&target)?;

        let mut session = match self.session.take() {
            None => Session::new(target.clone()),
            // nothing answers an offer we have not sent yet; the fragments
            // belong to an earlier call or to the remote's own offer
            Some(mut existing) if existing.is_pending_stub() && existing.remote() == &target => {
                let mut session = Session::new(target.clone());
                session.hold_early_fragments(existing.take_pending());
                session
            },
            Some(existing) if existing.is_pending_stub() => {
                info!(
                    stale = %existing.remote(),
                    dropped = existing.pending_fragments().len(),
                    "Discarding unsolicited candidates"
                );
                Session::new(target.clone())
            },
            Some(existing) => {
                let remote = existing.remote().clone();
                self.session = Some(existing);
                return Err(CallError::AlreadyInSession { remote });
            },
        };

        info!(remote = %target, "Starting call");
        self.selected = Some(target);

        let mut fx = Vec::new();
        session.start_call(&mut fx)?;
        self.session = Some(session);
        self.outbox.extend(fx);
        Ok(())
    }

    /// Local hangup. No-op without a session; idempotent.
    pub fn end_call(&mut self) {
        let Some(mut session) = self.session.take() else {
            debug!("end_call without a session");
            return;
        };

        if session.is_pending_stub() {
            debug!(remote = %session.remote(), "Dropping buffered session on hangup");
            self.last_terminal = Some(NegotiationState::Ended);
            return;
        }

        info!(remote = %session.remote(), "Ending call");
        let mut fx = Vec::new();
        session.end(&self.local, true, &mut fx);
        self.finish(session, fx);
    }

    /// Remote hangup. A mismatched participant is ignored; a missing sender
    /// (legacy relays) applies to the current session.
    pub fn on_remote_end_call(&mut self, from: Option<&Participant>) {
        let matches = match (&self.session, from) {
            (Some(session), Some(from)) => session.remote() == from,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            debug!(from = ?from, "Ignoring end_call for another session");
            return;
        }

        if self.session.as_ref().is_some_and(Session::is_pending_stub) {
            if let Some(stub) = self.session.take() {
                debug!(
                    remote = %stub.remote(),
                    dropped = stub.pending_fragments().len(),
                    "Dropping buffered session, no call was in progress"
                );
            }
            return;
        }

        if let Some(mut session) = self.session.take() {
            info!(remote = %session.remote(), "Remote ended call");
            let mut fx = Vec::new();
            session.end(&self.local, false, &mut fx);
            self.finish(session, fx);
        }
    }

    /// Roster update. A session whose remote left is ended as if it hung up.
    pub fn on_roster_change(&mut self, participants: Vec<Participant>) {
        self.roster = participants
            .into_iter()
            .filter(|p| p != &self.local)
            .collect();
        self.roster_seen = true;

        if let Some(selected) = &self.selected {
            if !self.roster.contains(selected) {
                debug!(remote = %selected, "Selected participant went offline");
                self.selected = None;
            }
        }

        let departed = self
            .session
            .as_ref()
            .filter(|s| !self.roster.contains(s.remote()))
            .map(|s| s.remote().clone());
        if let Some(remote) = departed {
            info!(remote = %remote, "Remote participant left the roster");
            self.on_remote_end_call(Some(&remote));
        }

        self.outbox.push_back(Effect::Roster(self.roster.clone()));
    }

    /// Inbound relay message. Core kinds are consumed, the rest forwarded.
    pub fn handle_relay_message(&mut self, message: RelayMessage) -> Result<()> {
        match message {
            RelayMessage::Signal(envelope) => self.handle_signal(envelope),
            RelayMessage::EndCall(EndCall { from, .. }) => {
                self.on_remote_end_call(from.as_ref());
                Ok(())
            },
            RelayMessage::OnlineUsers(users) => {
                self.on_roster_change(users);
                Ok(())
            },
            other => {
                debug!(event = other.event_name(), "Forwarding relay message");
                self.outbox.push_back(Effect::Forward(other));
                Ok(())
            },
        }
    }

    /// Inbound `signal`.
    pub fn handle_signal(&mut self, envelope: SignalEnvelope) -> Result<()> {
        let SignalEnvelope { to, from, signal } = envelope;
        let from = from.ok_or_else(|| {
            CallError::MalformedPayload("signal without a sender".to_string())
        })?;
        if to != self.local {
            warn!(to = %to, "Ignoring signal addressed to someone else");
            return Ok(());
        }
        if from == self.local {
            return Err(CallError::InvalidParticipant(
                "signal from ourselves".to_string(),
            ));
        }

        let kind = signal.kind();
        debug!(from = %from, kind = %kind, state = %self.state(), "Signal received");

        let foreign = self.session.as_ref().filter(|s| s.remote() != &from);
        if let Some(session) = foreign {
            let is_offer = matches!(signal, SignalPayload::Offer { .. });
            if !(session.is_pending_stub() && is_offer) {
                return self.handle_foreign_signal(from, signal);
            }
            info!(
                stale = %session.remote(),
                caller = %from,
                "Discarding unsolicited candidates for incoming call"
            );
            self.session = None;
        }

        match signal {
            SignalPayload::Offer { offer } => {
                let local = self.local.clone();
                let tie_break = self.tie_break;
                let session = self
                    .session
                    .get_or_insert_with(|| Session::new(from.clone()));
                let mut fx = Vec::new();
                let result = session.receive_offer(&local, offer, tie_break, &mut fx);
                self.settle(fx, result)
            },
            SignalPayload::Answer { answer } => {
                let Some(session) = self.session.as_mut() else {
                    warn!(from = %from, "Answer without an outstanding offer");
                    return Err(CallError::InvalidStateTransition {
                        state: NegotiationState::Idle,
                        event: "answer",
                    });
                };
                let mut fx = Vec::new();
                let result = session.receive_answer(answer, &mut fx);
                self.settle(fx, result)
            },
            SignalPayload::Candidate { candidate } => {
                let session = self
                    .session
                    .get_or_insert_with(|| Session::new(from.clone()));
                let mut fx = Vec::new();
                session.receive_candidate(candidate, &mut fx);
                self.outbox.extend(fx);
                Ok(())
            },
        }
    }

    fn handle_foreign_signal(&mut self, from: Participant, signal: SignalPayload) -> Result<()> {
        match signal {
            SignalPayload::Offer { .. } => {
                info!(from = %from, "Busy: rejecting offer");
                self.outbox
                    .push_back(Effect::Send(RelayMessage::end_call(&from, &self.local)));
                self.outbox
                    .push_back(Effect::Notify(SessionNotice::Busy { from }));
                Ok(())
            },
            SignalPayload::Answer { .. } => {
                warn!(from = %from, "Answer from a participant we did not call");
                Err(CallError::InvalidStateTransition {
                    state: NegotiationState::Idle,
                    event: "answer",
                })
            },
            SignalPayload::Candidate { .. } => {
                debug!(from = %from, "Dropping candidate for another session");
                Ok(())
            },
        }
    }

    /// Media operation finished. Stale tickets are ignored.
    pub fn handle_completion(&mut self, ticket: &Ticket, outcome: Outcome) -> Result<()> {
        let live = if outcome.is_session_scoped() {
            self.session.as_ref().is_some_and(|s| s.id() == ticket.session)
        } else {
            self.is_current(ticket)
        };
        if !live {
            debug!(ticket = %ticket, "Ignoring completion for a stale attempt");
            return Ok(());
        }

        let local = self.local.clone();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let mut fx = Vec::new();
        let result = session.complete(&local, outcome, &mut fx);
        self.settle(fx, result)
    }

    /// Send chat text to the session's remote.
    pub fn send_chat(&mut self, to: Participant, message: String) -> Result<()> {
        self.require_active(&to)?;
        self.outbox
            .push_back(Effect::Send(RelayMessage::ChatMessage(ChatMessage {
                to,
                from: Some(self.local.clone()),
                message,
            })));
        Ok(())
    }

    /// Send a typing indicator.
    pub fn send_typing(&mut self, to: Participant) -> Result<()> {
        self.require_active(&to)?;
        let body = self.addressed(to);
        self.outbox
            .push_back(Effect::Send(RelayMessage::Typing(body)));
        Ok(())
    }

    /// Send a read receipt.
    pub fn send_seen(&mut self, to: Participant) -> Result<()> {
        self.require_active(&to)?;
        let body = self.addressed(to);
        self.outbox
            .push_back(Effect::Send(RelayMessage::MessageSeen(body)));
        Ok(())
    }

    /// Send a file as a data URL.
    pub fn send_file(
        &mut self,
        to: Participant,
        file_name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<()> {
        self.require_active(&to)?;
        let mut file = FileMessage::from_bytes(to, file_name, mime, bytes);
        file.from = Some(self.local.clone());
        self.outbox
            .push_back(Effect::Send(RelayMessage::FileMessage(file)));
        Ok(())
    }

    /// Leave the relay, hanging up first.
    pub fn leave(&mut self) {
        self.end_call();
        self.selected = None;
        self.outbox
            .push_back(Effect::Send(RelayMessage::UserDisconnect));
    }

    fn addressed(&self, to: Participant) -> Addressed {
        Addressed {
            to,
            from: Some(self.local.clone()),
        }
    }

    /// Unknown participants are only detectable once a roster arrived.
    fn require_online(&self, participant: &Participant) -> Result<()> {
        if self.roster_seen && !self.roster.contains(participant) {
            return Err(CallError::UnknownParticipant(participant.clone()));
        }
        Ok(())
    }

    fn require_active(&self, to: &Participant) -> Result<()> {
        match &self.session {
            Some(session) if session.remote() == to && !session.is_pending_stub() => Ok(()),
            _ => Err(CallError::NoActiveSession(to.clone())),
        }
    }

    /// Queue transition effects; a fatal error destroys the session.
    fn settle(&mut self, fx: Vec<Effect>, result: Result<()>) -> Result<()> {
        self.outbox.extend(fx);

        match result {
            Err(error) if error.is_fatal() => {
                if let Some(mut session) = self.session.take() {
                    let mut fx = Vec::new();
                    session.fail(&error, &mut fx);
                    self.finish(session, fx);
                }
                Err(error)
            },
            other => other,
        }
    }

    fn finish(&mut self, session: Session, fx: Vec<Effect>) {
        self.last_terminal = Some(session.state());
        self.outbox.extend(fx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::{LocalDescription, MediaOp};
    use crate::protocol::{IceCandidate, SessionDescription};

    fn p(name: &str) -> Participant {
        Participant::new(name).unwrap()
    }

    fn offer_from(from: &str, to: &str, sdp: &str) -> RelayMessage {
        RelayMessage::offer(&p(to), &p(from), SessionDescription::offer(sdp))
    }

    fn media_tickets(fx: &[Effect]) -> Vec<(Ticket, MediaOp)> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Media { ticket, op } => Some((ticket.clone(), op.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_call_requires_target() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        assert!(matches!(
            manager.start_call(None),
            Err(CallError::NoRemoteSelected)
        ));
        assert!(matches!(
            manager.start_call(Some(p("alice"))),
            Err(CallError::InvalidParticipant(_))
        ));

        manager.select_remote(p("bob")).unwrap();
        manager.start_call(None).unwrap();
        assert_eq!(manager.state(), NegotiationState::Offering);
        assert_eq!(manager.session().unwrap().remote(), &p("bob"));
    }

    #[test]
    fn test_offline_participant_unknown() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.on_roster_change(vec![p("alice"), p("bob")]);
        assert!(matches!(
            manager.start_call(Some(p("zed"))),
            Err(CallError::UnknownParticipant(_))
        ));
        assert!(manager.select_remote(p("zed")).is_err());
        assert!(manager.start_call(Some(p("bob"))).is_ok());
    }

    #[test]
    fn test_select_remote_leaves_session_alone() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        manager.drain_effects();

        manager.select_remote(p("carol")).unwrap();
        assert_eq!(manager.session().unwrap().remote(), &p("bob"));
        assert!(manager.drain_effects().is_empty());
    }

    #[test]
    fn test_already_in_session() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        let id = manager.session().unwrap().id().to_string();
        manager.drain_effects();

        let err = manager.start_call(Some(p("carol"))).unwrap_err();
        assert!(matches!(err, CallError::AlreadyInSession { ref remote } if remote == &p("bob")));
        assert_eq!(manager.session().unwrap().id(), id);
        assert_eq!(manager.state(), NegotiationState::Offering);
        assert!(manager.drain_effects().is_empty());
    }

    #[test]
    fn test_stub_for_other_participant_is_replaced() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager
            .handle_relay_message(RelayMessage::candidate(
                &p("alice"),
                &p("mallory"),
                IceCandidate::new("candidate:1"),
            ))
            .unwrap();
        assert!(manager.session().unwrap().is_pending_stub());

        manager.start_call(Some(p("bob"))).unwrap();
        assert_eq!(manager.session().unwrap().remote(), &p("bob"));
        assert!(manager.session().unwrap().pending_fragments().is_empty());
    }

    #[test]
    fn test_late_candidate_not_carried_into_next_call() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        let answer_from_bob = |sdp: &str| {
            RelayMessage::answer(&p("alice"), &p("bob"), SessionDescription::answer(sdp))
        };
        let offer_created = || {
            Outcome::OfferCreated(LocalDescription::new(SessionDescription::offer("v=0 alice")))
        };

        manager.start_call(Some(p("bob"))).unwrap();
        let ticket = manager.current_ticket().unwrap();
        manager.handle_completion(&ticket, offer_created()).unwrap();
        manager.handle_relay_message(answer_from_bob("v=0 bob")).unwrap();
        assert_eq!(manager.state(), NegotiationState::Established);

        // the relay delivers a candidate of the finished call after its end_call
        manager
            .handle_relay_message(RelayMessage::end_call(&p("alice"), &p("bob")))
            .unwrap();
        manager
            .handle_relay_message(RelayMessage::candidate(
                &p("alice"),
                &p("bob"),
                IceCandidate::new("candidate:OLD-CALL"),
            ))
            .unwrap();
        assert_eq!(manager.state(), NegotiationState::Ended);
        manager.drain_effects();

        manager.start_call(Some(p("bob"))).unwrap();
        let ticket = manager.current_ticket().unwrap();
        manager.handle_completion(&ticket, offer_created()).unwrap();
        manager.handle_relay_message(answer_from_bob("v=0 bob again")).unwrap();
        assert_eq!(manager.state(), NegotiationState::Established);

        let fx = manager.drain_effects();
        assert!(!media_tickets(&fx)
            .iter()
            .any(|(_, op)| matches!(op, MediaOp::ApplyCandidate(_))));
    }

    #[test]
    fn test_buffered_candidates_leaving_roster_is_silent() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.on_roster_change(vec![p("alice"), p("bob")]);
        manager
            .handle_relay_message(RelayMessage::candidate(
                &p("alice"),
                &p("bob"),
                IceCandidate::new("candidate:1"),
            ))
            .unwrap();
        assert_eq!(manager.state(), NegotiationState::Idle);
        manager.drain_effects();

        manager.on_roster_change(vec![p("alice")]);
        assert!(manager.session().is_none());
        assert_eq!(manager.state(), NegotiationState::Idle);
        assert_eq!(manager.drain_effects(), vec![Effect::Roster(vec![])]);

        // a hangup from a remote we only hold candidates for is silent too
        manager
            .handle_relay_message(RelayMessage::candidate(
                &p("alice"),
                &p("carol"),
                IceCandidate::new("candidate:2"),
            ))
            .unwrap();
        manager
            .handle_relay_message(RelayMessage::end_call(&p("alice"), &p("carol")))
            .unwrap();
        assert!(manager.session().is_none());
        assert!(manager.drain_effects().is_empty());
    }

    #[test]
    fn test_end_call_idempotent() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        manager.drain_effects();

        manager.end_call();
        assert_eq!(manager.state(), NegotiationState::Ended);
        let fx = manager.drain_effects();
        assert!(fx
            .iter()
            .any(|e| matches!(e, Effect::Send(RelayMessage::EndCall(_)))));

        manager.end_call();
        assert_eq!(manager.state(), NegotiationState::Ended);
        assert!(manager.drain_effects().is_empty());
    }

    #[test]
    fn test_remote_end_call_mismatch_ignored() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        manager.drain_effects();

        manager
            .handle_relay_message(RelayMessage::end_call(&p("alice"), &p("carol")))
            .unwrap();
        assert_eq!(manager.state(), NegotiationState::Offering);

        manager
            .handle_relay_message(RelayMessage::end_call(&p("alice"), &p("bob")))
            .unwrap();
        assert_eq!(manager.state(), NegotiationState::Ended);
        let fx = manager.drain_effects();
        assert!(!fx.iter().any(|e| matches!(e, Effect::Send(_))));
    }

    #[test]
    fn test_busy_offer_rejected() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        manager.drain_effects();

        manager
            .handle_relay_message(offer_from("carol", "alice", "v=0"))
            .unwrap();
        let fx = manager.drain_effects();
        assert!(fx.contains(&Effect::Send(RelayMessage::end_call(&p("carol"), &p("alice")))));
        assert!(fx.contains(&Effect::Notify(SessionNotice::Busy { from: p("carol") })));
        assert_eq!(manager.session().unwrap().remote(), &p("bob"));
    }

    #[test]
    fn test_answer_without_offer_fails_stub() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        let err = manager
            .handle_relay_message(RelayMessage::answer(
                &p("alice"),
                &p("bob"),
                SessionDescription::answer("v=0"),
            ))
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidStateTransition { .. }));
        assert!(manager.session().is_none());

        // stub created by an early candidate is failed by a stray answer
        manager
            .handle_relay_message(RelayMessage::candidate(
                &p("alice"),
                &p("bob"),
                IceCandidate::new("candidate:1"),
            ))
            .unwrap();
        assert!(manager
            .handle_relay_message(RelayMessage::answer(
                &p("alice"),
                &p("bob"),
                SessionDescription::answer("v=0"),
            ))
            .is_err());
        assert!(manager.session().is_none());
        assert_eq!(manager.state(), NegotiationState::Failed);
    }

    #[test]
    fn test_roster_removal_ends_session() {
        let mut manager = SessionLifecycleManager::new(p("bob"), TieBreak::default());
        manager.on_roster_change(vec![p("alice"), p("bob")]);
        assert_eq!(manager.roster(), &[p("alice")]);

        manager
            .handle_relay_message(offer_from("alice", "bob", "v=0"))
            .unwrap();
        let ticket = manager.current_ticket().unwrap();
        manager
            .handle_completion(
                &ticket,
                Outcome::AnswerCreated(LocalDescription::new(SessionDescription::answer("v=0"))),
            )
            .unwrap();
        assert_eq!(manager.state(), NegotiationState::Established);
        manager.drain_effects();

        manager
            .handle_relay_message(RelayMessage::OnlineUsers(vec![p("bob")]))
            .unwrap();
        assert_eq!(manager.state(), NegotiationState::Ended);
        let fx = manager.drain_effects();
        assert!(fx.contains(&Effect::Notify(SessionNotice::CallEnded {
            remote: p("alice"),
            by_remote: true,
        })));
        assert!(fx.contains(&Effect::Roster(vec![])));
    }

    #[test]
    fn test_stale_completion_after_end() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        let ticket = manager.current_ticket().unwrap();
        manager.end_call();
        manager.drain_effects();

        manager
            .handle_completion(
                &ticket,
                Outcome::OfferCreated(LocalDescription::new(SessionDescription::offer("v=0"))),
            )
            .unwrap();
        assert!(manager.drain_effects().is_empty());
        assert_eq!(manager.state(), NegotiationState::Ended);
    }

    #[test]
    fn test_media_failure_releases_media() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        let ticket = manager.current_ticket().unwrap();
        manager.drain_effects();

        let err = manager
            .handle_completion(
                &ticket,
                Outcome::Failed {
                    stage: crate::negotiation::FailureStage::Media,
                    reason: "camera denied".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CallError::MediaAcquisition(_)));
        assert_eq!(manager.state(), NegotiationState::Failed);

        let fx = manager.drain_effects();
        assert!(media_tickets(&fx)
            .iter()
            .any(|(_, op)| op == &MediaOp::ReleaseMedia));
        assert!(fx
            .iter()
            .any(|e| matches!(e, Effect::Notify(SessionNotice::CallFailed { .. }))));
    }

    #[test]
    fn test_chat_requires_active_session() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        assert!(matches!(
            manager.send_chat(p("bob"), "hi".to_string()),
            Err(CallError::NoActiveSession(_))
        ));

        manager.start_call(Some(p("bob"))).unwrap();
        manager.drain_effects();
        manager.send_chat(p("bob"), "hi".to_string()).unwrap();
        manager.send_typing(p("bob")).unwrap();
        manager.send_file(p("bob"), "a.txt", "text/plain", b"x").unwrap();
        assert!(manager.send_seen(p("carol")).is_err());
        assert_eq!(manager.drain_effects().len(), 3);
    }

    #[test]
    fn test_non_core_messages_forwarded() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        let typing = RelayMessage::Typing(Addressed {
            to: p("alice"),
            from: Some(p("bob")),
        });
        manager.handle_relay_message(typing.clone()).unwrap();
        assert_eq!(manager.drain_effects(), vec![Effect::Forward(typing)]);
    }

    #[test]
    fn test_leave_hangs_up_and_disconnects() {
        let mut manager = SessionLifecycleManager::new(p("alice"), TieBreak::default());
        manager.start_call(Some(p("bob"))).unwrap();
        manager.drain_effects();

        manager.leave();
        let fx = manager.drain_effects();
        assert_eq!(
            fx.last(),
            Some(&Effect::Send(RelayMessage::UserDisconnect))
        );
        assert_eq!(manager.state(), NegotiationState::Ended);
    }
}
