//! Call agent.
//!
//! Drives one [`SessionLifecycleManager`] on a tokio task. Local commands from
//! [`AgentHandle`]s, inbound relay messages and media completions are applied
//! one at a time; the resulting effects go to the relay, the media worker and
//! the application's event stream.
//!
//! ```text
//!   AgentHandle ──commands──┐
//!                           ├──> [agent loop] ──Send──────> RelayLink
//!   RelayInbox ──pump──┐    │         │ │
//!                      ├────┘         │ └──Media (FIFO)──> [media worker]
//!   media worker ──────┘ completions  │                          │
//!                                     └──AgentEvent──> application
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use peercall::{CallAgent, Config, LocalRelay, LoopbackMedia, Participant};
//!
//! let (relay, _task) = LocalRelay::spawn();
//! let config = Config::default();
//! let alice = Participant::new("alice")?;
//! let media = LoopbackMedia::new("alice", config.media.clone());
//! let (handle, mut events, _agent) =
//!     CallAgent::connect(&relay, alice, &config, Arc::new(media)).await?;
//!
//! handle.start_call(Some(Participant::new("bob")?)).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

mod worker;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CallError, Result};
use crate::lifecycle::SessionLifecycleManager;
use crate::media::MediaBackend;
use crate::negotiation::{Effect, NegotiationState, Outcome, SessionNotice, SessionStats, Ticket};
use crate::protocol::{Participant, RelayMessage};
use crate::relay::{LocalRelay, RelayInbox, RelayLink};

use worker::MediaJob;

/// Notification for the application
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Session state changed
    StateChanged {
        /// Remote participant
        remote: Participant,
        /// Previous state
        from: NegotiationState,
        /// New state
        to: NegotiationState,
    },
    /// Call-level notification
    Notice(SessionNotice),
    /// Non-core relay message (chat, typing, file, receipts)
    Forwarded(RelayMessage),
    /// Roster changed
    Roster(Vec<Participant>),
}

/// Point-in-time view of an agent
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    /// Local participant
    pub local: Participant,
    /// Current or last session state
    pub state: NegotiationState,
    /// Selected remote
    pub selected: Option<Participant>,
    /// Known roster
    pub roster: Vec<Participant>,
    /// Current session statistics
    pub session: Option<SessionStats>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum AgentCommand {
    SelectRemote(Participant, Reply<()>),
    StartCall(Option<Participant>, Reply<()>),
    EndCall(Reply<()>),
    SendChat {
        to: Participant,
        message: String,
        reply: Reply<()>,
    },
    SendTyping(Participant, Reply<()>),
    SendSeen(Participant, Reply<()>),
    SendFile {
        to: Participant,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
        reply: Reply<()>,
    },
    Snapshot(oneshot::Sender<AgentSnapshot>),
    Leave(Reply<()>),
}

pub(crate) enum AgentInput {
    Relay(RelayMessage),
    RelayClosed,
    Completion { ticket: Ticket, outcome: Outcome },
}

/// Cloneable handle to a running agent
#[derive(Clone)]
pub struct AgentHandle {
    local: Participant,
    commands: mpsc::Sender<AgentCommand>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl AgentHandle {
    /// Local participant
    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Pick the remote for the next call
    pub async fn select_remote(&self, participant: Participant) -> Result<()> {
        self.request(|reply| AgentCommand::SelectRemote(participant, reply))
            .await
    }

    /// Call `target`, or the selected participant
    pub async fn start_call(&self, target: Option<Participant>) -> Result<()> {
        self.request(|reply| AgentCommand::StartCall(target, reply))
            .await
    }

    /// Hang up
    pub async fn end_call(&self) -> Result<()> {
        self.request(AgentCommand::EndCall).await
    }

    /// Send chat text to the current remote
    pub async fn send_chat(&self, to: Participant, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.request(|reply| AgentCommand::SendChat { to, message, reply })
            .await
    }

    /// Send a typing indicator
    pub async fn send_typing(&self, to: Participant) -> Result<()> {
        self.request(|reply| AgentCommand::SendTyping(to, reply))
            .await
    }

    /// Send a read receipt
    pub async fn send_seen(&self, to: Participant) -> Result<()> {
        self.request(|reply| AgentCommand::SendSeen(to, reply)).await
    }

    /// Send a file
    pub async fn send_file(
        &self,
        to: Participant,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let file_name = file_name.into();
        let mime = mime.into();
        self.request(|reply| AgentCommand::SendFile {
            to,
            file_name,
            mime,
            bytes,
            reply,
        })
        .await
    }

    /// Current state
    pub async fn snapshot(&self) -> Result<AgentSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(AgentCommand::Snapshot(reply))
            .await
            .map_err(|_| CallError::ChannelClosed("agent"))?;
        response.await.map_err(|_| CallError::ChannelClosed("agent"))
    }

    /// Hang up, leave the relay and stop the agent
    pub async fn leave(&self) -> Result<()> {
        self.request(AgentCommand::Leave).await
    }

    async fn request<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(Reply<()>) -> AgentCommand,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CallError::ChannelClosed("agent"))?;
        response
            .await
            .map_err(|_| CallError::ChannelClosed("agent"))?
    }
}

/// Agent task state
pub struct CallAgent<L> {
    manager: SessionLifecycleManager,
    link: L,
    media: mpsc::UnboundedSender<MediaJob>,
    current: watch::Sender<Option<Ticket>>,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl CallAgent<crate::relay::RelayPort> {
    /// Register `local` with an in-process relay and spawn its agent.
    pub async fn connect(
        relay: &LocalRelay,
        local: Participant,
        config: &Config,
        backend: Arc<dyn MediaBackend>,
    ) -> Result<(
        AgentHandle,
        mpsc::UnboundedReceiver<AgentEvent>,
        JoinHandle<()>,
    )> {
        let (port, inbox) = relay.connect(local.clone()).await?;
        let manager = SessionLifecycleManager::new(local, config.negotiation.tie_break);
        Ok(CallAgent::spawn(
            manager,
            backend,
            port,
            inbox,
            config.relay.channel_capacity,
        ))
    }
}

impl<L: RelayLink + 'static> CallAgent<L> {
    /// Spawn the agent loop, the relay pump and the media worker.
    pub fn spawn(
        manager: SessionLifecycleManager,
        backend: Arc<dyn MediaBackend>,
        link: L,
        inbox: RelayInbox,
        capacity: usize,
    ) -> (
        AgentHandle,
        mpsc::UnboundedReceiver<AgentEvent>,
        JoinHandle<()>,
    ) {
        let capacity = capacity.max(1);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (current_tx, current_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handle = AgentHandle {
            local: manager.local().clone(),
            commands: command_tx,
        };

        let pump = tokio::spawn(pump_relay(inbox, input_tx.clone()));
        let worker = tokio::spawn(worker::run(backend, media_rx, current_rx, input_tx));

        let agent = CallAgent {
            manager,
            link,
            media: media_tx,
            current: current_tx,
            events: event_tx,
        };
        let task = tokio::spawn(async move {
            agent.run(command_rx, input_rx).await;
            pump.abort();
            if let Err(e) = worker.await {
                warn!("Media worker panicked: {}", e);
            }
        });

        (handle, event_rx, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<AgentCommand>,
        mut inputs: mpsc::Receiver<AgentInput>,
    ) {
        let local = self.manager.local().clone();
        info!(local = %local, rule = %self.manager.tie_break(), "Agent started");
        if let Err(e) = self.link.send(self.manager.join_message()) {
            warn!(local = %local, "Failed to send join: {}", e);
        }

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!(local = %local, "All handles dropped");
                        self.manager.leave();
                        self.dispatch();
                        break;
                    };
                    let keep_running = self.handle_command(command);
                    self.dispatch();
                    if !keep_running {
                        break;
                    }
                },
                input = inputs.recv() => {
                    let Some(input) = input else {
                        break;
                    };
                    let keep_running = self.handle_input(input);
                    self.dispatch();
                    if !keep_running {
                        break;
                    }
                },
            }
        }

        info!(local = %local, "Agent stopped");
    }

    fn handle_command(&mut self, command: AgentCommand) -> bool {
        match command {
            AgentCommand::SelectRemote(participant, reply) => {
                let _ = reply.send(self.manager.select_remote(participant));
            },
            AgentCommand::StartCall(target, reply) => {
                let _ = reply.send(self.manager.start_call(target));
            },
            AgentCommand::EndCall(reply) => {
                self.manager.end_call();
                let _ = reply.send(Ok(()));
            },
            AgentCommand::SendChat { to, message, reply } => {
                let _ = reply.send(self.manager.send_chat(to, message));
            },
            AgentCommand::SendTyping(to, reply) => {
                let _ = reply.send(self.manager.send_typing(to));
            },
            AgentCommand::SendSeen(to, reply) => {
                let _ = reply.send(self.manager.send_seen(to));
            },
            AgentCommand::SendFile {
                to,
                file_name,
                mime,
                bytes,
                reply,
            } => {
                let result = self.manager.send_file(to, &file_name, &mime, &bytes);
                let _ = reply.send(result);
            },
            AgentCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            },
            AgentCommand::Leave(reply) => {
                self.manager.leave();
                let _ = reply.send(Ok(()));
                return false;
            },
        }
        true
    }

    fn handle_input(&mut self, input: AgentInput) -> bool {
        match input {
            AgentInput::Relay(message) => {
                let event = message.event_name();
                if let Err(e) = self.manager.handle_relay_message(message) {
                    warn!(local = %self.manager.local(), event, "Rejected relay message: {}", e);
                }
            },
            AgentInput::Completion { ticket, outcome } => {
                if let Err(e) = self.manager.handle_completion(&ticket, outcome) {
                    warn!(local = %self.manager.local(), ticket = %ticket, "Media operation failed: {}", e);
                }
            },
            AgentInput::RelayClosed => {
                warn!(local = %self.manager.local(), "Relay connection closed");
                self.manager.on_roster_change(Vec::new());
                return false;
            },
        }
        true
    }

    /// Push every queued effect to its destination.
    fn dispatch(&mut self) {
        self.current.send_replace(self.manager.current_ticket());

        for effect in self.manager.drain_effects() {
            match effect {
                Effect::Send(message) => {
                    let event = message.event_name();
                    if let Err(e) = self.link.send(message) {
                        warn!(event, "Failed to send relay message: {}", e);
                    }
                },
                Effect::Media { ticket, op } => {
                    if self.media.send(MediaJob { ticket, op }).is_err() {
                        warn!("Media worker is gone");
                    }
                },
                Effect::StateChanged { remote, from, to } => {
                    self.emit(AgentEvent::StateChanged { remote, from, to });
                },
                Effect::Notify(notice) => self.emit(AgentEvent::Notice(notice)),
                Effect::Roster(roster) => self.emit(AgentEvent::Roster(roster)),
                Effect::Forward(message) => self.emit(AgentEvent::Forwarded(message)),
            }
        }
    }

    fn emit(&self, event: AgentEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            local: self.manager.local().clone(),
            state: self.manager.state(),
            selected: self.manager.selected().cloned(),
            roster: self.manager.roster().to_vec(),
            session: self.manager.session().map(|s| s.stats()),
        }
    }
}

async fn pump_relay(mut inbox: RelayInbox, inputs: mpsc::Sender<AgentInput>) {
    while let Some(message) = inbox.recv().await {
        if inputs.send(AgentInput::Relay(message)).await.is_err() {
            return;
        }
    }
    let _ = inputs.send(AgentInput::RelayClosed).await;
}
