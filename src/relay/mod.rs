//! In-process relay.
//!
//! Stands in for the socket.io relay the browser client talks to: it
//! registers display names, broadcasts `online_users` whenever the roster
//! changes, stamps `from` on addressed messages and delivers them to the
//! recipient's mailbox.
//!
//! ```text
//!  RelayPort (alice) ──┐                      ┌──> mailbox (alice)
//!                      ├──> [router task] ────┤
//!  RelayPort (bob) ────┘   stamp + route      └──> mailbox (bob)
//! ```
//!
//! Delivery order between two participants is whatever the router task sees;
//! the negotiation engine does not rely on it.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::protocol::{Participant, RelayMessage};

/// Outbound half of a relay connection
pub trait RelayLink: Send + Sync {
    /// Hand a message to the relay
    fn send(&self, message: RelayMessage) -> Result<()>;
}

/// Inbound half of a relay connection
pub type RelayInbox = mpsc::UnboundedReceiver<RelayMessage>;

enum RouterCommand {
    Connect {
        name: Participant,
        mailbox: mpsc::UnboundedSender<RelayMessage>,
        reply: oneshot::Sender<Result<()>>,
    },
    Deliver {
        from: Participant,
        message: RelayMessage,
    },
    Disconnect {
        name: Participant,
    },
    Online {
        reply: oneshot::Sender<Vec<Participant>>,
    },
}

/// Handle to a running relay
#[derive(Debug, Clone)]
pub struct LocalRelay {
    commands: mpsc::UnboundedSender<RouterCommand>,
}

impl std::fmt::Debug for RouterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterCommand::Connect { name, .. } => write!(f, "Connect({name})"),
            RouterCommand::Deliver { from, message } => {
                write!(f, "Deliver({from}, {})", message.event_name())
            },
            RouterCommand::Disconnect { name } => write!(f, "Disconnect({name})"),
            RouterCommand::Online { .. } => write!(f, "Online"),
        }
    }
}

impl LocalRelay {
    /// Start the router task
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Router::default().run(rx));
        (Self { commands: tx }, handle)
    }

    /// Register `name` (the `join` event). Fails with `NameTaken` if another
    /// connection already holds it.
    pub async fn connect(&self, name: Participant) -> Result<(RelayPort, RelayInbox)> {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (reply, response) = oneshot::channel();
        self.command(RouterCommand::Connect {
            name: name.clone(),
            mailbox,
            reply,
        })?;
        response
            .await
            .map_err(|_| CallError::ChannelClosed("relay"))??;

        let port = RelayPort {
            name,
            commands: self.commands.clone(),
        };
        Ok((port, inbox))
    }

    /// Currently registered participants
    pub async fn online(&self) -> Result<Vec<Participant>> {
        let (reply, response) = oneshot::channel();
        self.command(RouterCommand::Online { reply })?;
        response.await.map_err(|_| CallError::ChannelClosed("relay"))
    }

    fn command(&self, command: RouterCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CallError::ChannelClosed("relay"))
    }
}

/// A participant's connection to the relay. Dropping it disconnects.
#[derive(Debug)]
pub struct RelayPort {
    name: Participant,
    commands: mpsc::UnboundedSender<RouterCommand>,
}

impl RelayPort {
    /// Registered name
    pub fn name(&self) -> &Participant {
        &self.name
    }
}

impl RelayLink for RelayPort {
    fn send(&self, message: RelayMessage) -> Result<()> {
        self.commands
            .send(RouterCommand::Deliver {
                from: self.name.clone(),
                message,
            })
            .map_err(|_| CallError::ChannelClosed("relay"))
    }
}

impl Drop for RelayPort {
    fn drop(&mut self) {
        let _ = self.commands.send(RouterCommand::Disconnect {
            name: self.name.clone(),
        });
    }
}

#[derive(Default)]
struct Router {
    mailboxes: BTreeMap<Participant, mpsc::UnboundedSender<RelayMessage>>,
}

impl Router {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RouterCommand>) {
        info!("Relay started");
        while let Some(command) = commands.recv().await {
            match command {
                RouterCommand::Connect {
                    name,
                    mailbox,
                    reply,
                } => {
                    let result = self.connect(name, mailbox);
                    let _ = reply.send(result);
                },
                RouterCommand::Deliver { from, message } => self.deliver(from, message),
                RouterCommand::Disconnect { name } => self.disconnect(&name),
                RouterCommand::Online { reply } => {
                    let _ = reply.send(self.online());
                },
            }
        }
        info!("Relay stopped");
    }

    fn connect(
        &mut self,
        name: Participant,
        mailbox: mpsc::UnboundedSender<RelayMessage>,
    ) -> Result<()> {
        if self.mailboxes.contains_key(&name) {
            warn!(name = %name, "Rejected join: name taken");
            return Err(CallError::NameTaken(name));
        }
        info!(name = %name, "Participant joined");
        self.mailboxes.insert(name, mailbox);
        self.broadcast_roster();
        Ok(())
    }

    fn deliver(&mut self, from: Participant, message: RelayMessage) {
        if !self.mailboxes.contains_key(&from) {
            debug!(from = %from, "Dropping message from disconnected participant");
            return;
        }

        match &message {
            RelayMessage::UserDisconnect => {
                self.disconnect(&from);
                return;
            },
            RelayMessage::Join(_) => {
                debug!(from = %from, "Ignoring repeated join");
                return;
            },
            RelayMessage::OnlineUsers(_) => {
                warn!(from = %from, "Clients may not publish the roster");
                return;
            },
            _ => {},
        }

        let Some(to) = message.recipient().cloned() else {
            return;
        };
        let event = message.event_name();
        let message = message.stamp_sender(&from);

        let delivered = match self.mailboxes.get(&to) {
            Some(mailbox) => mailbox.send(message).is_ok(),
            None => {
                warn!(from = %from, to = %to, event, "Recipient not online");
                return;
            },
        };

        if delivered {
            debug!(from = %from, to = %to, event, "Relayed");
        } else {
            self.disconnect(&to);
        }
    }

    fn disconnect(&mut self, name: &Participant) {
        if self.mailboxes.remove(name).is_some() {
            info!(name = %name, "Participant left");
            self.broadcast_roster();
        }
    }

    fn online(&self) -> Vec<Participant> {
        self.mailboxes.keys().cloned().collect()
    }

    fn broadcast_roster(&mut self) {
        let roster = self.online();
        let mut gone = Vec::new();
        for (name, mailbox) in &self.mailboxes {
            if mailbox.send(RelayMessage::OnlineUsers(roster.clone())).is_err() {
                gone.push(name.clone());
            }
        }
        for name in gone {
            self.disconnect(&name);
        }
    }
}
