//! # Peercall - Order-Independent Call Negotiation
//!
//! Negotiation engine for two participants who pair up for an audio/video
//! session through a relay that guarantees neither ordering nor uniqueness of
//! the signaling messages it carries.
//!
//! ## Features
//!
//! - **Order independence**: transport fragments that arrive before the remote
//!   description are buffered and replayed in arrival order
//! - **Glare resolution**: simultaneous offers are resolved by a deterministic
//!   tie-break both sides compute identically
//! - **Single-session lifecycle**: start, hangup, remote hangup, busy and
//!   roster departure handled in one place
//! - **Sans-IO core**: every transition returns effects; a tokio agent
//!   dispatches them to the relay and to a pluggable media backend
//!
//! ## Architecture
//!
//! ```text
//!  Participant A                       Relay                        Participant B
//!       |                                |                                |
//!       |-- signal{offer} -------------->|-- signal{offer} -------------->|
//!       |-- signal{candidate}* --------->|-- (any order) ---------------->|
//!       |<-------------- signal{answer} -|<-------------- signal{answer} -|
//!       |<----------- signal{candidate}*-|<----------- signal{candidate}*-|
//!       |                                |                                |
//!       |-- end_call ------------------->|-- end_call ------------------->|
//! ```
//!
//! ## Layers
//!
//! | Module          | Purpose                                                  |
//! |-----------------|----------------------------------------------------------|
//! | [`protocol`]    | Relay message vocabulary and JSON wire format            |
//! | [`negotiation`] | Candidate buffer, glare rule, per-peer state machine     |
//! | [`lifecycle`]   | One-session-at-a-time bookkeeping                        |
//! | [`media`]       | Media backend seam and the loopback backend              |
//! | [`relay`]       | In-process relay with roster broadcast                   |
//! | [`agent`]       | tokio driver for one endpoint                            |
//! | [`config`]      | TOML/env configuration                                   |
//!
//! ## Quick Start
//!
//! ### Pure engine
//!
//! ```rust,ignore
//! use peercall::{Participant, SessionLifecycleManager, TieBreak};
//!
//! let mut alice = SessionLifecycleManager::new(Participant::new("alice")?, TieBreak::default());
//! alice.start_call(Some(Participant::new("bob")?))?;
//! for effect in alice.drain_effects() {
//!     // send relay messages, run media operations, ...
//! }
//! ```
//!
//! ### Agents over the in-process relay
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peercall::{CallAgent, Config, LocalRelay, LoopbackMedia, Participant};
//!
//! let (relay, _task) = LocalRelay::spawn();
//! let config = Config::default();
//! let bob = Participant::new("bob")?;
//! let media = Arc::new(LoopbackMedia::new("bob", config.media.clone()));
//! let (handle, mut events, _agent) = CallAgent::connect(&relay, bob, &config, media).await?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod negotiation;
pub mod protocol;
pub mod relay;

// Re-exports for convenience
pub use agent::{AgentEvent, AgentHandle, AgentSnapshot, CallAgent};
pub use config::Config;
pub use error::{CallError, Result};
pub use lifecycle::SessionLifecycleManager;
pub use media::{LoopbackMedia, MediaBackend};
pub use negotiation::{
    CandidateBuffer, Effect, MediaOp, NegotiationState, Outcome, Role, Session, SessionNotice,
    TieBreak, Ticket,
};
pub use protocol::{IceCandidate, Participant, RelayMessage, SessionDescription, SignalPayload};
pub use relay::{LocalRelay, RelayLink, RelayPort};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
