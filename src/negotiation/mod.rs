//! Session negotiation engine.
//!
//! Turns an unordered, possibly duplicated stream of `offer` / `answer` /
//! `candidate` signals into exactly one established media session.
//!
//! ## State Machine
//!
//! | State            | Description                              | Valid Transitions                  |
//! |------------------|------------------------------------------|------------------------------------|
//! | `Idle`           | Fresh session or glare rollback          | → Offering, Negotiating            |
//! | `Offering`       | Local offer being created                | → AwaitingRemote, Idle (glare)     |
//! | `AwaitingRemote` | Offer sent, waiting for the answer       | → Negotiating, Idle (glare)        |
//! | `Negotiating`    | Remote description applied               | → Established                      |
//! | `Established`    | Both descriptions committed              | → Ended                            |
//! | `Ended`          | Hung up                                  | (terminal)                         |
//! | `Failed`         | Structural error                         | (terminal)                         |
//!
//! Every non-terminal state can also move to `Ended` (hangup) or `Failed`
//! (structural error).
//!
//! ```text
//!                 start_call                 offer created
//!     [Idle] ───────────────> [Offering] ──────────────────> [AwaitingRemote]
//!       │  ^                      │                                │
//!       │  └──── glare, yield ────┴────────────────────────────────┤
//!       │ receive offer                                            │ receive answer
//!       v                                                          v
//!   [Negotiating] ─── answer created ──> [Established] <── [Negotiating]
//! ```
//!
//! ## Ordering
//!
//! There are no sequence numbers. The only ordering rule is that a fragment is
//! never applied before a remote description: fragments arriving earlier wait
//! in the [`CandidateBuffer`] and are replayed in arrival order the moment the
//! remote description is accepted.
//!
//! ## Glare
//!
//! If an offer arrives from the remote while our own offer is outstanding, the
//! [`TieBreak`] rule picks the side that yields. The yielding side bumps its
//! attempt counter, rolls back to `Idle` and answers; the other side ignores
//! the competing offer.

mod buffer;
mod effect;
mod glare;
mod session;
mod state;

pub use buffer::CandidateBuffer;
pub use effect::{
    Effect, FailureStage, LocalDescription, MediaOp, Outcome, SessionNotice, Ticket,
};
pub use glare::TieBreak;
pub use session::{Session, SessionStats};
pub use state::{NegotiationState, Role};
