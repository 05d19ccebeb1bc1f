//! Session lifecycle.
//!
//! The local endpoint takes part in at most one call at a time. The
//! [`SessionLifecycleManager`] creates the session on a local call or an
//! inbound offer, routes every signal to it, and destroys it on hangup,
//! remote `end_call`, failure or roster departure.
//!
//! | Input                        | Effect on the session                        |
//! |------------------------------|----------------------------------------------|
//! | `start_call`                 | create (or adopt a buffered stub) + offer    |
//! | `signal` offer, no session   | create as responder                          |
//! | `signal` offer, other remote | reply `end_call`, notify busy                |
//! | `signal` candidate, early    | create a stub that buffers the fragment      |
//! | `end_call` (local/remote)    | `Ended`, media released, session destroyed   |
//! | remote left `online_users`   | same as a remote `end_call`                  |
//! | fatal error                  | `Failed`, media released, session destroyed  |

mod manager;

pub use manager::SessionLifecycleManager;
