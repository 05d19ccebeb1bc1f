//! Relay wire vocabulary.
//!
//! Every message exchanged with the relay is a JSON object
//! `{"event": <name>, "data": <payload>}`, mirroring the socket.io event names
//! the browser client uses.
//!
//! ## Message Types
//!
//! | Event            | Direction       | Consumed by core | Purpose                         |
//! |------------------|-----------------|------------------|---------------------------------|
//! | `join`           | Client→Relay    | produced         | Register a display name         |
//! | `online_users`   | Relay→Client    | yes              | Current roster                  |
//! | `signal`         | Bidirectional   | yes              | offer / answer / candidate      |
//! | `end_call`       | Bidirectional   | yes              | Hang up                         |
//! | `user_disconnect`| Client→Relay    | produced         | Leave the relay                 |
//! | `chat_message`   | Bidirectional   | forwarded        | Text chat                       |
//! | `typing`         | Bidirectional   | forwarded        | Typing indicator                |
//! | `file_message`   | Bidirectional   | forwarded        | File as a `data:` URL           |
//! | `message_seen`   | Bidirectional   | forwarded        | Read receipt                    |
//!
//! ## Signal payloads
//!
//! ```text
//! {"type":"offer","offer":{"type":"offer","sdp":"v=0..."}}
//! {"type":"answer","answer":{"type":"answer","sdp":"v=0..."}}
//! {"type":"candidate","candidate":{"candidate":"candidate:1 1 udp ...","sdpMid":"0","sdpMLineIndex":0}}
//! ```
//!
//! No message carries a sequence number. The relay stamps `from` on delivery;
//! clients may leave it out when sending.

mod message;
mod signal;

pub use message::{Addressed, ChatMessage, EndCall, FileMessage, RelayMessage, SignalEnvelope};
pub use signal::{IceCandidate, Participant, SdpType, SessionDescription, SignalKind, SignalPayload};
