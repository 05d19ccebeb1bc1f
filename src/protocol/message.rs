//! Relay messages.
//!
//! Defines the envelope for `signal`, `end_call`, roster and the chat/file
//! collaborator messages.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use super::signal::{IceCandidate, Participant, SessionDescription, SignalPayload};
use crate::error::{CallError, Result};

/// Relay message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Register a display name
    Join(Participant),
    /// Currently registered participants
    OnlineUsers(Vec<Participant>),
    /// Negotiation message
    Signal(SignalEnvelope),
    /// Text chat
    ChatMessage(ChatMessage),
    /// Typing indicator
    Typing(Addressed),
    /// File transfer as a data URL
    FileMessage(FileMessage),
    /// Read receipt
    MessageSeen(Addressed),
    /// Hang up
    EndCall(EndCall),
    /// Leave the relay
    UserDisconnect,
}

/// Addressed `signal` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Recipient
    pub to: Participant,
    /// Sender (stamped by the relay)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Participant>,
    /// Offer, answer or candidate
    pub signal: SignalPayload,
}

/// Chat text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Recipient
    pub to: Participant,
    /// Sender (stamped by the relay)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Participant>,
    /// Message text
    pub message: String,
}

/// Body shared by `typing` and `message_seen`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addressed {
    /// Recipient
    pub to: Participant,
    /// Sender (stamped by the relay)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Participant>,
}

/// File sent as a `data:<mime>;base64,<payload>` URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMessage {
    /// Recipient
    pub to: Participant,
    /// Sender (stamped by the relay)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Participant>,
    /// Data URL
    pub file: String,
    /// Original file name
    #[serde(rename = "fileName")]
    pub file_name: String,
}

impl FileMessage {
    /// Encode raw bytes the way `FileReader.readAsDataURL` does.
    pub fn from_bytes(to: Participant, file_name: &str, mime: &str, bytes: &[u8]) -> Self {
        let mime = if mime.is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        Self {
            to,
            from: None,
            file: format!("data:{mime};base64,{}", BASE64.encode(bytes)),
            file_name: file_name.to_string(),
        }
    }

    /// Decode the data URL back to bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let rest = self
            .file
            .strip_prefix("data:")
            .ok_or_else(|| CallError::MalformedPayload("file is not a data URL".to_string()))?;
        let (_, encoded) = rest.split_once(";base64,").ok_or_else(|| {
            CallError::MalformedPayload("data URL is not base64 encoded".to_string())
        })?;
        Ok(BASE64.decode(encoded)?)
    }
}

/// Hang-up notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndCall {
    /// Recipient
    pub to: Participant,
    /// Sender (stamped by the relay, absent on legacy relays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Participant>,
}

impl RelayMessage {
    /// Create a `signal` carrying an offer
    pub fn offer(to: &Participant, from: &Participant, offer: SessionDescription) -> Self {
        Self::signal(to, from, SignalPayload::Offer { offer })
    }

    /// Create a `signal` carrying an answer
    pub fn answer(to: &Participant, from: &Participant, answer: SessionDescription) -> Self {
        Self::signal(to, from, SignalPayload::Answer { answer })
    }

    /// Create a `signal` carrying a candidate
    pub fn candidate(to: &Participant, from: &Participant, candidate: IceCandidate) -> Self {
        Self::signal(to, from, SignalPayload::Candidate { candidate })
    }

    fn signal(to: &Participant, from: &Participant, signal: SignalPayload) -> Self {
        RelayMessage::Signal(SignalEnvelope {
            to: to.clone(),
            from: Some(from.clone()),
            signal,
        })
    }

    /// Create an `end_call`
    pub fn end_call(to: &Participant, from: &Participant) -> Self {
        RelayMessage::EndCall(EndCall {
            to: to.clone(),
            from: Some(from.clone()),
        })
    }

    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayMessage::Join(_) => "join",
            RelayMessage::OnlineUsers(_) => "online_users",
            RelayMessage::Signal(_) => "signal",
            RelayMessage::ChatMessage(_) => "chat_message",
            RelayMessage::Typing(_) => "typing",
            RelayMessage::FileMessage(_) => "file_message",
            RelayMessage::MessageSeen(_) => "message_seen",
            RelayMessage::EndCall(_) => "end_call",
            RelayMessage::UserDisconnect => "user_disconnect",
        }
    }

    /// Whether the negotiation engine consumes this message.
    ///
    /// Everything else is forwarded untouched to the chat/UI collaborator.
    pub fn is_core(&self) -> bool {
        matches!(
            self,
            RelayMessage::Signal(_) | RelayMessage::EndCall(_) | RelayMessage::OnlineUsers(_)
        )
    }

    /// Addressed recipient, if any
    pub fn recipient(&self) -> Option<&Participant> {
        match self {
            RelayMessage::Signal(m) => Some(&m.to),
            RelayMessage::ChatMessage(m) => Some(&m.to),
            RelayMessage::Typing(m) | RelayMessage::MessageSeen(m) => Some(&m.to),
            RelayMessage::FileMessage(m) => Some(&m.to),
            RelayMessage::EndCall(m) => Some(&m.to),
            RelayMessage::Join(_) | RelayMessage::OnlineUsers(_) | RelayMessage::UserDisconnect => {
                None
            },
        }
    }

    /// Sender, if stamped
    pub fn sender(&self) -> Option<&Participant> {
        match self {
            RelayMessage::Signal(m) => m.from.as_ref(),
            RelayMessage::ChatMessage(m) => m.from.as_ref(),
            RelayMessage::Typing(m) | RelayMessage::MessageSeen(m) => m.from.as_ref(),
            RelayMessage::FileMessage(m) => m.from.as_ref(),
            RelayMessage::EndCall(m) => m.from.as_ref(),
            RelayMessage::Join(_) | RelayMessage::OnlineUsers(_) | RelayMessage::UserDisconnect => {
                None
            },
        }
    }

    /// Overwrite the sender of an addressed message (relay side).
    pub fn stamp_sender(mut self, sender: &Participant) -> Self {
        let slot = match &mut self {
            RelayMessage::Signal(m) => Some(&mut m.from),
            RelayMessage::ChatMessage(m) => Some(&mut m.from),
            RelayMessage::Typing(m) | RelayMessage::MessageSeen(m) => Some(&mut m.from),
            RelayMessage::FileMessage(m) => Some(&mut m.from),
            RelayMessage::EndCall(m) => Some(&mut m.from),
            RelayMessage::Join(_) | RelayMessage::OnlineUsers(_) | RelayMessage::UserDisconnect => {
                None
            },
        };
        if let Some(slot) = slot {
            *slot = Some(sender.clone());
        }
        self
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalKind;

    fn alice() -> Participant {
        Participant::new("alice").unwrap()
    }

    fn bob() -> Participant {
        Participant::new("bob").unwrap()
    }

    #[test]
    fn test_signal_message_format() {
        let msg = RelayMessage::offer(&bob(), &alice(), SessionDescription::offer("v=0"));
        let json = msg.to_json().unwrap();

        assert!(json.contains(r#""event":"signal""#));
        assert!(json.contains(r#""to":"bob""#));
        assert!(json.contains(r#""from":"alice""#));
        assert!(json.contains(r#""signal":{"type":"offer""#));

        let parsed = RelayMessage::from_json(&json).unwrap();
        match parsed {
            RelayMessage::Signal(env) => assert_eq!(env.signal.kind(), SignalKind::Offer),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_browser_signal_without_sender() {
        let json = r#"{"event":"signal","data":{"to":"bob","signal":{"type":"candidate","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}}}"#;
        let parsed = RelayMessage::from_json(json).unwrap();
        assert!(parsed.sender().is_none());
        assert_eq!(parsed.recipient(), Some(&bob()));

        let stamped = parsed.stamp_sender(&alice());
        assert_eq!(stamped.sender(), Some(&alice()));
    }

    #[test]
    fn test_roster_and_disconnect_format() {
        let roster = RelayMessage::OnlineUsers(vec![alice(), bob()]);
        assert_eq!(
            roster.to_json().unwrap(),
            r#"{"event":"online_users","data":["alice","bob"]}"#
        );

        let bye = RelayMessage::UserDisconnect.to_json().unwrap();
        assert_eq!(bye, r#"{"event":"user_disconnect"}"#);
        assert_eq!(
            RelayMessage::from_json(&bye).unwrap(),
            RelayMessage::UserDisconnect
        );
    }

    #[test]
    fn test_core_classification() {
        assert!(RelayMessage::end_call(&bob(), &alice()).is_core());
        assert!(RelayMessage::OnlineUsers(vec![]).is_core());

        let chat = RelayMessage::ChatMessage(ChatMessage {
            to: bob(),
            from: None,
            message: "hi".to_string(),
        });
        assert!(!chat.is_core());
        assert_eq!(chat.event_name(), "chat_message");
    }

    #[test]
    fn test_file_message_data_url() {
        let file = FileMessage::from_bytes(bob(), "notes.txt", "text/plain", b"hello");
        assert_eq!(file.file, "data:text/plain;base64,aGVsbG8=");
        assert_eq!(file.decode().unwrap(), b"hello");

        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains(r#""fileName":"notes.txt""#));

        let bad = FileMessage {
            file: "https://example.com/x".to_string(),
            ..file
        };
        assert!(matches!(bad.decode(), Err(CallError::MalformedPayload(_))));
    }
}
