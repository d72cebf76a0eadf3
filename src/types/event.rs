use super::{RouletteEntity, SpinResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw lifecycle and data events emitted by the stream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect,
    Disconnect,
    Error(String),
    Reconnecting { attempt: u32 },
    Message(String),
}

/// Named channel a subscriber listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Full snapshot after every applied batch.
    Update,
    /// Only the spins that were new in a batch.
    NewSpins,
    Connect,
    Disconnect,
    Error,
    Reconnecting,
    AccessRequired,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Update => write!(f, "update"),
            Channel::NewSpins => write!(f, "new_spins"),
            Channel::Connect => write!(f, "connect"),
            Channel::Disconnect => write!(f, "disconnect"),
            Channel::Error => write!(f, "error"),
            Channel::Reconnecting => write!(f, "reconnecting"),
            Channel::AccessRequired => write!(f, "access_required"),
        }
    }
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Current cache contents (filtered per subscriber).
    Update(Vec<RouletteEntity>),
    /// Spins that were new for one roulette, newest first.
    #[serde(rename_all = "camelCase")]
    NewSpins {
        entity_id: String,
        display_name: String,
        spins: Vec<SpinResult>,
    },
    Connect,
    Disconnect,
    Error { message: String },
    Reconnecting { attempt: u32 },
    /// The server withheld data. An empty list means the whole batch was withheld.
    AccessRequired { entities: Vec<String> },
}

impl ClientEvent {
    pub fn channel(&self) -> Channel {
        match self {
            ClientEvent::Update(_) => Channel::Update,
            ClientEvent::NewSpins { .. } => Channel::NewSpins,
            ClientEvent::Connect => Channel::Connect,
            ClientEvent::Disconnect => Channel::Disconnect,
            ClientEvent::Error { .. } => Channel::Error,
            ClientEvent::Reconnecting { .. } => Channel::Reconnecting,
            ClientEvent::AccessRequired { .. } => Channel::AccessRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::NewSpins.to_string(), "new_spins");
        assert_eq!(Channel::AccessRequired.to_string(), "access_required");
        assert_eq!(
            serde_json::to_string(&Channel::AccessRequired).unwrap(),
            "\"access_required\""
        );
    }

    #[test]
    fn test_event_channel() {
        assert_eq!(ClientEvent::Update(vec![]).channel(), Channel::Update);
        assert_eq!(
            ClientEvent::Reconnecting { attempt: 1 }.channel(),
            Channel::Reconnecting
        );
        assert_eq!(
            ClientEvent::AccessRequired { entities: vec![] }.channel(),
            Channel::AccessRequired
        );
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&ClientEvent::Reconnecting { attempt: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"reconnecting","data":{"attempt":2}}"#);

        let json = serde_json::to_string(&ClientEvent::Connect).unwrap();
        assert_eq!(json, r#"{"type":"connect"}"#);
    }
}
