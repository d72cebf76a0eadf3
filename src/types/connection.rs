use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the push-stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

impl ConnectionState {
    /// An automatic connection attempt is scheduled or running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting({})", attempt),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Snapshot of connection health for status indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    /// Time the last stream frame was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_received_at: Option<DateTime<Utc>>,
    /// Consecutive failed attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Manual or supervisor-issued reconnects since startup.
    pub forced_reconnects: u64,
    /// Whether the server is currently withholding data pending access.
    pub access_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_in_flight() {
        assert!(ConnectionState::Connecting.is_in_flight());
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_in_flight());
        assert!(!ConnectionState::Connected.is_in_flight());
        assert!(!ConnectionState::Disconnected.is_in_flight());
        assert!(!ConnectionState::Idle.is_in_flight());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting(3)"
        );
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Reconnecting { attempt: 1 }).unwrap();
        assert_eq!(json, r#"{"state":"reconnecting","attempt":1}"#);

        let parsed: ConnectionState = serde_json::from_str(r#"{"state":"connected"}"#).unwrap();
        assert_eq!(parsed, ConnectionState::Connected);
    }

    #[test]
    fn test_status_serialization() {
        let status = ConnectionStatus {
            state: ConnectionState::Connected,
            connected: true,
            last_received_at: None,
            reconnect_attempts: 0,
            forced_reconnects: 2,
            access_required: false,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"reconnectAttempts\":0"));
        assert!(json.contains("\"forcedReconnects\":2"));
        assert!(!json.contains("lastReceivedAt"));
    }
}
