use serde::{Deserialize, Serialize};

/// Connection state of a remote peer.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Timeout
///       ^             |             |           |
///       +-------------+-------------+-----------+
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Timeout,
}

impl ConnectionStatus {
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Timeout)
                | (Connected, Disconnected)
                | (Timeout, Disconnected)
        )
    }

    /// Worth sending a request to
    pub fn is_routable(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        )
    }

    /// `Disconnect()` is only valid from these states
    pub fn can_disconnect(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Timeout)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Timeout => write!(f, "timeout"),
        }
    }
}
