use super::status::ConnectionStatus;
use crate::error::Result;
use crate::filter::BloomFilter;
use crate::peer_error;

/// A remote node known by its "host:port" address
#[derive(Clone, Debug)]
pub struct Peer {
    address: String,
    status: ConnectionStatus,
    filter: Option<BloomFilter>,
}

/// Point-in-time copy of a peer, taken outside the registry lock
#[derive(Clone, Debug)]
pub struct PeerSnapshot {
    pub address: String,
    pub status: ConnectionStatus,
    pub filter: Option<BloomFilter>,
}

impl Peer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: ConnectionStatus::Disconnected,
            filter: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Filter summary this peer last advertised
    pub fn filter(&self) -> Option<&BloomFilter> {
        self.filter.as_ref()
    }

    pub fn transition(&mut self, next: ConnectionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(peer_error!(
                "{}: invalid transition {} -> {}",
                self.address,
                self.status,
                next
            ));
        }
        self.status = next;
        Ok(())
    }

    pub fn set_filter(&mut self, filter: BloomFilter) {
        self.filter = Some(filter);
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            address: self.address.clone(),
            status: self.status,
            filter: self.filter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_peer_is_disconnected() {
        let peer = Peer::new("10.0.0.1:5454");
        assert_eq!(peer.address(), "10.0.0.1:5454");
        assert_eq!(peer.status(), ConnectionStatus::Disconnected);
        assert!(peer.filter().is_none());
    }

    #[test]
    fn invalid_transition_keeps_status() {
        let mut peer = Peer::new("10.0.0.1:5454");
        assert!(peer.transition(ConnectionStatus::Connected).is_err());
        assert_eq!(peer.status(), ConnectionStatus::Disconnected);

        peer.transition(ConnectionStatus::Connecting).unwrap();
        peer.transition(ConnectionStatus::Connected).unwrap();
        peer.transition(ConnectionStatus::Timeout).unwrap();
        peer.transition(ConnectionStatus::Disconnected).unwrap();
        assert_eq!(peer.snapshot().status, ConnectionStatus::Disconnected);
    }
}
