#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use bloomcache::error::{CacheError, Result};
use bloomcache::filter::BloomFilter;
use bloomcache::settings::{DEFAULT_EXPECTED_ITEMS, DEFAULT_FALSE_POSITIVE_RATE};
use bloomcache::transport::{Command, MessageExchange, ResponseSender};

/// Scripted behaviour of one fake peer
#[derive(Clone, Debug, Default)]
pub struct MockPeer {
    pub entries: HashMap<String, String>,
    // keys in the advertised filter that have no value
    pub ghost_keys: Vec<String>,
    pub peers: Vec<String>,
    pub refuse_connect: bool,
    pub silent_get: bool,
}

impl MockPeer {
    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    fn filter_text(&self) -> String {
        let mut filter =
            BloomFilter::new_by_fail_rate(DEFAULT_EXPECTED_ITEMS, DEFAULT_FALSE_POSITIVE_RATE);
        for key in self.entries.keys().chain(self.ghost_keys.iter()) {
            filter.add_key(key.as_bytes());
        }
        filter.convert_to_string()
    }
}

#[derive(Default)]
pub struct MockExchange {
    peers: Mutex<HashMap<String, MockPeer>>,
    // senders kept alive so the requester waits out its timeout
    withheld: Mutex<Vec<ResponseSender>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockExchange {
    pub fn new(peers: Vec<(&str, MockPeer)>) -> Self {
        Self {
            peers: Mutex::new(
                peers
                    .into_iter()
                    .map(|(addr, peer)| (addr.to_string(), peer))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Commands sent to `address`, in order
    pub fn requests_to(&self, address: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(addr, _)| addr == address)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// A write that happens on the peer after it advertised its filter
    pub fn set_entry(&self, address: &str, key: &str, value: &str) {
        if let Some(peer) = self.peers.lock().unwrap().get_mut(address) {
            peer.entries.insert(key.to_string(), value.to_string());
        }
    }

    fn peer(&self, address: &str) -> Option<MockPeer> {
        self.peers.lock().unwrap().get(address).cloned()
    }
}

#[async_trait]
impl MessageExchange for MockExchange {
    async fn connect(&self, address: &str) -> Result<()> {
        match self.peer(address) {
            Some(peer) if !peer.refuse_connect => Ok(()),
            _ => Err(CacheError::ConnectionFailure(format!(
                "mock refused {}",
                address
            ))),
        }
    }

    async fn disconnect(&self, _address: &str) -> Result<()> {
        Ok(())
    }

    async fn send_request(
        &self,
        address: &str,
        command: &str,
        respond_to: ResponseSender,
    ) -> Result<()> {
        self.requests
            .lock()
            .unwrap()
            .push((address.to_string(), command.to_string()));
        let peer = self
            .peer(address)
            .ok_or_else(|| CacheError::Transport(format!("unknown {}", address)))?;

        let payload = match Command::parse(command)? {
            Command::Get { key } => {
                if peer.silent_get {
                    self.withheld.lock().unwrap().push(respond_to);
                    return Ok(());
                }
                let value = peer.entries.get(&key).cloned().unwrap_or_default();
                format!("{}:{}", key, value)
            }
            Command::Filter => peer.filter_text(),
            Command::Peers => peer.peers.join(","),
            _ => "OK".to_string(),
        };
        let _ = respond_to.send(format!("1:FULFILLED {}", payload)).await;
        Ok(())
    }
}
