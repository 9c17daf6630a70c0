//! Peer registry: bounded active set, growable backup set, gossip discovery.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::peer::{Peer, PeerSnapshot};
use super::status::ConnectionStatus;
use crate::error::{CacheError, Result};
use crate::filter::BloomFilter;
use crate::peer_error;
use crate::settings::{validate_address, RetryPolicy, Settings};
use crate::transport::commands::{parse_peer_list, Command};
use crate::transport::MessageExchange;

pub const ACTIVE_PEER_LIMIT: usize = 3;
pub const INITIAL_BACKUP_CAPACITY: usize = 10;
const GOSSIP_CHANNEL_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Active,
    Backup,
}

/// Every stored address appears in `known` exactly once.
/// `known` may also hold our own address so gossip never adds us.
#[derive(Debug)]
struct PeerList {
    active: Vec<Peer>,
    backup: Vec<Peer>,
    backup_capacity: usize,
    known: HashSet<String>,
    version: u64,
}

impl PeerList {
    fn new(self_address: Option<&str>) -> Self {
        let mut known = HashSet::new();
        if let Some(addr) = self_address {
            known.insert(addr.to_string());
        }
        Self {
            active: Vec::with_capacity(ACTIVE_PEER_LIMIT),
            backup: Vec::with_capacity(INITIAL_BACKUP_CAPACITY),
            backup_capacity: INITIAL_BACKUP_CAPACITY,
            known,
            version: 0,
        }
    }

    fn insert(&mut self, address: &str) -> Option<Placement> {
        if self.known.contains(address) {
            return None;
        }
        let peer = Peer::new(address);
        let placement = if self.active.len() < ACTIVE_PEER_LIMIT {
            self.active.push(peer);
            Placement::Active
        } else {
            if self.backup.len() == self.backup_capacity {
                self.backup.reserve_exact(self.backup_capacity);
                self.backup_capacity *= 2;
            }
            self.backup.push(peer);
            Placement::Backup
        };
        self.known.insert(address.to_string());
        self.version += 1;
        Some(placement)
    }

    fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.active.iter().chain(self.backup.iter())
    }

    fn find(&self, address: &str) -> Option<&Peer> {
        self.iter().find(|p| p.address() == address)
    }

    fn find_mut(&mut self, address: &str) -> Option<&mut Peer> {
        self.active
            .iter_mut()
            .chain(self.backup.iter_mut())
            .find(|p| p.address() == address)
    }

    fn len(&self) -> usize {
        self.active.len() + self.backup.len()
    }
}

pub struct PeerRegistry {
    peers: RwLock<PeerList>,
    exchange: Arc<dyn MessageExchange>,
    dials_out: bool,
    testing: bool,
    gossip_tx: mpsc::Sender<String>,
    gossip_rx: Mutex<Option<mpsc::Receiver<String>>>,
    connected: Notify,
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("dials_out", &self.dials_out)
            .field("testing", &self.testing)
            .finish()
    }
}

impl PeerRegistry {
    /// Seed the registry with the configured peers without connecting them
    pub fn new(settings: &Settings, exchange: Arc<dyn MessageExchange>) -> Self {
        let mut list = PeerList::new(settings.advertise_address.as_deref());
        for address in &settings.remote_peers {
            list.insert(address);
        }
        let (gossip_tx, gossip_rx) = mpsc::channel(GOSSIP_CHANNEL_SIZE);
        Self {
            peers: RwLock::new(list),
            exchange,
            dials_out: settings.dials_out(),
            testing: settings.testing,
            gossip_tx,
            gossip_rx: Mutex::new(Some(gossip_rx)),
            connected: Notify::new(),
        }
    }

    /// Returns true if the address was new
    pub async fn add_peer(&self, address: &str) -> bool {
        let placement = self.peers.write().await.insert(address);
        match placement {
            None => false,
            Some(Placement::Active) => {
                debug!("Added active peer {}", address);
                true
            }
            Some(Placement::Backup) => {
                debug!("Added backup peer {}", address);
                if self.dials_out {
                    if let Err(e) = self.connect_peer(address).await {
                        warn!("Failed to connect backup peer {}: {}", address, e);
                    }
                }
                true
            }
        }
    }

    /// Drive one peer through Connecting to Connected or back to Disconnected
    pub async fn connect_peer(&self, address: &str) -> Result<()> {
        {
            let mut peers = self.peers.write().await;
            let peer = peers
                .find_mut(address)
                .ok_or_else(|| peer_error!("Unknown peer {}", address))?;
            match peer.status() {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Timeout => peer.transition(ConnectionStatus::Disconnected)?,
                _ => {}
            }
            peer.transition(ConnectionStatus::Connecting)?;
        }

        let result = self.exchange.connect(address).await;

        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.find_mut(address) {
            let next = match result {
                Ok(()) => ConnectionStatus::Connected,
                Err(_) => ConnectionStatus::Disconnected,
            };
            peer.transition(next)?;
        }
        if result.is_ok() {
            self.connected.notify_one();
        }
        result
    }

    /// Resolves after some peer has newly connected
    pub async fn peer_connected(&self) {
        self.connected.notified().await
    }

    /// Dial every disconnected backup peer; returns how many connected
    pub async fn connect_backup_peers(&self) -> usize {
        let addresses: Vec<String> = self
            .peers
            .read()
            .await
            .backup
            .iter()
            .filter(|p| p.status() == ConnectionStatus::Disconnected)
            .map(|p| p.address().to_string())
            .collect();
        let mut connected = 0;
        for address in &addresses {
            match self.connect_peer(address).await {
                Ok(()) => connected += 1,
                Err(e) => warn!("Failed to connect backup peer {}: {}", address, e),
            }
        }
        if !addresses.is_empty() {
            info!("Connected {}/{} backup peers", connected, addresses.len());
        }
        connected
    }

    /// Ask a peer for its peer list; the answer is handled by the gossip consumer
    pub async fn request_peer_list(&self, address: &str) -> Result<()> {
        self.exchange
            .send_request(address, &Command::Peers.render(), self.gossip_tx.clone())
            .await
    }

    /// Connect every active peer in turn. Fails only when all of them fail.
    pub async fn connect_all_peers(&self) -> Result<()> {
        let addresses: Vec<String> = self
            .peers
            .read()
            .await
            .active
            .iter()
            .map(|p| p.address().to_string())
            .collect();
        if addresses.is_empty() {
            warn!("No active peers configured; nothing to connect");
            return Ok(());
        }

        let mut failure_count = 0;
        let mut success_count = 0;
        for address in &addresses {
            info!("Attempting connection to {}", address);
            if let Err(e) = self.connect_peer(address).await {
                warn!("Failed to connect to {}: {}", address, e);
                failure_count += 1;
                continue;
            }
            success_count += 1;

            info!("Connected to {}, requesting peer list", address);
            if let Err(e) = self.request_peer_list(address).await {
                warn!("Peer list request to {} failed: {}", address, e);
            }
        }

        if failure_count == addresses.len() {
            error!("Failed to connect to any peers");
            return Err(CacheError::AllPeersUnreachable);
        }
        info!("Connected to {} peers", success_count);
        Ok(())
    }

    /// `connect_all_peers` with exponential backoff, bounded by `policy`
    pub async fn connect_with_retry(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            attempt += 1;
            match self.connect_all_peers().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= max_attempts => {
                    error!("Giving up after {} connection attempts: {}", attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Connection attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    if self.testing {
                        continue;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CacheError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Best-effort disconnect of every connected or timed-out active peer
    pub async fn disconnect_all_peers(&self) {
        let addresses: Vec<String> = self
            .peers
            .read()
            .await
            .active
            .iter()
            .filter(|p| p.status().can_disconnect())
            .map(|p| p.address().to_string())
            .collect();
        for address in addresses {
            if let Err(e) = self.disconnect(&address).await {
                warn!("Failed to disconnect {}: {}", address, e);
            }
        }
    }

    /// Disconnect a connected peer; false if unknown or not connected
    pub async fn disconnect_peer(&self, address: &str) -> bool {
        let connected = self
            .peers
            .read()
            .await
            .find(address)
            .is_some_and(|p| p.status() == ConnectionStatus::Connected);
        if !connected {
            return false;
        }
        match self.disconnect(address).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to disconnect {}: {}", address, e);
                false
            }
        }
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        if let Err(e) = self.exchange.disconnect(address).await {
            debug!("Transport disconnect of {} reported: {}", address, e);
        }
        let mut peers = self.peers.write().await;
        let peer = peers
            .find_mut(address)
            .ok_or_else(|| peer_error!("Unknown peer {}", address))?;
        peer.transition(ConnectionStatus::Disconnected)?;
        info!("Disconnected from {}", address);
        Ok(())
    }

    /// A connected peer failed to answer in time
    pub async fn mark_timeout(&self, address: &str) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.find_mut(address) {
            if peer.status() == ConnectionStatus::Connected {
                let _ = peer.transition(ConnectionStatus::Timeout);
                warn!("Peer {} timed out", address);
            }
        }
    }

    /// Store a peer's advertised filter; false if the peer is unknown
    pub async fn update_filter(&self, address: &str, filter: BloomFilter) -> bool {
        let mut peers = self.peers.write().await;
        match peers.find_mut(address) {
            Some(peer) => {
                peer.set_filter(filter);
                peers.version += 1;
                true
            }
            None => false,
        }
    }

    /// Fold every address of a peer-list response into the registry
    pub async fn handle_gossip_response(&self, line: &str) -> usize {
        let mut added = 0;
        for address in parse_peer_list(line) {
            if let Err(e) = validate_address(&address) {
                debug!("Ignoring gossiped address: {}", e);
                continue;
            }
            if self.add_peer(&address).await {
                added += 1;
            }
        }
        added
    }

    /// Spawn the long-lived consumer of peer-list responses.
    /// Returns None if it was already started.
    pub fn start_gossip_consumer(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut gossip_rx = self.gossip_rx.lock().ok()?.take()?;
        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Gossip consumer cancelled");
                        break;
                    }
                    maybe_line = gossip_rx.recv() => match maybe_line {
                        Some(line) => {
                            let added = registry.handle_gossip_response(&line).await;
                            if added > 0 {
                                info!("Gossip discovered {} new peers", added);
                            }
                        }
                        None => break,
                    }
                }
            }
        }))
    }

    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers.read().await.iter().map(Peer::snapshot).collect()
    }

    /// (active, backup) addresses in insertion order
    pub async fn addresses(&self) -> (Vec<String>, Vec<String>) {
        let peers = self.peers.read().await;
        let collect = |list: &[Peer]| -> Vec<String> {
            list.iter().map(|p| p.address().to_string()).collect()
        };
        (collect(&peers.active), collect(&peers.backup))
    }

    pub async fn status_of(&self, address: &str) -> Option<ConnectionStatus> {
        self.peers.read().await.find(address).map(Peer::status)
    }

    /// Bumped on every membership or filter change
    pub async fn version(&self) -> u64 {
        self.peers.read().await.version
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn backup_capacity(&self) -> usize {
        self.peers.read().await.backup_capacity
    }
}
