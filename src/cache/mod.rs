//! Cache orchestrator
//!
//! Local reads go straight to a lock-free map. Writes hold the state lock,
//! which also guards the local filter, the expiration schedule and the
//! per-key deadlines, so those three never disagree with the map.
mod remote;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::filter::{BloomFilter, KeyHasher, RoutingIndex};
use crate::peers::{ConnectionStatus, PeerRegistry};
use crate::schedule::{ExpirationSchedule, ScheduleNode};
use crate::settings::{validate_address, Settings};
use crate::transport::commands::{fulfilled, validate_key, validate_value};
use crate::transport::{MessageExchange, NoOpExchange};

pub const PEER_DISCONNECTED: &str = "Peer has been disconnected.";
pub const PEER_NOT_FOUND: &str = "Peer not found in peer list.";

#[derive(Debug)]
struct CacheState {
    filter: BloomFilter,
    schedule: ExpirationSchedule,
    // latest scheduled expiry per key; schedule nodes that disagree are stale
    deadlines: HashMap<String, DateTime<Utc>>,
}

pub struct Cache {
    settings: Settings,
    entries: papaya::HashMap<String, String>,
    state: Mutex<CacheState>,
    hasher: KeyHasher,
    registry: Arc<PeerRegistry>,
    routing: RwLock<Option<RoutingIndex>>,
    exchange: Arc<dyn MessageExchange>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entries.len())
            .field("hasher", &self.hasher)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Cache {
    pub fn new(settings: Settings, exchange: Arc<dyn MessageExchange>) -> Result<Self> {
        settings.validate()?;
        let filter =
            BloomFilter::new_by_fail_rate(settings.expected_items, settings.false_positive_rate);
        let hasher = filter.hasher();
        let state = CacheState {
            filter,
            schedule: ExpirationSchedule::with_capacity(settings.schedule_capacity),
            deadlines: HashMap::new(),
        };
        let registry = Arc::new(PeerRegistry::new(&settings, Arc::clone(&exchange)));
        debug!(
            "Cache filter sized to {} bits for {} items",
            hasher.capacity(),
            settings.expected_items
        );
        Ok(Self {
            settings,
            entries: papaya::HashMap::new(),
            state: Mutex::new(state),
            hasher,
            registry,
            routing: RwLock::new(None),
            exchange,
            cancel: CancellationToken::new(),
        })
    }

    /// A cache that never talks to peers
    pub fn local(settings: Settings) -> Result<Self> {
        Self::new(settings, Arc::new(NoOpExchange))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local lookup only
    pub fn get_local(&self, key: &str) -> Option<String> {
        self.entries.pin().get(key).cloned()
    }

    /// Local lookup, falling back to the peers most likely to hold `key`.
    ///
    /// Remote hits come back as `"<key>:<value>"`.
    pub async fn get(&self, key: &str) -> Result<String> {
        if let Some(value) = self.get_local(key) {
            return Ok(value);
        }
        if self.registry.is_empty().await {
            return Err(CacheError::NotFound(key.to_string()));
        }
        self.get_remote(key).await
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        let mut state = self.state.lock()?;
        self.entries.pin().insert(key.to_string(), value.to_string());
        state.filter.add_key(key.as_bytes());
        // a plain write outlives any earlier TTL
        state.deadlines.remove(key);
        Ok(())
    }

    pub fn set_expiration(&self, key: &str, value: &str, ttl_seconds: u32) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        let expires_at = Utc::now() + chrono::Duration::seconds(i64::from(ttl_seconds));
        let mut state = self.state.lock()?;
        self.entries.pin().insert(key.to_string(), value.to_string());
        state.filter.add_key(key.as_bytes());
        state.schedule.insert(ScheduleNode::new(key, expires_at));
        state.deadlines.insert(key.to_string(), expires_at);
        Ok(())
    }

    /// Remove every key whose current deadline is at or before `as_of`
    pub fn evict_expired_keys(&self, as_of: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock()?;
        let CacheState {
            schedule,
            deadlines,
            ..
        } = &mut *state;

        let mut evicted = 0;
        for node in schedule.pop_expired(as_of) {
            if deadlines.get(&node.key) != Some(&node.expires_at) {
                continue;
            }
            deadlines.remove(&node.key);
            self.entries.pin().remove(&node.key);
            evicted += 1;
        }
        if evicted > 0 {
            debug!("Evicted {} expired keys", evicted);
        }
        Ok(evicted)
    }

    /// Periodic expiration sweep until cancelled
    pub async fn run_eviction(&self) {
        let period = self.settings.eviction_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Eviction sweep stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.evict_expired_keys(Utc::now()) {
                        warn!("Eviction sweep failed: {}", e);
                    }
                }
            }
        }
    }

    /// Periodic re-fetch of peer filters until cancelled.
    ///
    /// Also runs as soon as the registry reports a newly connected peer.
    pub async fn run_filter_refresh(&self) {
        let period = self
            .settings
            .filter_refresh_interval()
            .max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Filter refresh stopped");
                    break;
                }
                _ = interval.tick() => {}
                _ = self.registry.peer_connected() => {}
            }
            if let Err(e) = self.refresh_peer_filters().await {
                warn!("Filter refresh failed: {}", e);
            }
        }
    }

    /// Register a peer and bring the routing index up to date
    pub async fn add_peer(&self, address: &str) -> Result<bool> {
        validate_address(address)?;
        let added = self.registry.add_peer(address).await;
        if added && self.registry.status_of(address).await == Some(ConnectionStatus::Connected) {
            if let Err(e) = self.fetch_peer_filter(address).await {
                warn!("Could not fetch filter from new peer {}: {}", address, e);
            }
        }
        self.rebuild_routing().await?;
        if added {
            info!("Added peer {}", address);
        }
        Ok(added)
    }

    pub async fn disconnect_peer(&self, address: &str) -> String {
        if self.registry.disconnect_peer(address).await {
            PEER_DISCONNECTED.to_string()
        } else {
            PEER_NOT_FOUND.to_string()
        }
    }

    /// `"<tag>:FULFILLED a1,a2,...\n"`, active peers first
    pub async fn list_peers(&self, tag: &str) -> String {
        let (active, backup) = self.registry.addresses().await;
        let all: Vec<String> = active.into_iter().chain(backup).collect();
        format!("{}\n", fulfilled(tag, &all.join(",")))
    }

    /// Local filter serialized for peers
    pub fn filter_string(&self) -> Result<String> {
        Ok(self.state.lock()?.filter.convert_to_string())
    }

    /// Connect to the configured peers and learn their filters.
    ///
    /// Nodes that do not dial out only build an empty routing index.
    pub async fn start(&self) -> Result<()> {
        if self
            .registry
            .start_gossip_consumer(self.cancel.child_token())
            .is_none()
        {
            debug!("Gossip consumer already running");
        }
        if self.settings.dials_out() {
            self.registry
                .connect_with_retry(&self.settings.retry, &self.cancel)
                .await?;
            self.registry.connect_backup_peers().await;
            let refreshed = self.refresh_peer_filters().await?;
            info!("Loaded filters from {} peers", refreshed);
        } else {
            self.rebuild_routing().await?;
        }
        Ok(())
    }

    /// Stop background tasks and disconnect from every peer
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.registry.disconnect_all_peers().await;
        info!("Cache shut down");
    }
}
