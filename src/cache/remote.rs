//! Remote lookups and routing index maintenance
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::Cache;
use crate::error::{CacheError, Result};
use crate::filter::{BloomFilter, RoutingIndex};
use crate::peers::{ConnectionStatus, PeerSnapshot};
use crate::transport::commands::{parse_get_response, validate_key, Command, Response};
use crate::transport_error;

impl Cache {
    pub(super) async fn get_remote(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        for address in self.route(key).await? {
            match self.registry.status_of(&address).await {
                Some(status) if status.is_routable() => {}
                _ => continue,
            }
            match self.query_peer(&address, key).await {
                Ok(Some(value)) => {
                    debug!("Found {} at {}", key, address);
                    return Ok(format!("{}:{}", key, value));
                }
                Ok(None) => continue,
                Err(e) => {
                    debug!("Lookup of {} at {} failed: {}", key, address, e);
                    continue;
                }
            }
        }
        Err(CacheError::NotFound(key.to_string()))
    }

    /// Candidate peers for `key`, best match first
    async fn route(&self, key: &str) -> Result<Vec<String>> {
        let version = self.registry.version().await;
        match self.routing_version()? {
            None => return Err(CacheError::UninitializedRouting),
            Some(built_from) if built_from != version => self.rebuild_routing().await?,
            Some(_) => {}
        }
        self.candidates(key)
    }

    fn routing_version(&self) -> Result<Option<u64>> {
        Ok(self.routing.read()?.as_ref().map(RoutingIndex::version))
    }

    fn candidates(&self, key: &str) -> Result<Vec<String>> {
        let positions = self.hasher.positions(key.as_bytes());
        let routing = self.routing.read()?;
        let index = routing.as_ref().ok_or(CacheError::UninitializedRouting)?;
        Ok(index.get_from_indices(&positions))
    }

    /// None when the peer answered without a value or never answered in time
    async fn query_peer(&self, address: &str, key: &str) -> Result<Option<String>> {
        let command = Command::Get {
            key: key.to_string(),
        };
        let (tx, mut rx) = mpsc::channel(1);
        self.exchange
            .send_request(address, &command.render(), tx)
            .await?;

        match timeout(self.settings.request_timeout(), rx.recv()).await {
            Ok(Some(line)) => Ok(parse_get_response(&line, key)),
            Ok(None) => Ok(None),
            Err(_) => {
                warn!("Peer {} did not answer GET {} in time", address, key);
                self.registry.mark_timeout(address).await;
                Ok(None)
            }
        }
    }

    /// Rebuild the routing index from the registry's current peers
    pub(super) async fn rebuild_routing(&self) -> Result<()> {
        let version = self.registry.version().await;
        let snapshot = self.registry.snapshot().await;
        self.install_routing(&snapshot, version)
    }

    fn install_routing(&self, snapshot: &[PeerSnapshot], version: u64) -> Result<()> {
        let mut routing = self.routing.write()?;
        match routing.as_mut() {
            Some(index) => index.recalculate(snapshot, version),
            None => {
                *routing = Some(RoutingIndex::new(
                    snapshot,
                    version,
                    self.settings.strict_routing,
                ))
            }
        }
        Ok(())
    }

    /// Ask one peer for its filter and store it on the registry
    pub(super) async fn fetch_peer_filter(&self, address: &str) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(1);
        self.exchange
            .send_request(address, &Command::Filter.render(), tx)
            .await?;

        let line = match timeout(self.settings.request_timeout(), rx.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(transport_error!("{} closed the filter request", address)),
            Err(_) => {
                self.registry.mark_timeout(address).await;
                return Err(transport_error!("{} did not send its filter in time", address));
            }
        };
        let filter = match Response::parse(&line) {
            Some(response) if response.fulfilled => {
                BloomFilter::convert_string_to_filter(response.payload, self.hasher.capacity())?
            }
            _ => return Err(transport_error!("Unusable filter response from {}", address)),
        };
        if !self.registry.update_filter(address, filter).await {
            return Err(CacheError::Peer(format!("Unknown peer {}", address)));
        }
        Ok(())
    }

    /// Ask every connected peer for its filter and rebuild the routing index.
    /// Returns how many peer filters were stored.
    pub async fn refresh_peer_filters(&self) -> Result<usize> {
        let mut refreshed = 0;
        for peer in self.registry.snapshot().await {
            if peer.status != ConnectionStatus::Connected {
                continue;
            }
            match self.fetch_peer_filter(&peer.address).await {
                Ok(()) => refreshed += 1,
                Err(e) => warn!("Filter refresh from {} failed: {}", peer.address, e),
            }
        }
        self.rebuild_routing().await?;
        Ok(refreshed)
    }
}
