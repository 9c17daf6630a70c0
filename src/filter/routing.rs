//! Routing index: filter bit position -> peers advertising that bit.
use std::collections::HashMap;

use crate::peers::PeerSnapshot;

#[derive(Clone, Debug, Default)]
pub struct RoutingIndex {
    /// bit position -> indexes into `peers`
    positions: HashMap<usize, Vec<usize>>,
    /// peer addresses in registry order
    peers: Vec<String>,
    /// peers that never advertised a filter
    fallback: Vec<String>,
    /// registry version this index was built from
    version: u64,
    strict: bool,
}

impl RoutingIndex {
    pub fn new(snapshot: &[PeerSnapshot], version: u64, strict: bool) -> Self {
        let mut index = Self {
            strict,
            ..Self::default()
        };
        index.recalculate(snapshot, version);
        index
    }

    pub fn recalculate(&mut self, snapshot: &[PeerSnapshot], version: u64) {
        self.positions.clear();
        self.peers.clear();
        self.fallback.clear();
        for peer in snapshot {
            match &peer.filter {
                Some(filter) => {
                    let slot = self.peers.len();
                    self.peers.push(peer.address.clone());
                    for pos in filter.bits().iter_ones() {
                        self.positions.entry(pos).or_default().push(slot);
                    }
                }
                None => self.fallback.push(peer.address.clone()),
            }
        }
        self.version = version;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Candidate peers for a key's hashed positions, best match first.
    ///
    /// Peers are ranked by how many of the positions their filter has set
    /// (ties keep registry order). In strict mode only peers matching every
    /// position are returned. Peers without an advertised filter always
    /// trail the list.
    pub fn get_from_indices(&self, indices: &[usize]) -> Vec<String> {
        let mut overlap = vec![0usize; self.peers.len()];
        for pos in indices {
            if let Some(slots) = self.positions.get(pos) {
                for &slot in slots {
                    overlap[slot] += 1;
                }
            }
        }

        let mut ranked: Vec<(usize, usize)> = overlap
            .into_iter()
            .enumerate()
            .filter(|(_, count)| {
                if self.strict {
                    !indices.is_empty() && *count == indices.len()
                } else {
                    *count > 0
                }
            })
            .collect();
        // stable sort keeps registry order among equal counts
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        ranked
            .into_iter()
            .map(|(slot, _)| self.peers[slot].clone())
            .chain(self.fallback.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BloomFilter;
    use crate::peers::ConnectionStatus;

    fn snapshot(address: &str, keys: &[&str]) -> PeerSnapshot {
        let mut filter = BloomFilter::new(512, 3);
        for key in keys {
            filter.add_key(key.as_bytes());
        }
        PeerSnapshot {
            address: address.to_string(),
            status: ConnectionStatus::Connected,
            filter: Some(filter),
        }
    }

    #[test]
    fn ranks_full_match_first() {
        let peers = vec![
            snapshot("10.0.0.1:5454", &["other"]),
            snapshot("10.0.0.2:5454", &["wanted"]),
        ];
        let index = RoutingIndex::new(&peers, 1, false);
        let positions = BloomFilter::new(512, 3).hash_key(b"wanted");
        let candidates = index.get_from_indices(&positions);
        assert_eq!(candidates.first().map(String::as_str), Some("10.0.0.2:5454"));
        assert_eq!(index.version(), 1);
    }

    #[test]
    fn strict_mode_requires_every_position() {
        let peers = vec![
            snapshot("10.0.0.1:5454", &["other"]),
            snapshot("10.0.0.2:5454", &["wanted"]),
        ];
        let index = RoutingIndex::new(&peers, 1, true);
        let positions = BloomFilter::new(512, 3).hash_key(b"wanted");
        let candidates = index.get_from_indices(&positions);
        assert!(candidates.contains(&"10.0.0.2:5454".to_string()));
        for candidate in &candidates {
            let peer = peers.iter().find(|p| &p.address == candidate).unwrap();
            assert!(peer.filter.as_ref().unwrap().has_key(b"wanted").0);
        }
    }

    #[test]
    fn peers_without_filters_trail() {
        let mut peers = vec![snapshot("10.0.0.1:5454", &["wanted"])];
        peers.push(PeerSnapshot {
            address: "10.0.0.9:5454".to_string(),
            status: ConnectionStatus::Disconnected,
            filter: None,
        });
        let index = RoutingIndex::new(&peers, 2, true);
        let positions = BloomFilter::new(512, 3).hash_key(b"wanted");
        assert_eq!(
            index.get_from_indices(&positions),
            vec!["10.0.0.1:5454".to_string(), "10.0.0.9:5454".to_string()]
        );
    }

    #[test]
    fn recalculate_replaces_contents() {
        let mut index = RoutingIndex::new(&[snapshot("10.0.0.1:5454", &["a"])], 1, false);
        index.recalculate(&[snapshot("10.0.0.2:5454", &["a"])], 2);
        let positions = BloomFilter::new(512, 3).hash_key(b"a");
        assert_eq!(
            index.get_from_indices(&positions),
            vec!["10.0.0.2:5454".to_string()]
        );
        assert_eq!(index.version(), 2);
    }
}
