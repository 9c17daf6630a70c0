//! Bloom Filter for local existence checks and cross-peer routing
//!
//! Each cache owns one filter for its own keyspace and keeps one decoded
//! filter per peer that advertised its summary. Filters serialize to base64
//! text so they can travel inside line-oriented peer responses.
pub mod bitset;
pub mod routing;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub use bitset::BitSet;
pub use routing::RoutingIndex;

use crate::decode_error;
use crate::error::Result;

/// Number of hash positions per key
pub const DEFAULT_HASH_FUNCTIONS: usize = 3;

/// Position computation shared by a filter and anyone routing with it.
///
/// Double hashing over a blake3 digest: `pos_i = (h1 + i * h2) mod capacity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyHasher {
    capacity: usize,
    hash_count: usize,
}

impl KeyHasher {
    pub fn new(capacity: usize, hash_count: usize) -> Self {
        Self {
            capacity,
            hash_count,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hash_count(&self) -> usize {
        self.hash_count
    }

    pub fn positions(&self, key: &[u8]) -> Vec<usize> {
        if self.capacity == 0 {
            return Vec::new();
        }
        let digest = blake3::hash(key);
        let bytes = digest.as_bytes();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[0..8]);
        let h1 = u64::from_le_bytes(word);
        word.copy_from_slice(&bytes[8..16]);
        let h2 = u64::from_le_bytes(word);
        let m = self.capacity as u64;
        (0..self.hash_count as u64)
            .map(|i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    hasher: KeyHasher,
    bits: BitSet,
}

impl BloomFilter {
    pub fn new(capacity: usize, hash_count: usize) -> Self {
        Self {
            hasher: KeyHasher::new(capacity, hash_count),
            bits: BitSet::new(capacity),
        }
    }

    /// Size the filter for `expected_items` at `fail_rate` false positives
    pub fn new_by_fail_rate(expected_items: usize, fail_rate: f64) -> Self {
        Self::new(
            optimal_capacity(expected_items, fail_rate),
            DEFAULT_HASH_FUNCTIONS,
        )
    }

    pub fn capacity(&self) -> usize {
        self.hasher.capacity
    }

    pub fn hash_count(&self) -> usize {
        self.hasher.hash_count
    }

    pub fn hasher(&self) -> KeyHasher {
        self.hasher
    }

    pub fn bits(&self) -> &BitSet {
        &self.bits
    }

    pub fn add_key(&mut self, key: &[u8]) -> (bool, Vec<usize>) {
        let positions = self.hasher.positions(key);
        for &pos in &positions {
            self.bits.set(pos);
        }
        (true, positions)
    }

    pub fn has_key(&self, key: &[u8]) -> (bool, Vec<usize>) {
        let positions = self.hasher.positions(key);
        let present = !positions.is_empty() && positions.iter().all(|&pos| self.bits.test(pos));
        (present, positions)
    }

    pub fn hash_key(&self, key: &[u8]) -> Vec<usize> {
        self.hasher.positions(key)
    }

    /// Probability that an absent key tests positive at the current fill
    pub fn estimated_false_positive_rate(&self) -> f64 {
        if self.capacity() == 0 {
            return 1.0;
        }
        let fill = self.bits.count_ones() as f64 / self.capacity() as f64;
        fill.powi(self.hash_count() as i32)
    }

    pub fn merge(&mut self, other: &BloomFilter) -> Result<()> {
        if self.hasher != other.hasher {
            return Err(decode_error!(
                "Cannot merge filter of capacity {} (k={}) into capacity {} (k={})",
                other.capacity(),
                other.hash_count(),
                self.capacity(),
                self.hash_count()
            ));
        }
        self.bits.union_with(&other.bits);
        Ok(())
    }

    /// Decodes `text` with this filter's own capacity and hash count
    pub fn merge_serialized(&mut self, text: &str) -> Result<()> {
        let other = Self::decode_with(text, self.hasher)?;
        self.merge(&other)
    }

    pub fn convert_to_string(&self) -> String {
        STANDARD.encode(self.bits.as_bytes())
    }

    /// The text carries bits only; the result always uses `k = 3`.
    pub fn convert_string_to_filter(text: &str, capacity: usize) -> Result<Self> {
        Self::decode_with(text, KeyHasher::new(capacity, DEFAULT_HASH_FUNCTIONS))
    }

    fn decode_with(text: &str, hasher: KeyHasher) -> Result<Self> {
        let bytes = STANDARD.decode(text.trim())?;
        let byte_count = bytes.len();
        let bits = BitSet::from_bytes(hasher.capacity(), bytes).ok_or_else(|| {
            decode_error!(
                "{} bytes do not encode a filter of {} bits",
                byte_count,
                hasher.capacity()
            )
        })?;
        Ok(Self { hasher, bits })
    }
}

/// `ceil(-n * ln(p) / (ln 2)^2)`
pub fn optimal_capacity(expected_items: usize, fail_rate: f64) -> usize {
    let ln2 = std::f64::consts::LN_2;
    (-(expected_items as f64) * fail_rate.ln() / (ln2 * ln2)).ceil() as usize
}

#[cfg(test)]
mod tests {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    use super::*;

    fn filter() -> BloomFilter {
        BloomFilter::new_by_fail_rate(1000, 0.01)
    }

    #[test]
    fn new_fixes_shape() {
        let bf = BloomFilter::new(1000, 3);
        assert_eq!(bf.capacity(), 1000);
        assert_eq!(bf.hash_count(), 3);
        assert_eq!(bf.bits().count_ones(), 0);
    }

    #[test]
    fn new_by_fail_rate_sizes_filter() {
        let bf = filter();
        assert_eq!(bf.capacity(), 9586);
        assert_eq!(bf.hash_count(), DEFAULT_HASH_FUNCTIONS);
        assert_eq!(filter().capacity(), bf.capacity());
    }

    #[test]
    fn add_then_has_returns_same_positions() {
        let mut bf = filter();
        let (added, add_positions) = bf.add_key(b"TestKey");
        let (present, has_positions) = bf.has_key(b"TestKey");
        assert!(added);
        assert!(present);
        assert_eq!(add_positions, has_positions);
        assert_eq!(add_positions.len(), 3);
        assert_eq!(bf.hash_key(b"TestKey"), add_positions);
    }

    #[test]
    fn empty_filter_has_no_keys() {
        let bf = filter();
        let (present, positions) = bf.has_key(b"TestKey");
        assert!(!present);
        assert_eq!(positions.len(), 3);
    }

    #[test]
    fn hash_key_does_not_mutate() {
        let bf = filter();
        let _ = bf.hash_key(b"key");
        assert_eq!(bf, filter());
    }

    fn measured_false_positive_rate(bf: &BloomFilter, trials: usize) -> f64 {
        let mut rng = rand::thread_rng();
        let false_positives = (0..trials)
            .filter(|_| {
                let key: String = (&mut rng)
                    .sample_iter(&Alphanumeric)
                    .take(24)
                    .map(char::from)
                    .collect();
                bf.has_key(format!("absent-{}", key).as_bytes()).0
            })
            .count();
        false_positives as f64 / trials as f64
    }

    #[test]
    fn absent_keys_rarely_test_positive() {
        let mut bf = filter();
        for i in 0..500 {
            bf.add_key(format!("inserted-{}", i).as_bytes());
        }
        let rate = measured_false_positive_rate(&bf, 20_000);
        assert!(rate <= 0.01, "false positive rate {} above target", rate);
    }

    #[test]
    fn false_positive_rate_at_full_load() {
        let mut bf = filter();
        for i in 0..1000 {
            bf.add_key(format!("inserted-{}", i).as_bytes());
        }
        // k is fixed at 3, so a full filter sits near 2% rather than the 1% target
        let rate = measured_false_positive_rate(&bf, 10_000);
        assert!(rate < 0.03, "false positive rate {} too high", rate);
        let estimate = bf.estimated_false_positive_rate();
        assert!(estimate > 0.01 && estimate < 0.03);
    }

    #[test]
    fn round_trip_empty_filter() {
        let bf = filter();
        let text = bf.convert_to_string();
        let decoded = BloomFilter::convert_string_to_filter(&text, bf.capacity()).unwrap();
        assert_eq!(decoded.bits(), bf.bits());
    }

    #[test]
    fn round_trip_with_contained_values() {
        let mut bf = filter();
        for key in ["keyalksdjfl", "key1", "key2", "key3", "key4"] {
            bf.add_key(key.as_bytes());
        }
        let text = bf.convert_to_string();
        let decoded = BloomFilter::convert_string_to_filter(&text, bf.capacity()).unwrap();
        assert!(decoded.has_key(b"key1").0);
        assert_eq!(decoded.bits(), bf.bits());
    }

    #[test]
    fn decode_rejects_bad_input() {
        let bf = filter();
        let text = bf.convert_to_string();
        assert!(matches!(
            BloomFilter::convert_string_to_filter(&text, bf.capacity() + 64),
            Err(crate::error::CacheError::Decode(_))
        ));
        assert!(matches!(
            BloomFilter::convert_string_to_filter("not base64!!", bf.capacity()),
            Err(crate::error::CacheError::Decode(_))
        ));
    }

    #[test]
    fn merge_serialized_folds_in_peer_bits() {
        let mut local = filter();
        let mut remote = filter();
        remote.add_key(b"remote-key");
        local.add_key(b"local-key");
        local.merge_serialized(&remote.convert_to_string()).unwrap();
        assert!(local.has_key(b"remote-key").0);
        assert!(local.has_key(b"local-key").0);

        let mut small = BloomFilter::new(64, 3);
        assert!(small.merge(&remote).is_err());
    }

    #[test]
    fn merge_serialized_keeps_custom_hash_count() {
        let mut local = BloomFilter::new(256, 5);
        let mut remote = BloomFilter::new(256, 5);
        remote.add_key(b"remote-key");
        local.merge_serialized(&remote.convert_to_string()).unwrap();
        assert_eq!(local.hash_count(), 5);
        assert!(local.has_key(b"remote-key").0);
    }
}
