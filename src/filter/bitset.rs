/// Fixed-length bit array packed LSB-first into bytes.
///
/// Bits are only ever set; there is no clear operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet {
    len: usize,
    bytes: Vec<u8>,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            bytes: vec![0u8; byte_len(len)],
        }
    }

    /// Rebuild from packed bytes. Returns None when the byte count does not
    /// match `len` or a padding bit past `len` is set.
    pub fn from_bytes(len: usize, bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() != byte_len(len) {
            return None;
        }
        let tail = len % 8;
        if tail != 0 {
            let padding_mask = !((1u8 << tail) - 1);
            if bytes[bytes.len() - 1] & padding_mask != 0 {
                return None;
            }
        }
        Some(Self { len, bytes })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Set bit `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.bytes[index / 8] |= 1u8 << (index % 8);
        }
    }

    pub fn test(&self, index: usize) -> bool {
        index < self.len && self.bytes[index / 8] & (1u8 << (index % 8)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// OR `other` into self; both must have the same length
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        if self.len != other.len {
            return false;
        }
        for (mine, theirs) in self.bytes.iter_mut().zip(other.bytes.iter()) {
            *mine |= *theirs;
        }
        true
    }

    /// Positions of all set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes
            .iter()
            .enumerate()
            .filter(|(_, byte)| **byte != 0)
            .flat_map(|(i, byte)| {
                (0..8)
                    .filter(move |bit| byte & (1u8 << bit) != 0)
                    .map(move |bit| i * 8 + bit)
            })
    }
}

fn byte_len(bits: usize) -> usize {
    bits.div_ceil(8)
}
