//! Expiration schedule: an array-backed min-heap ordered by `expires_at`.
use chrono::{DateTime, Utc};

use crate::error::{CacheError, Result};
use crate::settings::DEFAULT_SCHEDULE_CAPACITY;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleNode {
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

impl ScheduleNode {
    pub fn new(key: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            expires_at,
        }
    }
}

/// Parent `expires_at` is never later than either child's.
/// Backing capacity doubles when full and never shrinks.
#[derive(Clone, Debug)]
pub struct ExpirationSchedule {
    tree: Vec<ScheduleNode>,
    capacity: usize,
}

impl Default for ExpirationSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpirationSchedule {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCHEDULE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tree: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn insert(&mut self, node: ScheduleNode) {
        if self.tree.len() == self.capacity {
            self.grow();
        }
        self.tree.push(node);
        self.sift_up(self.tree.len() - 1);
    }

    /// Node at heap-array position `index`; only index 0 is guaranteed minimal
    pub fn peek(&self, index: usize) -> Result<&ScheduleNode> {
        self.tree.get(index).ok_or(CacheError::OutOfRange {
            index,
            len: self.tree.len(),
        })
    }

    pub fn peek_min(&self) -> Option<&ScheduleNode> {
        self.tree.first()
    }

    pub fn pop_min(&mut self) -> Option<ScheduleNode> {
        if self.tree.is_empty() {
            return None;
        }
        let last = self.tree.len() - 1;
        self.tree.swap(0, last);
        let min = self.tree.pop();
        if !self.tree.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// Pop every node with `expires_at <= as_of`, earliest first
    pub fn pop_expired(&mut self, as_of: DateTime<Utc>) -> Vec<ScheduleNode> {
        let mut expired = Vec::new();
        while self
            .peek_min()
            .is_some_and(|node| node.expires_at <= as_of)
        {
            if let Some(node) = self.pop_min() {
                expired.push(node);
            }
        }
        expired
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity * 2;
        self.tree.reserve_exact(new_capacity - self.tree.len());
        self.capacity = new_capacity;
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.tree[index].expires_at >= self.tree[parent].expires_at {
                break;
            }
            self.tree.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.tree.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.tree[left].expires_at < self.tree[smallest].expires_at {
                smallest = left;
            }
            if right < len && self.tree[right].expires_at < self.tree[smallest].expires_at {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.tree.swap(index, smallest);
            index = smallest;
        }
    }
}
