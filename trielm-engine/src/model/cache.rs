//! LRU cache of max-order probabilities.

use std::collections::{BTreeMap, HashMap};

use super::sequence::WordSequence;

/// Hit/miss counters and occupancy of a [`ProbabilityCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Fixed-capacity LRU map from word sequences to scores.
///
/// Recency is a monotonically increasing stamp; `order` maps stamps back to
/// keys so the oldest entry is the first one in the tree.
#[derive(Debug)]
pub struct ProbabilityCache {
    capacity: usize,
    map: HashMap<WordSequence, (f32, u64)>,
    order: BTreeMap<u64, WordSequence>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl ProbabilityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look `key` up, counting the hit or miss and refreshing recency.
    pub fn get(&mut self, key: &WordSequence) -> Option<f32> {
        let tick = self.next_tick();
        match self.map.get_mut(key) {
            Some((value, stamp)) => {
                self.order.remove(stamp);
                *stamp = tick;
                self.order.insert(tick, key.clone());
                self.hits += 1;
                Some(*value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: WordSequence, value: f32) {
        if self.capacity == 0 {
            return;
        }
        let tick = self.next_tick();
        if let Some((old_value, stamp)) = self.map.get_mut(&key) {
            self.order.remove(stamp);
            *old_value = value;
            *stamp = tick;
            self.order.insert(tick, key);
            return;
        }

        self.order.insert(tick, key.clone());
        self.map.insert(key, (value, tick));
        while self.map.len() > self.capacity {
            let Some((_, evicted)) = self.order.pop_first() else {
                break;
            };
            self.map.remove(&evicted);
        }
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.map.len(),
            capacity: self.capacity,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
