//! Per-order record layouts.
//!
//! Middle orders store `word | weights(prob, backoff) | next`, the longest
//! order stores `word | weights(prob)`. Each array has one extra record at
//! the end whose `next` field closes the child range of the last real
//! record.

use super::range::TrieRange;
use crate::bits::{BitArray, required_bits};

/// Field widths shared by both record shapes.
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    /// Bit offset of this order's array inside the trie payload
    pub base_bit: u64,
    pub word_bits: u32,
    /// Width of the whole record
    pub total_bits: u32,
    /// Number of real records
    pub entries: u32,
}

impl RecordLayout {
    fn record_bit(&self, idx: u32) -> u64 {
        self.base_bit + idx as u64 * self.total_bits as u64
    }

    pub fn read_word(&self, bits: &BitArray, idx: u32) -> u32 {
        bits.read(self.record_bit(idx), self.word_bits) as u32
    }

    /// Absolute bit offset of the weights of record `idx`.
    pub fn weights_bit(&self, idx: u32) -> u64 {
        self.record_bit(idx) + self.word_bits as u64
    }

    /// Binary-search `word_id` inside `range`, which must already lie
    /// within `[0, entries]`. Returns the record index on a hit.
    pub fn find(&self, bits: &BitArray, word_id: u32, range: &TrieRange) -> Option<u32> {
        let mut lo = range.begin;
        let mut hi = range.end.min(self.entries);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let word = self.read_word(bits, mid);
            match word.cmp(&word_id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Size in bytes of the array: `entries + 1` records rounded up to
    /// whole bytes, plus 8 bytes so a 64-bit read never runs off the end.
    pub fn byte_len(&self) -> usize {
        ((self.entries as u64 + 1) * self.total_bits as u64).div_ceil(8) as usize + 8
    }
}

/// A middle order: records carry a backoff and a pointer to their children.
#[derive(Debug, Clone, Copy)]
pub struct MiddleSet {
    pub layout: RecordLayout,
    pub quant_bits: u32,
    pub next_bits: u32,
}

impl MiddleSet {
    pub fn new(base_bit: u64, word_bits: u32, quant_bits: u32, entries: u32, max_next: u32) -> Self {
        let next_bits = required_bits(max_next as u64);
        Self {
            layout: RecordLayout {
                base_bit,
                word_bits,
                total_bits: word_bits + quant_bits + next_bits,
                entries,
            },
            quant_bits,
            next_bits,
        }
    }

    fn read_next(&self, bits: &BitArray, idx: u32) -> u32 {
        let offset = self.layout.weights_bit(idx) + self.quant_bits as u64;
        bits.read(offset, self.next_bits) as u32
    }

    /// Child range of record `idx` in the next order's array.
    pub fn next_range(&self, bits: &BitArray, idx: u32) -> TrieRange {
        TrieRange::new(self.read_next(bits, idx), self.read_next(bits, idx + 1))
    }
}

/// The highest order: probability only, no children.
#[derive(Debug, Clone, Copy)]
pub struct LongestSet {
    pub layout: RecordLayout,
}

impl LongestSet {
    pub fn new(base_bit: u64, word_bits: u32, quant_bits: u32, entries: u32) -> Self {
        Self {
            layout: RecordLayout {
                base_bit,
                word_bits,
                total_bits: word_bits + quant_bits,
                entries,
            },
        }
    }
}

/// Record view of one order of the trie.
#[derive(Debug, Clone, Copy)]
pub enum NgramSet {
    Middle(MiddleSet),
    Longest(LongestSet),
}

impl NgramSet {
    pub fn layout(&self) -> &RecordLayout {
        match self {
            NgramSet::Middle(set) => &set.layout,
            NgramSet::Longest(set) => &set.layout,
        }
    }

    pub fn has_backoff(&self) -> bool {
        matches!(self, NgramSet::Middle(_))
    }

    /// Look `word_id` up inside `range`.
    ///
    /// On a hit returns the record index and, for middle orders, narrows
    /// `range` to the record's children. On a miss (or an empty range)
    /// clears `range.found` and leaves the bounds untouched.
    pub fn descend(&self, bits: &BitArray, word_id: u32, range: &mut TrieRange) -> Option<u32> {
        let Some(idx) = self.layout().find(bits, word_id, range) else {
            range.miss();
            return None;
        };
        range.found = true;
        if let NgramSet::Middle(set) = self {
            let found = set.next_range(bits, idx);
            range.begin = found.begin;
            range.end = found.end;
        }
        Some(idx)
    }
}
