//! Bit-packed trie over n-grams of order 2 and above.
//!
//! The trie is reversed: order-2 records hang off the unigram of the *last*
//! word and each deeper order adds one word further back in the context.
//! Every order is a flat array sorted by word id inside each parent's
//! child range, so a lookup is a binary search over that range.

mod range;
mod set;

pub use range::TrieRange;
pub use set::{LongestSet, MiddleSet, NgramSet, RecordLayout};

use crate::bits::{BitArray, required_bits};
use crate::error::LoadError;
use crate::quant::Quantizer;

/// Word ids and child pointers are bounded to this many bits.
pub const MAX_POINTER_BITS: u32 = 25;

/// Upper bound (exclusive) on `entries + 1` for any order.
pub const MAX_ORDER_ENTRIES: u64 = 1 << MAX_POINTER_BITS;

/// The packed records of orders `2..=max_order` in one byte buffer.
#[derive(Debug, Clone)]
pub struct NgramTrie {
    bits: BitArray,
    /// Indexed by `order - 2`; the last one is [`NgramSet::Longest`].
    sets: Vec<NgramSet>,
}

/// Check `counts` against the 25-bit word id and pointer budget.
///
/// Runs before anything sized by the counts is allocated.
pub fn check_counts(counts: &[u32]) -> Result<(), LoadError> {
    let Some(&vocab) = counts.first() else {
        return Err(LoadError::Format("no n-gram counts".to_string()));
    };
    if required_bits(vocab as u64) > MAX_POINTER_BITS {
        return Err(LoadError::VocabularyTooLarge(vocab as u64));
    }
    for (i, &entries) in counts.iter().enumerate().skip(1) {
        if entries as u64 + 1 >= MAX_ORDER_ENTRIES {
            return Err(LoadError::TooManyNgrams {
                order: i + 1,
                count: entries as u64,
                max: MAX_ORDER_ENTRIES - 2,
            });
        }
    }
    Ok(())
}

/// Compute record views and total payload size for `counts`.
pub fn plan_layout(counts: &[u32], quant: &Quantizer) -> Result<(Vec<NgramSet>, usize), LoadError> {
    check_counts(counts)?;
    let word_bits = required_bits(counts[0] as u64);

    let max_order = counts.len();
    let mut sets = Vec::with_capacity(max_order.saturating_sub(1));
    let mut byte_offset = 0usize;
    for order in 2..=max_order {
        let entries = counts[order - 1];
        let base_bit = byte_offset as u64 * 8;
        let set = if order == max_order {
            NgramSet::Longest(LongestSet::new(base_bit, word_bits, quant.prob_bits(), entries))
        } else {
            let max_next = counts[order];
            NgramSet::Middle(MiddleSet::new(
                base_bit,
                word_bits,
                quant.prob_backoff_bits(),
                entries,
                max_next,
            ))
        };
        byte_offset += set.layout().byte_len();
        sets.push(set);
    }
    Ok((sets, byte_offset))
}

impl NgramTrie {
    /// Allocate a zeroed trie sized for `counts`, ready to be filled by the
    /// loader.
    pub fn with_counts(counts: &[u32], quant: &Quantizer) -> Result<Self, LoadError> {
        let (sets, len) = plan_layout(counts, quant)?;
        Ok(Self {
            bits: BitArray::zeroed(len),
            sets,
        })
    }

    /// Buffer the loader copies the on-disk payload into.
    pub fn mem_mut(&mut self) -> &mut [u8] {
        self.bits.as_mut_bytes()
    }

    pub fn byte_len(&self) -> usize {
        self.bits.len()
    }

    pub fn max_order(&self) -> usize {
        self.sets.len() + 1
    }

    pub fn set(&self, order_minus_two: usize) -> Option<&NgramSet> {
        self.sets.get(order_minus_two)
    }

    /// Descend one order: look `word_id` up in `range` (a range of the
    /// order `order_minus_two + 2` array) and return its probability.
    ///
    /// On a miss `range.found` is cleared and `0.0` is returned; callers
    /// must check `found` before using the value.
    pub fn read_prob(
        &self,
        word_id: u32,
        order_minus_two: usize,
        range: &mut TrieRange,
        quant: &Quantizer,
    ) -> f32 {
        let Some(set) = self.sets.get(order_minus_two) else {
            range.miss();
            return 0.0;
        };
        match set.descend(&self.bits, word_id, range) {
            Some(idx) => quant.read_prob(
                &self.bits,
                set.layout().weights_bit(idx),
                order_minus_two,
                set.has_backoff(),
            ),
            None => 0.0,
        }
    }

    /// Like [`read_prob`](Self::read_prob) but returns the backoff weight.
    /// The longest order has no backoff and always reports a miss.
    pub fn read_backoff(
        &self,
        word_id: u32,
        order_minus_two: usize,
        range: &mut TrieRange,
        quant: &Quantizer,
    ) -> f32 {
        let Some(set) = self.sets.get(order_minus_two).filter(|s| s.has_backoff()) else {
            range.miss();
            return 0.0;
        };
        match set.descend(&self.bits, word_id, range) {
            Some(idx) => quant.read_backoff(&self.bits, set.layout().weights_bit(idx), order_minus_two),
            None => 0.0,
        }
    }
}
