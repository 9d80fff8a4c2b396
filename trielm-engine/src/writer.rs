//! Writer for the binary trie language model format.
//!
//! Collects unigrams and higher-order n-grams with their log probabilities
//! and backoffs, then lays them out as the reversed, sorted, bit-packed trie
//! that [`BinaryLoader`](crate::loader::BinaryLoader) reads.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bits::BitWriter;
use crate::error::WriteError;
use crate::loader::MAGIC;
use crate::model::WordId;
use crate::quant::{QuantType, Quantizer, build_table};
use crate::trie::{NgramSet, plan_layout};

type Result<T> = std::result::Result<T, WriteError>;

struct Entry {
    words: Vec<String>,
    prob: f32,
    backoff: f32,
}

/// One record of an order, keyed by its word ids in reverse order
/// (predicted word first).
struct Record {
    key: Vec<WordId>,
    prob: f32,
    backoff: f32,
}

/// Builds a binary trie language model in memory.
pub struct TrieModelWriter {
    order: usize,
    words: Vec<String>,
    word_ids: HashMap<String, WordId>,
    unigrams: Vec<(f32, f32)>,
    ngrams: Vec<Entry>,
}

impl TrieModelWriter {
    /// Start a model of the given order (1 = unigrams only).
    pub fn new(order: usize) -> Self {
        Self {
            order,
            words: Vec::new(),
            word_ids: HashMap::new(),
            unigrams: Vec::new(),
            ngrams: Vec::new(),
        }
    }

    /// Add a vocabulary word. Re-adding a word replaces its weights.
    pub fn add_unigram(&mut self, word: &str, prob: f32, backoff: f32) -> WordId {
        if let Some(&id) = self.word_ids.get(word) {
            self.unigrams[id as usize] = (prob, backoff);
            return id;
        }
        let id = self.words.len() as WordId;
        self.words.push(word.to_string());
        self.word_ids.insert(word.to_string(), id);
        self.unigrams.push((prob, backoff));
        id
    }

    /// Add an n-gram of order 2 or more, oldest word first. The backoff is
    /// ignored for the highest order.
    pub fn add_ngram<S: AsRef<str>>(&mut self, words: &[S], prob: f32, backoff: f32) {
        self.ngrams.push(Entry {
            words: words.iter().map(|w| w.as_ref().to_string()).collect(),
            prob,
            backoff,
        });
    }

    pub fn save(&self, path: impl AsRef<Path>, quant_type: QuantType) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut w = BufWriter::new(file);
        self.write_to(&mut w, quant_type)?;
        w.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self, quant_type: QuantType) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out, quant_type)?;
        Ok(out)
    }

    pub fn write_to(&self, w: &mut impl Write, quant_type: QuantType) -> Result<()> {
        if self.order == 0 || self.order > u8::MAX as usize {
            return Err(WriteError::Invalid(format!("unsupported order {}", self.order)));
        }
        if let Some(word) = self.words.iter().find(|w| w.as_bytes().contains(&0)) {
            return Err(WriteError::NulInWord(word.clone()));
        }

        let orders = self.sorted_records()?;
        let parents = self.parent_indices(&orders)?;

        let vocab = self.words.len();
        let mut counts = vec![vocab as u32];
        counts.extend(orders.iter().map(|records| records.len() as u32));

        let quant = self.quantizer(quant_type, &orders);

        // Unigram child pointers into order 2
        let unigram_next = match parents.first() {
            Some(p) => next_pointers(p, vocab),
            None => vec![0; vocab + 1],
        };

        w.write_all(MAGIC)?;
        w.write_all(&[self.order as u8])?;
        for count in &counts {
            w.write_all(&count.to_le_bytes())?;
        }

        if self.order > 1 {
            w.write_all(&quant_type.code().to_le_bytes())?;
            if let Quantizer::Quant16 { tables } = &quant {
                for table in tables {
                    for v in table {
                        w.write_all(&v.to_le_bytes())?;
                    }
                }
            }
        }

        for (i, next) in unigram_next.iter().enumerate() {
            let (prob, backoff) = self.unigrams.get(i).copied().unwrap_or((0.0, 0.0));
            w.write_all(&prob.to_le_bytes())?;
            w.write_all(&backoff.to_le_bytes())?;
            w.write_all(&next.to_le_bytes())?;
        }

        if self.order > 1 {
            let payload = self.pack_trie(&counts, &quant, &orders, &parents)?;
            w.write_all(&payload)?;
        }

        let words_len: usize = self.words.iter().map(|s| s.len() + 1).sum();
        w.write_all(&(words_len as u32).to_le_bytes())?;
        for word in &self.words {
            w.write_all(word.as_bytes())?;
            w.write_all(&[0])?;
        }
        Ok(())
    }

    /// Records of orders `2..=order`, each sorted by reversed key so that
    /// children of one parent are contiguous and ordered by word id.
    fn sorted_records(&self) -> Result<Vec<Vec<Record>>> {
        let mut orders: Vec<Vec<Record>> = (2..=self.order).map(|_| Vec::new()).collect();
        for entry in &self.ngrams {
            let n = entry.words.len();
            if n < 2 || n > self.order {
                return Err(WriteError::BadOrder(entry.words.clone()));
            }
            let key = entry
                .words
                .iter()
                .rev()
                .map(|w| {
                    self.word_ids
                        .get(w)
                        .copied()
                        .ok_or_else(|| WriteError::UnknownWord(w.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            orders[n - 2].push(Record {
                key,
                prob: entry.prob,
                backoff: entry.backoff,
            });
        }
        for records in &mut orders {
            records.sort_by(|a, b| a.key.cmp(&b.key));
            records.dedup_by(|b, a| a.key == b.key);
        }
        Ok(orders)
    }

    /// Index of every record's parent in the previous order (the unigram id
    /// for order 2).
    fn parent_indices(&self, orders: &[Vec<Record>]) -> Result<Vec<Vec<u32>>> {
        let mut parents = Vec::with_capacity(orders.len());
        for (i, records) in orders.iter().enumerate() {
            let mut order_parents = Vec::with_capacity(records.len());
            for record in records {
                let parent_key = &record.key[..record.key.len() - 1];
                let parent = if i == 0 {
                    parent_key[0]
                } else {
                    orders[i - 1]
                        .binary_search_by(|r| r.key.as_slice().cmp(parent_key))
                        .map_err(|_| WriteError::MissingSuffix(self.spell(&record.key)))?
                        as u32
                };
                order_parents.push(parent);
            }
            parents.push(order_parents);
        }
        Ok(parents)
    }

    fn quantizer(&self, quant_type: QuantType, orders: &[Vec<Record>]) -> Quantizer {
        match quant_type {
            QuantType::None => Quantizer::None,
            QuantType::Quant16 => {
                let mut tables = Vec::with_capacity(Quantizer::table_count(self.order));
                for (i, records) in orders.iter().enumerate() {
                    let probs: Vec<f32> = records.iter().map(|r| r.prob).collect();
                    tables.push(build_table(&probs));
                    if i + 1 < orders.len() {
                        let backoffs: Vec<f32> = records.iter().map(|r| r.backoff).collect();
                        tables.push(build_table(&backoffs));
                    }
                }
                Quantizer::Quant16 { tables }
            }
        }
    }

    fn pack_trie(
        &self,
        counts: &[u32],
        quant: &Quantizer,
        orders: &[Vec<Record>],
        parents: &[Vec<u32>],
    ) -> Result<Vec<u8>> {
        let (sets, len) =
            plan_layout(counts, quant).map_err(|e| WriteError::Invalid(e.to_string()))?;
        let mut out = BitWriter::with_len(len);

        for (i, (set, records)) in sets.iter().zip(orders).enumerate() {
            let layout = set.layout();
            let children = match (set, parents.get(i + 1)) {
                (NgramSet::Middle(_), Some(child_parents)) => {
                    Some(next_pointers(child_parents, records.len()))
                }
                _ => None,
            };

            for (j, record) in records.iter().enumerate() {
                let start = layout.base_bit + j as u64 * layout.total_bits as u64;
                let word = record.key[record.key.len() - 1];
                out.write(start, layout.word_bits, word as u64);
                let backoff = set.has_backoff().then_some(record.backoff);
                quant.write_weights(
                    &mut out,
                    start + layout.word_bits as u64,
                    i,
                    record.prob,
                    backoff,
                );
            }

            if let (NgramSet::Middle(middle), Some(next)) = (set, children) {
                for (j, ptr) in next.iter().enumerate() {
                    let start = layout.base_bit + j as u64 * layout.total_bits as u64;
                    let offset = start + layout.word_bits as u64 + middle.quant_bits as u64;
                    out.write(offset, middle.next_bits, *ptr as u64);
                }
            }
        }

        let mut bytes = out.into_bytes();
        bytes.resize(len, 0);
        Ok(bytes)
    }

    fn spell(&self, key: &[WordId]) -> Vec<String> {
        key.iter()
            .rev()
            .map(|&id| self.words[id as usize].clone())
            .collect()
    }
}

/// Given the (sorted) parent index of every child record, return for each
/// of `parent_count + 1` parents the index of its first child.
fn next_pointers(child_parents: &[u32], parent_count: usize) -> Vec<u32> {
    let mut next = Vec::with_capacity(parent_count + 1);
    let mut child = 0usize;
    for parent in 0..=parent_count {
        while child < child_parents.len() && (child_parents[child] as usize) < parent {
            child += 1;
        }
        next.push(child as u32);
    }
    next
}
