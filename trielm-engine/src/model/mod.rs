//! Query engine over a loaded trie language model.
//!
//! A query walks the trie from the unigram of the predicted word back
//! through its context, one order per word, keeping the deepest
//! probability it finds. When the full n-gram is missing the backoff
//! weights of the matched contexts are added on top (log domain).

mod cache;
mod sequence;

pub use cache::{CacheStats, ProbabilityCache};
pub use sequence::{UNKNOWN_WORD_ID, WordId, WordSequence};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{LoadError, QueryError};
use crate::lexicon::Lexicon;
use crate::loader::{BinaryLoader, ModelData, Unigram};
use crate::log_math::LogMath;
use crate::quant::{QuantType, Quantizer};
use crate::trie::{NgramTrie, TrieRange};

/// Spellings treated as the unknown-word token.
const UNK_SPELLINGS: [&str; 2] = ["<unk>", "<UNK>"];

/// Raw result of a trie lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NgramLookup {
    /// Log probability including any backoff, before weights are applied
    pub log_prob: f32,
    /// Length of the longest suffix found in the model (0 for an unknown
    /// predicted word)
    pub depth: usize,
}

/// Mutable per-model query state.
struct QueryState {
    cache: ProbabilityCache,
    query_log: Option<BufWriter<File>>,
}

/// Binary trie n-gram language model.
///
/// Everything except the probability cache and the query log is immutable
/// after loading, and those two sit behind a mutex, so one model can be
/// shared between decoder threads.
pub struct NgramTrieModel {
    counts: Vec<u32>,
    max_depth: usize,
    quant: Quantizer,
    unigrams: Vec<Unigram>,
    trie: Option<NgramTrie>,
    words: Vec<String>,
    word_ids: HashMap<String, WordId>,
    /// Id substituted for out-of-vocabulary words
    unknown_id: WordId,
    apply_weights: bool,
    language_weight: f32,
    log_wip: f32,
    clear_cache_after_utterance: bool,
    /// Query words not found in the vocabulary since the last utterance end
    missing_words: AtomicU64,
    state: Mutex<QueryState>,
}

impl NgramTrieModel {
    /// Load the model named by `config.model_path`.
    pub fn load(config: &ModelConfig) -> Result<Self, LoadError> {
        let file = File::open(&config.model_path)?;
        let model = Self::from_reader(BufReader::new(file), config)?;
        info!(
            "Loaded {}-gram trie language model from {:?}",
            model.order(),
            config.model_path
        );
        Ok(model)
    }

    /// Load a model from any byte stream.
    pub fn from_reader(reader: impl Read, config: &ModelConfig) -> Result<Self, LoadError> {
        let data = BinaryLoader::new(reader).read_model()?;
        Self::from_data(data, config)
    }

    /// Build the query engine over already deserialized model data.
    pub fn from_data(data: ModelData, config: &ModelConfig) -> Result<Self, LoadError> {
        let ModelData {
            counts,
            quant,
            unigrams,
            trie,
            words,
        } = data;

        let order = counts.len();
        let max_depth = match config.max_depth {
            None => order,
            Some(d) if (1..=order).contains(&d) => d,
            Some(d) => {
                return Err(LoadError::InvalidMaxDepth {
                    requested: d,
                    order,
                });
            }
        };

        if unigrams.len() != counts[0] as usize + 1 {
            return Err(LoadError::Format(format!(
                "expected {} unigram records, found {}",
                counts[0] as usize + 1,
                unigrams.len()
            )));
        }
        if words.len() != counts[0] as usize {
            return Err(LoadError::VocabularyMismatch {
                expected: counts[0] as usize,
                found: words.len(),
            });
        }

        let mut word_ids = HashMap::with_capacity(words.len());
        for (id, word) in words.iter().enumerate() {
            word_ids.entry(word.clone()).or_insert(id as WordId);
        }
        let unknown_id = UNK_SPELLINGS
            .iter()
            .find_map(|s| word_ids.get(*s).copied())
            .unwrap_or(UNKNOWN_WORD_ID);

        let query_log = match &config.query_log {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };

        let log_math = LogMath::new(config.log_base);
        debug!(
            "Trie LM counts {:?}, quantization {:?}, max depth {}",
            counts,
            quant.quant_type(),
            max_depth
        );

        Ok(Self {
            counts,
            max_depth,
            quant,
            unigrams,
            trie,
            words,
            word_ids,
            unknown_id,
            apply_weights: config.apply_language_weight_and_wip,
            language_weight: config.language_weight,
            log_wip: log_math.linear_to_log(config.word_insertion_probability),
            clear_cache_after_utterance: config.clear_cache_after_utterance,
            missing_words: AtomicU64::new(0),
            state: Mutex::new(QueryState {
                cache: ProbabilityCache::new(config.cache_capacity),
                query_log,
            }),
        })
    }

    /// Order declared by the model file.
    pub fn order(&self) -> usize {
        self.counts.len()
    }

    /// Longest sequence accepted by queries.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn quant_type(&self) -> QuantType {
        self.quant.quant_type()
    }

    /// Size of the packed trie payload in bytes.
    pub fn trie_bytes(&self) -> usize {
        self.trie.as_ref().map_or(0, NgramTrie::byte_len)
    }

    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    pub fn word_id(&self, spelling: &str) -> Option<WordId> {
        self.word_ids.get(spelling).copied()
    }

    pub fn spelling(&self, id: WordId) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn unigram(&self, id: WordId) -> Option<&Unigram> {
        if (id as usize) < self.words.len() {
            self.unigrams.get(id as usize)
        } else {
            None
        }
    }

    /// Count model words the lexicon cannot resolve.
    ///
    /// Such words can still be scored but the decoder will never
    /// hypothesize them.
    pub fn check_lexicon(&self, lexicon: &dyn Lexicon) -> usize {
        let mut missing = 0;
        for word in &self.words {
            if lexicon.get_word(word).is_none() {
                debug!("The dictionary is missing a phonetic transcription for '{}'", word);
                missing += 1;
            }
        }
        if missing > 0 {
            warn!(
                "Dictionary is missing {} words that are contained in the language model",
                missing
            );
        }
        missing
    }

    /// Resolve spellings to ids. Words outside the vocabulary become
    /// `<unk>` when the model has it and [`UNKNOWN_WORD_ID`] otherwise.
    pub fn word_sequence<S: AsRef<str>>(&self, words: &[S]) -> WordSequence {
        let ids: Vec<WordId> = words
            .iter()
            .map(|w| {
                let w = w.as_ref();
                self.word_id(w).unwrap_or_else(|| {
                    debug!("Word '{}' is not in the language model vocabulary", w);
                    self.missing_words.fetch_add(1, Ordering::Relaxed);
                    self.unknown_id
                })
            })
            .collect();
        WordSequence::from(ids)
    }

    /// Score `words` (most recent last). See [`probability_of`](Self::probability_of).
    pub fn probability<S: AsRef<str>>(&self, words: &[S]) -> Result<f32, QueryError> {
        self.probability_of(&self.word_sequence(words))
    }

    /// Log probability of the last word given the others, with weights
    /// applied when configured.
    ///
    /// Max-order sequences are served from and stored in the cache.
    pub fn probability_of(&self, sequence: &WordSequence) -> Result<f32, QueryError> {
        self.check_len(sequence)?;
        let cacheable = sequence.len() == self.max_depth;

        let cached = if cacheable {
            self.state().cache.get(sequence)
        } else {
            None
        };
        let score = match cached {
            Some(score) => score,
            None => self.apply_weights(self.lookup_ids(sequence.ids()).log_prob),
        };

        let mut state = self.state();
        if cacheable && cached.is_none() {
            state.cache.insert(sequence.clone(), score);
        }
        if let Some(log) = state.query_log.as_mut() {
            let text = self.sequence_text(sequence);
            if let Err(e) = writeln!(log, "{} : {}", text, score) {
                warn!("Failed to write query log: {}", e);
            }
        }
        Ok(score)
    }

    /// Uncached, unweighted lookup reporting the matched depth.
    pub fn lookup(&self, sequence: &WordSequence) -> Result<NgramLookup, QueryError> {
        self.check_len(sequence)?;
        Ok(self.lookup_ids(sequence.ids()))
    }

    /// Utterance boundary: report statistics and optionally drop the cache.
    pub fn on_utterance_end(&self) {
        let missing = self.missing_words.swap(0, Ordering::Relaxed);
        if missing > 0 {
            warn!(
                "{} query words were missing from the language model vocabulary",
                missing
            );
        }

        let mut state = self.state();
        let stats = state.cache.stats();
        debug!(
            "LM cache: {} hits, {} misses, {} of {} entries",
            stats.hits, stats.misses, stats.len, stats.capacity
        );
        if self.clear_cache_after_utterance {
            state.cache.clear();
        }
        if let Some(log) = state.query_log.as_mut()
            && let Err(e) = writeln!(log, "<END_UTT>").and_then(|_| log.flush())
        {
            warn!("Failed to write query log: {}", e);
        }
    }

    pub fn clear_cache(&self) {
        self.state().cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.state().cache.stats()
    }

    fn state(&self) -> MutexGuard<'_, QueryState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_len(&self, sequence: &WordSequence) -> Result<(), QueryError> {
        if sequence.is_empty() {
            return Err(QueryError::EmptySequence);
        }
        if sequence.len() > self.max_depth {
            return Err(QueryError::OrderTooHigh {
                requested: sequence.len(),
                max_depth: self.max_depth,
            });
        }
        Ok(())
    }

    fn apply_weights(&self, score: f32) -> f32 {
        if self.apply_weights {
            (score * self.language_weight + self.log_wip).max(LogMath::LOG_ZERO)
        } else {
            score
        }
    }

    /// Order-2 child range of a word, empty for unknown ids.
    fn child_range(&self, id: WordId) -> TrieRange {
        match (self.unigram(id), self.unigrams.get(id as usize + 1)) {
            (Some(cur), Some(next)) => TrieRange::new(cur.next, next.next),
            _ => TrieRange::new(0, 0),
        }
    }

    /// `ids` is non-empty and no longer than `max_depth`.
    fn lookup_ids(&self, ids: &[WordId]) -> NgramLookup {
        let n = ids.len();
        let last = ids[n - 1];
        let Some(unigram) = self.unigram(last) else {
            return NgramLookup {
                log_prob: LogMath::LOG_ZERO,
                depth: 0,
            };
        };

        let mut prob = unigram.prob;
        let mut depth = 1;
        if n == 1 {
            return NgramLookup {
                log_prob: prob,
                depth,
            };
        }

        if let Some(trie) = &self.trie {
            let mut range = self.child_range(last);
            for (order_minus_two, &word) in ids[..n - 1].iter().rev().enumerate() {
                if !range.is_searchable() {
                    break;
                }
                let found = trie.read_prob(word, order_minus_two, &mut range, &self.quant);
                if !range.found {
                    break;
                }
                prob = found;
                depth += 1;
            }
        }

        if depth < n {
            prob += self.context_backoff(ids, depth);
        }
        NgramLookup {
            log_prob: prob,
            depth,
        }
    }

    /// Sum of backoff weights of the contexts of `ids` whose length is at
    /// least `depth`, i.e. every context the matched suffix backed off
    /// from. Contexts missing from the model contribute nothing.
    fn context_backoff(&self, ids: &[WordId], depth: usize) -> f32 {
        let n = ids.len();
        let context_word = ids[n - 2];
        let mut backoff = 0.0;

        if depth == 1
            && let Some(unigram) = self.unigram(context_word)
        {
            backoff += unigram.backoff;
        }

        let Some(trie) = &self.trie else {
            return backoff;
        };
        let mut range = self.child_range(context_word);
        for (order_minus_two, &word) in ids[..n - 2].iter().rev().enumerate() {
            if !range.is_searchable() {
                break;
            }
            let weight = trie.read_backoff(word, order_minus_two, &mut range, &self.quant);
            if !range.found {
                break;
            }
            // This context has order_minus_two + 2 words
            if order_minus_two + 2 >= depth {
                backoff += weight;
            }
        }
        backoff
    }

    fn sequence_text(&self, sequence: &WordSequence) -> String {
        sequence
            .ids()
            .iter()
            .map(|&id| self.spelling(id).unwrap_or("<UNKNOWN>"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
