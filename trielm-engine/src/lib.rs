pub mod bits;
pub mod config;
pub mod error;
pub mod lexicon;
pub mod loader;
pub mod log_math;
pub mod model;
pub mod quant;
pub mod trie;
pub mod writer;

pub use config::{ModelConfig, Settings};
pub use error::{LoadError, QueryError, WriteError};
pub use lexicon::{Lexicon, Word};
pub use loader::{BinaryLoader, ModelData, Unigram};
pub use log_math::LogMath;
pub use model::{
    CacheStats, NgramLookup, NgramTrieModel, UNKNOWN_WORD_ID, WordId, WordSequence,
};
pub use quant::{QuantType, Quantizer};
pub use trie::{NgramTrie, TrieRange};
pub use writer::TrieModelWriter;
