//! Streaming reader for the binary trie language model format.
//!
//! Format (all multi-byte fields little-endian):
//! ```text
//! [19B] magic "Trie Language Model"
//! [1B]  order
//! [4B × order] n-gram counts (u32), counts[0] = vocabulary size
//! if order > 1:
//!   [4B] quantization type (0 = none, 1 = 16-bit)
//!   if 16-bit, for each i in 2..=order:
//!     [4B × 65536] probability table (f32)
//!     [4B × 65536] backoff table (f32), omitted when i == order
//! [12B × (counts[0] + 1)] unigrams: prob (f32), backoff (f32), next (u32)
//! if order > 1:
//!   [N B] trie payload, N derived from counts and record widths
//! [4B] vocabulary byte length (u32)
//! [len B] NUL-terminated UTF-8 words, counts[0] of them
//! ```

use std::io::Read;

use crate::error::LoadError;
use crate::quant::{QUANT16_TABLE_LEN, QuantType, Quantizer};
use crate::trie::{NgramTrie, check_counts};

type Result<T> = std::result::Result<T, LoadError>;

/// File magic.
pub const MAGIC: &[u8; 19] = b"Trie Language Model";

/// Guard against absurd vocabulary blocks in corrupt files (1 GiB).
const MAX_WORDS_LEN: usize = 1 << 30;

/// A unigram record. `next` is the first order-2 child; the child range of
/// word `i` is `[unigrams[i].next, unigrams[i + 1].next)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unigram {
    pub prob: f32,
    pub backoff: f32,
    pub next: u32,
}

/// Everything a binary model file contains.
#[derive(Debug)]
pub struct ModelData {
    pub counts: Vec<u32>,
    pub quant: Quantizer,
    /// `counts[0] + 1` records, the last being the sentinel
    pub unigrams: Vec<Unigram>,
    /// Present when the model has order 2 or higher
    pub trie: Option<NgramTrie>,
    pub words: Vec<String>,
}

/// Forward-only reader over a binary model stream.
pub struct BinaryLoader<R> {
    reader: R,
}

impl<R: Read> BinaryLoader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the whole model in file order.
    pub fn read_model(mut self) -> Result<ModelData> {
        self.verify_header()?;
        let counts = self.read_counts()?;
        check_counts(&counts)?;
        let order = counts.len();

        let quant = if order > 1 {
            self.read_quant(order)?
        } else {
            Quantizer::None
        };

        let unigrams = self.read_unigrams(counts[0])?;

        let trie = if order > 1 {
            let mut trie = NgramTrie::with_counts(&counts, &quant)?;
            self.read_trie_bytes(trie.mem_mut())?;
            Some(trie)
        } else {
            None
        };

        let words = self.read_words(counts[0] as usize)?;

        Ok(ModelData {
            counts,
            quant,
            unigrams,
            trie,
            words,
        })
    }

    /// Check the leading magic bytes.
    pub fn verify_header(&mut self) -> Result<()> {
        let mut magic = [0u8; MAGIC.len()];
        let mut filled = 0;
        while filled < magic.len() {
            match self.reader.read(&mut magic[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if &magic[..filled] != MAGIC.as_slice() {
            return Err(LoadError::BadHeader {
                found: String::from_utf8_lossy(&magic[..filled]).into_owned(),
            });
        }
        Ok(())
    }

    /// Read the order byte and one count per order.
    pub fn read_counts(&mut self) -> Result<Vec<u32>> {
        let order = self.read_u8()? as usize;
        if order == 0 {
            return Err(LoadError::Format("model order is 0".to_string()));
        }
        (0..order).map(|_| self.read_u32()).collect()
    }

    /// Read the quantization selector and, for 16-bit quantization, the
    /// decode tables of orders `2..=order`.
    pub fn read_quant(&mut self, order: usize) -> Result<Quantizer> {
        let code = self.read_u32()?;
        let quant_type = QuantType::try_from(code).map_err(LoadError::UnknownQuantType)?;
        match quant_type {
            QuantType::None => Ok(Quantizer::None),
            QuantType::Quant16 => {
                let mut tables = Vec::with_capacity(Quantizer::table_count(order));
                for i in 2..=order {
                    tables.push(self.read_f32_vec(QUANT16_TABLE_LEN)?);
                    if i < order {
                        tables.push(self.read_f32_vec(QUANT16_TABLE_LEN)?);
                    }
                }
                Ok(Quantizer::Quant16 { tables })
            }
        }
    }

    /// Read `count + 1` unigram records.
    pub fn read_unigrams(&mut self, count: u32) -> Result<Vec<Unigram>> {
        // Grown while reading so a lying count fails at end of input
        let mut unigrams = Vec::new();
        for _ in 0..=count {
            let prob = self.read_f32()?;
            let backoff = self.read_f32()?;
            let next = self.read_u32()?;
            unigrams.push(Unigram {
                prob,
                backoff,
                next,
            });
        }
        Ok(unigrams)
    }

    /// Fill `buf` verbatim with the trie payload.
    pub fn read_trie_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        Ok(())
    }

    /// Read the length-prefixed block of `n` NUL-terminated words.
    pub fn read_words(&mut self, n: usize) -> Result<Vec<String>> {
        let len = self.read_u32()? as usize;
        if len > MAX_WORDS_LEN {
            return Err(LoadError::Format(format!(
                "vocabulary block too large: {len} bytes (max {MAX_WORDS_LEN})"
            )));
        }
        let mut bytes = Vec::new();
        (&mut self.reader).take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        let terminators = bytes.iter().filter(|&&b| b == 0).count();
        if terminators != n {
            return Err(LoadError::VocabularyMismatch {
                expected: n,
                found: terminators,
            });
        }

        let mut words = Vec::with_capacity(n);
        // The block ends with a terminator, so the final split is empty
        for raw in bytes.split(|&b| b == 0).take(n) {
            words.push(std::str::from_utf8(raw)?.to_string());
        }
        Ok(words)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_f32_vec(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut bytes = vec![0u8; len * 4];
        self.reader.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
