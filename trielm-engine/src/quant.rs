//! Probability and backoff quantization.
//!
//! Middle-order records carry probability and backoff weights, top-order
//! records carry only a probability. The quantizer decides how many bits
//! those weights take and how they decode:
//!
//! | variant   | middle weights                      | top weights   |
//! |-----------|-------------------------------------|---------------|
//! | `None`    | prob (31-bit float) + backoff (f32) | prob (31-bit) |
//! | `Quant16` | backoff idx (16) + prob idx (16)    | prob idx (16) |

use crate::bits::{BitArray, BitWriter};

/// Index width of [`Quantizer::Quant16`] tables.
pub const QUANT16_BITS: u32 = 16;

/// Entries per [`Quantizer::Quant16`] table.
pub const QUANT16_TABLE_LEN: usize = 1 << QUANT16_BITS;

/// On-disk quantization selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    None,
    Quant16,
}

impl QuantType {
    pub fn code(self) -> u32 {
        match self {
            QuantType::None => 0,
            QuantType::Quant16 => 1,
        }
    }
}

impl TryFrom<u32> for QuantType {
    type Error = u32;

    fn try_from(code: u32) -> std::result::Result<Self, u32> {
        match code {
            0 => Ok(QuantType::None),
            1 => Ok(QuantType::Quant16),
            other => Err(other),
        }
    }
}

/// Weight codec shared by every order of one model.
#[derive(Debug, Clone)]
pub enum Quantizer {
    /// Raw floats.
    None,
    /// 16-bit indices into per-order decode tables.
    ///
    /// `tables[2 * (order - 2)]` decodes probabilities of `order`,
    /// `tables[2 * (order - 2) + 1]` its backoffs. The highest order has no
    /// backoff table, so there are `2 * (max_order - 1) - 1` tables.
    Quant16 { tables: Vec<Vec<f32>> },
}

impl Quantizer {
    pub fn quant_type(&self) -> QuantType {
        match self {
            Quantizer::None => QuantType::None,
            Quantizer::Quant16 { .. } => QuantType::Quant16,
        }
    }

    /// Bits of weights in a middle-order record (probability + backoff).
    pub fn prob_backoff_bits(&self) -> u32 {
        match self {
            Quantizer::None => 63,
            Quantizer::Quant16 { .. } => 2 * QUANT16_BITS,
        }
    }

    /// Bits of weights in a top-order record (probability only).
    pub fn prob_bits(&self) -> u32 {
        match self {
            Quantizer::None => 31,
            Quantizer::Quant16 { .. } => QUANT16_BITS,
        }
    }

    /// Number of decode tables a Quant16 model of `max_order` carries.
    pub fn table_count(max_order: usize) -> usize {
        if max_order < 2 {
            0
        } else {
            2 * (max_order - 1) - 1
        }
    }

    /// Decode the probability of a record whose weights start at
    /// `bit_offset`. `has_backoff` is false only for the top order.
    pub fn read_prob(
        &self,
        bits: &BitArray,
        bit_offset: u64,
        order_minus_two: usize,
        has_backoff: bool,
    ) -> f32 {
        match self {
            Quantizer::None => bits.read_non_positive_f32(bit_offset),
            Quantizer::Quant16 { tables } => {
                let offset = if has_backoff {
                    bit_offset + QUANT16_BITS as u64
                } else {
                    bit_offset
                };
                let idx = bits.read(offset, QUANT16_BITS) as usize;
                decode(tables, 2 * order_minus_two, idx)
            }
        }
    }

    /// Decode the backoff of a middle-order record whose weights start at
    /// `bit_offset`.
    pub fn read_backoff(&self, bits: &BitArray, bit_offset: u64, order_minus_two: usize) -> f32 {
        match self {
            Quantizer::None => bits.read_f32(bit_offset + 31),
            Quantizer::Quant16 { tables } => {
                let idx = bits.read(bit_offset, QUANT16_BITS) as usize;
                decode(tables, 2 * order_minus_two + 1, idx)
            }
        }
    }

    /// Encode weights for one record. `backoff` is `None` for top-order
    /// records.
    pub fn write_weights(
        &self,
        out: &mut BitWriter,
        bit_offset: u64,
        order_minus_two: usize,
        prob: f32,
        backoff: Option<f32>,
    ) {
        match self {
            Quantizer::None => {
                out.write_non_positive_f32(bit_offset, prob);
                if let Some(backoff) = backoff {
                    out.write_f32(bit_offset + 31, backoff);
                }
            }
            Quantizer::Quant16 { tables } => {
                let prob_idx = encode(&tables[2 * order_minus_two], prob) as u64;
                match backoff {
                    Some(backoff) => {
                        let bo_idx = encode(&tables[2 * order_minus_two + 1], backoff) as u64;
                        out.write(bit_offset, QUANT16_BITS, bo_idx);
                        out.write(bit_offset + QUANT16_BITS as u64, QUANT16_BITS, prob_idx);
                    }
                    None => out.write(bit_offset, QUANT16_BITS, prob_idx),
                }
            }
        }
    }
}

fn decode(tables: &[Vec<f32>], table_idx: usize, idx: usize) -> f32 {
    tables
        .get(table_idx)
        .and_then(|t| t.get(idx))
        .copied()
        .unwrap_or(0.0)
}

/// Index of the table entry closest to `value`. Tables are sorted
/// ascending by construction.
fn encode(table: &[f32], value: f32) -> usize {
    let pos = table.partition_point(|&v| v < value);
    if pos == 0 {
        return 0;
    }
    if pos == table.len() {
        return table.len() - 1;
    }
    if (value - table[pos - 1]).abs() <= (table[pos] - value).abs() {
        pos - 1
    } else {
        pos
    }
}

/// Build a sorted decode table of exactly [`QUANT16_TABLE_LEN`] entries.
///
/// When `values` has at most that many distinct floats every value is
/// represented exactly; otherwise the sorted values are split into
/// equal-population bins and each bin is represented by its mean.
pub fn build_table(values: &[f32]) -> Vec<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f32::total_cmp);
    sorted.dedup_by(|a, b| a.to_bits() == b.to_bits());

    let mut table = if sorted.len() <= QUANT16_TABLE_LEN {
        sorted
    } else {
        let n = sorted.len();
        (0..QUANT16_TABLE_LEN)
            .map(|bin| {
                let start = bin * n / QUANT16_TABLE_LEN;
                let end = ((bin + 1) * n / QUANT16_TABLE_LEN).max(start + 1);
                let sum: f64 = sorted[start..end].iter().map(|&v| v as f64).sum();
                (sum / (end - start) as f64) as f32
            })
            .collect()
    };

    let fill = table.last().copied().unwrap_or(0.0);
    table.resize(QUANT16_TABLE_LEN, fill);
    table
}
