//! Bit-level access to the packed trie payload.
//!
//! Bit `b` of an array lives in byte `b / 8` at position `b % 8`
//! (least-significant bit first). A field of width `w` starting at bit `b`
//! is read as a little-endian `u64` from byte `b / 8`, shifted right by
//! `b % 8` and masked to `w` bits. Fields are therefore limited to 57 bits,
//! which comfortably covers every record field in the format (at most 32).

/// Number of bits needed to represent `max_value`.
///
/// `required_bits(0) == 0`, `required_bits(1) == 1`, `required_bits(255) == 8`,
/// `required_bits(256) == 9`.
pub fn required_bits(max_value: u64) -> u32 {
    u64::BITS - max_value.leading_zeros()
}

/// Mask selecting the low `bits` bits.
pub fn mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Read-only view over an owned, bit-packed byte buffer.
#[derive(Debug, Clone, Default)]
pub struct BitArray {
    mem: Vec<u8>,
}

impl BitArray {
    /// Allocate a zeroed buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self { mem: vec![0u8; len] }
    }

    pub fn from_bytes(mem: Vec<u8>) -> Self {
        Self { mem }
    }

    /// Mutable access for the loader to fill the buffer in place.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Read `bits` bits starting at absolute bit offset `bit_offset`.
    ///
    /// Bytes past the end of the buffer read as zero, so a truncated or
    /// corrupt payload yields garbage values instead of a panic.
    pub fn read(&self, bit_offset: u64, bits: u32) -> u64 {
        let idx = (bit_offset >> 3) as usize;
        let mut word = [0u8; 8];
        if idx < self.mem.len() {
            let end = (idx + 8).min(self.mem.len());
            word[..end - idx].copy_from_slice(&self.mem[idx..end]);
        }
        (u64::from_le_bytes(word) >> (bit_offset & 7)) & mask(bits)
    }

    /// Read a 32-bit float stored verbatim.
    pub fn read_f32(&self, bit_offset: u64) -> f32 {
        f32::from_bits(self.read(bit_offset, 32) as u32)
    }

    /// Read a 31-bit float whose sign bit was dropped on write; the result
    /// is always non-positive.
    pub fn read_non_positive_f32(&self, bit_offset: u64) -> f32 {
        f32::from_bits(self.read(bit_offset, 31) as u32 | 0x8000_0000)
    }
}

/// Writes bit fields into a growable byte buffer using the same layout
/// [`BitArray`] reads.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    mem: Vec<u8>,
}

impl BitWriter {
    /// Create a writer over a zeroed buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self { mem: vec![0u8; len] }
    }

    /// OR `value` (truncated to `bits` bits) into the buffer at `bit_offset`.
    ///
    /// The target bits must still be zero; the buffer grows as needed.
    pub fn write(&mut self, bit_offset: u64, bits: u32, value: u64) {
        let shift = bit_offset & 7;
        let mut idx = (bit_offset >> 3) as usize;
        let mut remaining = (value & mask(bits)) << shift;
        let mut pending = bits as u64 + shift;
        while pending > 0 {
            if idx >= self.mem.len() {
                self.mem.resize(idx + 1, 0);
            }
            self.mem[idx] |= (remaining & 0xff) as u8;
            remaining >>= 8;
            idx += 1;
            pending = pending.saturating_sub(8);
        }
    }

    pub fn write_f32(&mut self, bit_offset: u64, value: f32) {
        self.write(bit_offset, 32, value.to_bits() as u64);
    }

    /// Write the low 31 bits of a non-positive float.
    pub fn write_non_positive_f32(&mut self, bit_offset: u64, value: f32) {
        self.write(bit_offset, 31, (value.to_bits() & 0x7fff_ffff) as u64);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.mem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_bits() {
        assert_eq!(required_bits(0), 0);
        assert_eq!(required_bits(1), 1);
        assert_eq!(required_bits(2), 2);
        assert_eq!(required_bits(3), 2);
        assert_eq!(required_bits(4), 3);
        assert_eq!(required_bits(255), 8);
        assert_eq!(required_bits(256), 9);
        assert_eq!(required_bits((1 << 25) - 1), 25);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(1), 1);
        assert_eq!(mask(16), 0xffff);
        assert_eq!(mask(64), u64::MAX);
    }

    #[test]
    fn test_lsb_first_layout() {
        let mut w = BitWriter::with_len(4);
        w.write(0, 3, 0b101);
        w.write(3, 5, 0b11001);
        w.write(8, 4, 0xf);
        let bytes = w.into_bytes();
        assert_eq!(bytes[0], 0b1100_1101);
        assert_eq!(bytes[1], 0x0f);
    }

    #[test]
    fn test_unaligned_fields() {
        let mut w = BitWriter::with_len(16);
        w.write(5, 25, 0x1ab_cdef);
        w.write(30, 7, 0x55);
        w.write(37, 16, 0xbeef);
        let arr = BitArray::from_bytes(w.into_bytes());
        assert_eq!(arr.read(5, 25), 0x1ab_cdef);
        assert_eq!(arr.read(30, 7), 0x55);
        assert_eq!(arr.read(37, 16), 0xbeef);
    }

    #[test]
    fn test_floats() {
        let mut w = BitWriter::with_len(16);
        w.write_non_positive_f32(3, -0.3);
        w.write_f32(34, -1.25);
        let arr = BitArray::from_bytes(w.into_bytes());
        assert_eq!(arr.read_non_positive_f32(3), -0.3);
        assert_eq!(arr.read_f32(34), -1.25);
    }

    #[test]
    fn test_zero_prob_reads_negative_zero() {
        let mut w = BitWriter::with_len(8);
        w.write_non_positive_f32(0, 0.0);
        let arr = BitArray::from_bytes(w.into_bytes());
        let v = arr.read_non_positive_f32(0);
        assert_eq!(v, 0.0);
        assert!(v.is_sign_negative());
    }

    #[test]
    fn test_read_past_end_is_zero() {
        let arr = BitArray::from_bytes(vec![0xff, 0xff]);
        assert_eq!(arr.read(8, 16), 0xff);
        assert_eq!(arr.read(64, 8), 0);
    }

    #[test]
    fn test_writer_grows() {
        let mut w = BitWriter::default();
        w.write(70, 10, 0x3ff);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(BitArray::from_bytes(bytes).read(70, 10), 0x3ff);
    }
}
