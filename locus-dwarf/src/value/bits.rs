//! Bit-level helpers shared by values and composite locations

use gimli::RunTimeEndian;
use std::ops::Range;

#[inline]
fn bit_mask(bit: u64, big_endian: bool) -> u8 {
    let within = (bit % 8) as u8;
    if big_endian {
        0x80 >> within
    } else {
        1 << within
    }
}

/// Copy `nbits` bits from `source` starting at bit `source_offset` into
/// `dest` starting at bit `dest_offset`.
///
/// With `bits_big_endian` bit 0 of a byte is its most significant bit.
pub fn copy_bitwise(
    dest: &mut [u8],
    dest_offset: u64,
    source: &[u8],
    source_offset: u64,
    nbits: u64,
    bits_big_endian: bool,
) {
    if dest_offset % 8 == 0 && source_offset % 8 == 0 && nbits % 8 == 0 {
        let d = (dest_offset / 8) as usize;
        let s = (source_offset / 8) as usize;
        let n = (nbits / 8) as usize;
        dest[d..d + n].copy_from_slice(&source[s..s + n]);
        return;
    }

    for i in 0..nbits {
        let src_bit = source_offset + i;
        let dst_bit = dest_offset + i;
        let set = source[(src_bit / 8) as usize] & bit_mask(src_bit, bits_big_endian) != 0;
        let byte = &mut dest[(dst_bit / 8) as usize];
        let mask = bit_mask(dst_bit, bits_big_endian);
        if set {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

/// Number of bytes touched by `n_bits` bits starting at bit `start`
pub fn bits_to_bytes(start: u64, n_bits: u64) -> usize {
    ((start % 8 + n_bits + 7) / 8) as usize
}

/// Read an unsigned integer of up to 16 bytes
pub fn extract_unsigned(bytes: &[u8], endian: RunTimeEndian) -> u128 {
    let fold = |acc: u128, b: &u8| (acc << 8) | u128::from(*b);
    match endian {
        RunTimeEndian::Big => bytes.iter().fold(0, fold),
        RunTimeEndian::Little => bytes.iter().rev().fold(0, fold),
    }
}

/// Read a two's complement integer of up to 16 bytes, sign-extended
pub fn extract_signed(bytes: &[u8], endian: RunTimeEndian) -> i128 {
    let raw = extract_unsigned(bytes, endian);
    sign_extend(raw, bytes.len() * 8)
}

pub fn sign_extend(raw: u128, bits: usize) -> i128 {
    if bits == 0 || bits >= 128 {
        return raw as i128;
    }
    let shift = 128 - bits;
    ((raw << shift) as i128) >> shift
}

/// Write the low `buf.len()` bytes of `value`
pub fn store_unsigned(buf: &mut [u8], endian: RunTimeEndian, value: u128) {
    let len = buf.len();
    for (i, byte) in buf.iter_mut().enumerate() {
        let shift = match endian {
            RunTimeEndian::Little => i,
            RunTimeEndian::Big => len - 1 - i,
        };
        *byte = if shift < 16 {
            (value >> (shift * 8)) as u8
        } else {
            0
        };
    }
}

/// Sorted, coalesced set of bit ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitRanges {
    ranges: Vec<Range<u64>>,
}

impl BitRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<u64>> {
        self.ranges.iter()
    }

    pub fn insert(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        let mut new = offset..offset + length;
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end < new.start || r.start > new.end {
                kept.push(r);
            } else {
                new = new.start.min(r.start)..new.end.max(r.end);
            }
        }
        kept.push(new);
        kept.sort_by_key(|r| r.start);
        self.ranges = kept;
    }

    /// Any bit of `[offset, offset + length)` is in the set
    pub fn overlaps(&self, offset: u64, length: u64) -> bool {
        let end = offset + length;
        self.ranges
            .iter()
            .any(|r| r.start < end && offset < r.end)
    }

    /// Every bit of `[offset, offset + length)` is in the set
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        let end = offset + length;
        self.ranges
            .iter()
            .any(|r| r.start <= offset && end <= r.end)
    }

    /// Ranges intersecting `[offset, offset + length)`, rebased to `dest`
    pub fn copy_into(&self, target: &mut BitRanges, dest: u64, offset: u64, length: u64) {
        let end = offset + length;
        for r in &self.ranges {
            let start = r.start.max(offset);
            let stop = r.end.min(end);
            if start < stop {
                target.insert(dest + (start - offset), stop - start);
            }
        }
    }
}
