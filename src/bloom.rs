//! Per-document Bloom filters.
//!
//! One filter per document column; the signature matrix is their transpose.
//! Bits live in u64 words; the bit order within a row byte matches the
//! on-disk layout (little-endian within byte).

use crate::error::{Result, SignetError};
use crate::hashing::HashFamily;

/// Minimum signature size handed out by the sizing formula. Degenerate
/// documents still get a usable filter.
const MIN_BITS: u64 = 64;

/// An m-bit Bloom filter with k hash functions. `m % 8 == 0` always holds.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u16,
    hasher: HashFamily,
}

impl BloomFilter {
    pub fn new(num_bits: u64, num_hashes: u16, hasher: HashFamily) -> Result<Self> {
        if num_bits == 0 || num_bits % 8 != 0 {
            return Err(SignetError::validation(format!(
                "signature size must be a nonzero multiple of 8 (got {})",
                num_bits
            )));
        }
        if num_hashes == 0 {
            return Err(SignetError::validation("number of hashes must be nonzero"));
        }
        let words = (num_bits as usize).div_ceil(64);
        Ok(BloomFilter {
            bits: vec![0u64; words],
            num_bits,
            num_hashes,
            hasher,
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u16 {
        self.num_hashes
    }

    /// Set the k bits of `term`.
    #[inline]
    pub fn insert(&mut self, term: &[u8]) {
        for seed in 0..self.num_hashes as u64 {
            let row = (self.hasher)(term, seed) % self.num_bits;
            self.bits[(row / 64) as usize] |= 1u64 << (row % 64);
        }
    }

    /// True iff all k bits of `term` are set. No false negatives.
    #[inline]
    pub fn contains(&self, term: &[u8]) -> bool {
        (0..self.num_hashes as u64).all(|seed| {
            let row = (self.hasher)(term, seed) % self.num_bits;
            self.bits[(row / 64) as usize] & (1u64 << (row % 64)) != 0
        })
    }

    /// Bit at position `row`, the document's cell of signature row `row`.
    #[inline]
    pub fn bit(&self, row: u64) -> bool {
        debug_assert!(row < self.num_bits);
        self.bits[(row / 64) as usize] & (1u64 << (row % 64)) != 0
    }

    /// Count of set bits; diagnostic only.
    pub fn occupancy(&self) -> u64 {
        self.bits.iter().map(|w| w.count_ones() as u64).sum()
    }
}

/// Bits required to hold `num_terms` entries at false-positive rate `p`
/// with `k` hashes: `m = ceil(-n·k / ln(1 − p^{1/k}))`, rounded up to a
/// multiple of 8.
pub fn required_bits(num_terms: u64, num_hashes: u16, false_positive_rate: f64) -> u64 {
    let k = num_hashes as f64;
    let denominator = (1.0 - false_positive_rate.powf(1.0 / k)).ln();
    let bits = (-(num_terms as f64) * k / denominator).ceil() as u64;
    bits.max(MIN_BITS).next_multiple_of(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::fnv1a;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(512, 3, fnv1a).unwrap();
        let terms: Vec<Vec<u8>> = (0..50u32)
            .map(|i| format!("TERM{:04}", i).into_bytes())
            .collect();
        for term in &terms {
            filter.insert(term);
        }
        for term in &terms {
            assert!(filter.contains(term));
        }
    }

    #[test]
    fn test_empty_filter_contains_nothing_surely() {
        let filter = BloomFilter::new(64, 2, fnv1a).unwrap();
        assert!(!filter.contains(b"ACG"));
        assert_eq!(filter.occupancy(), 0);
    }

    #[test]
    fn test_bit_positions_match_hash_family() {
        let mut filter = BloomFilter::new(64, 2, fnv1a).unwrap();
        filter.insert(b"ACG");
        for seed in 0..2 {
            assert!(filter.bit(fnv1a(b"ACG", seed) % 64));
        }
        assert_eq!(filter.occupancy() as usize, {
            let a = fnv1a(b"ACG", 0) % 64;
            let b = fnv1a(b"ACG", 1) % 64;
            if a == b {
                1
            } else {
                2
            }
        });
    }

    #[test]
    fn test_rejects_unaligned_size() {
        assert!(BloomFilter::new(63, 2, fnv1a).is_err());
        assert!(BloomFilter::new(0, 2, fnv1a).is_err());
        assert!(BloomFilter::new(64, 0, fnv1a).is_err());
    }

    #[test]
    fn test_required_bits_monotone_in_terms() {
        let small = required_bits(1_000, 3, 0.01);
        let large = required_bits(10_000, 3, 0.01);
        assert!(large > small);
        assert_eq!(small % 8, 0);
        assert_eq!(large % 8, 0);
    }

    #[test]
    fn test_required_bits_tighter_rate_needs_more() {
        assert!(required_bits(10_000, 3, 0.001) > required_bits(10_000, 3, 0.1));
    }

    #[test]
    fn test_required_bits_floor() {
        assert_eq!(required_bits(0, 3, 0.01), 64);
        assert_eq!(required_bits(1, 3, 0.5), 64);
    }

    #[test]
    fn test_false_positive_rate_in_range() {
        // 1000 terms at the size the formula prescribes for p=0.01 should
        // show roughly that rate against fresh terms.
        let m = required_bits(1000, 4, 0.01);
        let mut filter = BloomFilter::new(m, 4, fnv1a).unwrap();
        for i in 0..1000u32 {
            filter.insert(format!("IN{:06}", i).as_bytes());
        }
        let mut hits = 0;
        for i in 0..10_000u32 {
            if filter.contains(format!("OUT{:06}", i).as_bytes()) {
                hits += 1;
            }
        }
        assert!(hits < 300, "false-positive rate too high: {}/10000", hits);
    }
}
