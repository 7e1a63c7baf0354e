//! Ranked membership-count queries.
//!
//! For each query term the engine probes one signature row per hash
//! function, ANDs the k row buffers, and adds the surviving bits into a
//! per-column count vector 64 columns at a word. Counts from all sub-indices
//! merge into one ranked result.

use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use crate::backend::{BackendKind, IndexBackend};
use crate::check_cancelled;
use crate::error::Result;
use crate::extract::KmerExtractor;
use crate::format::IndexHeader;
use crate::hashing::{fnv1a, HashFamily};

/// Terms probed per backend round-trip; bounds probe buffer memory at
/// `k * TERM_BATCH * stride` bytes.
const TERM_BATCH: usize = 1024;

/// Columns per fork-join task in the accumulation loop (multiple of 64 so
/// tasks own whole words).
const COLS_PER_TASK: usize = 1 << 14;

/// One ranked result: a document name and how many query terms hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHit {
    pub name: String,
    pub count: u32,
}

/// Query engine over an opened index; holds the chosen backend by value.
#[derive(Debug)]
pub struct QueryEngine {
    backend: IndexBackend,
    hasher: HashFamily,
}

impl QueryEngine {
    pub fn open(path: &Path, kind: BackendKind, ring_capacity: usize) -> Result<Self> {
        let backend = IndexBackend::open(path, kind, ring_capacity)?;
        Ok(QueryEngine {
            backend,
            hasher: fnv1a,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.backend.layout().header
    }

    /// Count, rank and return the top `top` documents containing the query's
    /// terms, dropping counts below `min_count`. With a name filter, whole
    /// sub-indices disjoint from it are never probed.
    pub fn query(
        &mut self,
        sequence: &[u8],
        top: usize,
        min_count: u32,
        name_filter: Option<&HashSet<String>>,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<QueryHit>> {
        let header = self.header().clone();
        let extractor = KmerExtractor::new(header.term_size as usize, header.canonical)?;
        let terms = extractor.unique_terms(sequence);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // (count, column order in the whole index, name)
        let mut ranked: Vec<(u32, usize, String)> = Vec::new();
        let mut column_base = 0usize;
        for (s, sub) in header.subs.iter().enumerate() {
            let skip = name_filter
                .is_some_and(|filter| !sub.columns.iter().any(|name| filter.contains(name)));
            if !skip {
                let counts = self.count_sub_index(s, sub.sig_size, sub.num_hashes, &terms, cancel)?;
                for (c, (&count, name)) in counts.iter().zip(&sub.columns).enumerate() {
                    let wanted = name_filter.is_none_or(|filter| filter.contains(name));
                    if wanted && count >= min_count {
                        ranked.push((count, column_base + c, name.clone()));
                    }
                }
            }
            column_base += sub.columns.len();
        }

        // Descending by count, ties by column order.
        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.truncate(top);
        Ok(ranked
            .into_iter()
            .map(|(count, _, name)| QueryHit { name, count })
            .collect())
    }

    /// Per-column hit counts of one sub-index.
    fn count_sub_index(
        &mut self,
        s: usize,
        sig_size: u64,
        num_hashes: u16,
        terms: &[Vec<u8>],
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<u32>> {
        let stride = self.backend.layout().row_stride(s);
        let columns = self.backend.layout().header.subs[s].columns.len();
        let row_width = columns.div_ceil(8);
        let mut counts = vec![0u32; columns];

        let mut rows = Vec::with_capacity(TERM_BATCH);
        let mut buffers: Vec<Vec<u8>> = (0..num_hashes as usize)
            .map(|_| vec![0u8; TERM_BATCH * stride])
            .collect();

        for batch in terms.chunks(TERM_BATCH) {
            // One probe per (hash function, term batch) pair.
            for (seed, buffer) in buffers.iter_mut().enumerate() {
                check_cancelled(cancel)?;
                rows.clear();
                rows.extend(
                    batch
                        .iter()
                        .map(|term| (self.hasher)(term, seed as u64) % sig_size),
                );
                self.backend
                    .probe(s, &rows, &mut buffer[..batch.len() * stride])?;
            }
            accumulate(&mut counts, &buffers, batch.len(), stride, row_width);
        }
        Ok(counts)
    }
}

/// AND the k row buffers of every term and add surviving bits into
/// `counts`. Tasks own disjoint column ranges, so no synchronization is
/// needed in the hot loop.
fn accumulate(
    counts: &mut [u32],
    buffers: &[Vec<u8>],
    batch_len: usize,
    stride: usize,
    row_width: usize,
) {
    counts
        .par_chunks_mut(COLS_PER_TASK)
        .enumerate()
        .for_each(|(task, chunk)| {
            let first_word = task * COLS_PER_TASK / 64;
            let words = chunk.len().div_ceil(64);
            for term in 0..batch_len {
                for w in first_word..first_word + words {
                    let mut acc = u64::MAX;
                    for buffer in buffers {
                        acc &= load_word(&buffer[term * stride..][..row_width], w);
                        if acc == 0 {
                            break;
                        }
                    }
                    let mut bits = acc;
                    while bits != 0 {
                        let col = w * 64 + bits.trailing_zeros() as usize;
                        chunk[col - task * COLS_PER_TASK] += 1;
                        bits &= bits - 1;
                    }
                }
            }
        });
}

/// 64-bit little-endian word `w` of a packed row, zero-padded past the end.
#[inline]
fn load_word(row: &[u8], w: usize) -> u64 {
    let start = w * 8;
    if start + 8 <= row.len() {
        u64::from_le_bytes(row[start..start + 8].try_into().unwrap())
    } else if start < row.len() {
        let mut tail = [0u8; 8];
        tail[..row.len() - start].copy_from_slice(&row[start..]);
        u64::from_le_bytes(tail)
    } else {
        0
    }
}
