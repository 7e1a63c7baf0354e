//! Hierarchical block merging.
//!
//! Level L blocks are combined `fan_in` at a time into level L+1 blocks by
//! row-wise column concatenation until one block remains. Column order at
//! every level is the concatenation of input orders; a level's inputs are
//! deleted once the next level is complete.

use rayon::prelude::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::check_cancelled;
use crate::classic::ClassicReader;
use crate::error::{Result, SignetError};
use crate::format::{IndexHeader, SubIndexMeta};
use crate::progress::{ProgressEvent, ProgressSink};

// Rows handled per read/concatenate/write cycle.
const ROW_CHUNK: usize = 512;

/// Concatenate the columns of `inputs` (in order) into one block at
/// `output`. All inputs must share signature size, hash count and term
/// parameters. A failed merge unlinks the partial output.
pub fn merge_blocks(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let result = merge_blocks_inner(inputs, output);
    if result.is_err() {
        fs::remove_file(output).ok();
    }
    result
}

fn merge_blocks_inner(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let mut readers = inputs
        .iter()
        .map(|p| ClassicReader::open(p))
        .collect::<Result<Vec<_>>>()?;
    let first = readers
        .first()
        .ok_or_else(|| SignetError::validation("merge needs at least one input block"))?;

    let sig_size = first.sub().sig_size;
    let num_hashes = first.sub().num_hashes;
    let term_size = first.header().term_size;
    let canonical = first.header().canonical;
    for reader in &readers {
        let sub = reader.sub();
        if sub.sig_size != sig_size
            || sub.num_hashes != num_hashes
            || reader.header().term_size != term_size
            || reader.header().canonical != canonical
        {
            return Err(SignetError::validation(
                "cannot merge blocks with differing parameters",
            ));
        }
    }
    let widths: Vec<usize> = readers.iter().map(|r| r.row_width()).collect();
    // Bit offset of each input's first column in the merged row. Inputs with
    // byte-aligned offsets concatenate by memcpy; the rest are shifted in.
    let mut bit_offsets = Vec::with_capacity(readers.len());
    let mut total_columns = 0usize;
    for reader in &readers {
        bit_offsets.push(total_columns);
        total_columns += reader.sub().columns.len();
    }
    let out_width = total_columns.div_ceil(8);
    let columns: Vec<String> = readers
        .iter()
        .flat_map(|r| r.sub().columns.iter().cloned())
        .collect();

    let header = IndexHeader {
        page_size: 0,
        term_size,
        canonical,
        subs: vec![SubIndexMeta {
            sig_size,
            num_hashes,
            columns,
        }],
    };

    let file = fs::File::create(output).map_err(|e| SignetError::io(output, "create", e))?;
    let mut writer = std::io::BufWriter::new(file);
    header
        .write_to(&mut writer)
        .map_err(|e| SignetError::io(output, "write", e))?;

    // Per-input staging for a chunk of rows, then parallel concatenation
    // into the output chunk (disjoint row slices per task).
    let mut stage: Vec<Vec<u8>> = widths.iter().map(|w| vec![0u8; w * ROW_CHUNK]).collect();
    let mut out = vec![0u8; out_width * ROW_CHUNK];
    let mut remaining = sig_size;
    while remaining > 0 {
        let rows = remaining.min(ROW_CHUNK as u64) as usize;
        for (reader, buf) in readers.iter_mut().zip(stage.iter_mut()) {
            let width = reader.row_width();
            for r in 0..rows {
                reader.read_row(&mut buf[r * width..(r + 1) * width])?;
            }
        }
        out[..rows * out_width]
            .par_chunks_mut(out_width)
            .enumerate()
            .for_each(|(r, out_row)| {
                out_row.fill(0);
                for ((buf, &width), &bit_offset) in
                    stage.iter().zip(widths.iter()).zip(bit_offsets.iter())
                {
                    splice_row(out_row, bit_offset, &buf[r * width..(r + 1) * width]);
                }
            });
        writer
            .write_all(&out[..rows * out_width])
            .map_err(|e| SignetError::io(output, "write", e))?;
        remaining -= rows as u64;
    }
    writer.flush().map_err(|e| SignetError::io(output, "flush", e))?;
    Ok(())
}

/// OR a packed input row into the output row starting at `bit_offset`.
/// Byte-aligned offsets (the common case: full batches are multiples of 8
/// columns) reduce to a copy; a batch that lost documents to parse skips
/// shifts its successors onto odd bit positions.
fn splice_row(out_row: &mut [u8], bit_offset: usize, row: &[u8]) {
    let byte = bit_offset / 8;
    let shift = bit_offset % 8;
    if shift == 0 {
        out_row[byte..byte + row.len()].copy_from_slice(row);
        return;
    }
    for (i, &b) in row.iter().enumerate() {
        out_row[byte + i] |= b << shift;
        let carry = b >> (8 - shift);
        if byte + i + 1 < out_row.len() {
            out_row[byte + i + 1] |= carry;
        }
    }
}

/// Merge `work_dir/level_0` upward until a single block remains; returns its
/// path. Intermediate levels live in `work_dir/level_<n>` and are deleted as
/// soon as the next level is complete.
pub fn merge_levels(
    work_dir: &Path,
    fan_in: usize,
    sink: &dyn ProgressSink,
    cancel: Option<&AtomicBool>,
) -> Result<PathBuf> {
    if fan_in < 2 {
        return Err(SignetError::validation("merge fan-in must be at least 2"));
    }
    let mut level = 0u32;
    loop {
        let level_dir = work_dir.join(format!("level_{}", level));
        let mut blocks = list_blocks(&level_dir)?;
        match blocks.len() {
            0 => {
                return Err(SignetError::validation(
                    "no blocks to merge (empty document set?)",
                ))
            }
            1 => return Ok(blocks.pop().unwrap()),
            n => sink.report(ProgressEvent::LevelStarted { level, blocks: n }),
        }

        let next_dir = work_dir.join(format!("level_{}", level + 1));
        fs::create_dir_all(&next_dir).map_err(|e| SignetError::io(&next_dir, "mkdir", e))?;
        for (seq, run) in blocks.chunks(fan_in).enumerate() {
            check_cancelled(cancel)?;
            let out = next_dir.join(format!("block_{:07}.sgnx", seq + 1));
            merge_blocks(run, &out)?;
        }
        fs::remove_dir_all(&level_dir).map_err(|e| SignetError::io(&level_dir, "rmdir", e))?;
        sink.report(ProgressEvent::LevelFinished { level });
        level += 1;
    }
}

/// Blocks of one level, in merge order (zero-padded sequence prefix).
fn list_blocks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut blocks = Vec::new();
    let iter = fs::read_dir(dir).map_err(|e| SignetError::io(dir, "scan", e))?;
    for item in iter {
        let item = item.map_err(|e| SignetError::io(dir, "scan", e))?;
        let path = item.path();
        if path.extension().is_some_and(|e| e == "sgnx") {
            blocks.push(path);
        }
    }
    blocks.sort();
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilter;
    use crate::classic::write_block;
    use crate::hashing::fnv1a;
    use crate::progress::NullSink;

    fn block_with(dir: &Path, name: &str, docs: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let filters: Vec<BloomFilter> = docs
            .iter()
            .map(|(_, term)| {
                let mut f = BloomFilter::new(64, 2, fnv1a).unwrap();
                if !term.is_empty() {
                    f.insert(term);
                }
                f
            })
            .collect();
        let names = docs.iter().map(|(n, _)| n.to_string()).collect();
        write_block(&path, 3, false, 2, names, &filters).unwrap();
        path
    }

    #[test]
    fn test_merge_preserves_column_order_and_bits() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // 8 columns in the first block keeps its rows byte-aligned.
        let docs1: Vec<(String, Vec<u8>)> = (0..8)
            .map(|i| (format!("a{}", i), format!("AC{}", i).into_bytes()))
            .collect();
        let docs1_refs: Vec<(&str, &[u8])> = docs1
            .iter()
            .map(|(n, t)| (n.as_str(), t.as_slice()))
            .collect();
        let b1 = block_with(dir.path(), "block_0000001.sgnx", &docs1_refs);
        let b2 = block_with(dir.path(), "block_0000002.sgnx", &[("z1", b"ACG")]);

        let out = dir.path().join("merged.sgnx");
        merge_blocks(&[b1, b2], &out)?;

        let mut reader = ClassicReader::open(&out)?;
        let names: Vec<&str> = reader.sub().columns.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec!["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "z1"]
        );

        // Column 8 (first byte of second input) must carry z1's filter.
        let mut expected = BloomFilter::new(64, 2, fnv1a).unwrap();
        expected.insert(b"ACG");
        let mut row = [0u8; 2];
        for r in 0..64 {
            reader.read_row(&mut row)?;
            assert_eq!(row[1] & 1 != 0, expected.bit(r), "row {}", r);
        }
        Ok(())
    }

    #[test]
    fn test_unaligned_blocks_bit_concatenate() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        // 3 + 2 columns: the second block lands on bit offset 3.
        let b1 = block_with(
            dir.path(),
            "block_0000001.sgnx",
            &[("a0", b"AAA"), ("a1", b"ACG"), ("a2", b"")],
        );
        let b2 = block_with(
            dir.path(),
            "block_0000002.sgnx",
            &[("b0", b"ACG"), ("b1", b"TTT")],
        );
        let out = dir.path().join("merged.sgnx");
        merge_blocks(&[b1, b2], &out)?;

        let mut reader = ClassicReader::open(&out)?;
        assert_eq!(reader.sub().columns, vec!["a0", "a1", "a2", "b0", "b1"]);

        let mut expect = Vec::new();
        for term in [b"AAA".as_slice(), b"ACG", b"", b"ACG", b"TTT"] {
            let mut f = BloomFilter::new(64, 2, fnv1a).unwrap();
            if !term.is_empty() {
                f.insert(term);
            }
            expect.push(f);
        }
        let mut row = [0u8; 1];
        for r in 0..64 {
            reader.read_row(&mut row)?;
            for (c, f) in expect.iter().enumerate() {
                assert_eq!(row[0] & (1 << c) != 0, f.bit(r), "row {} col {}", r, c);
            }
            assert_eq!(row[0] & 0b1110_0000, 0, "padding bits must stay zero");
        }
        Ok(())
    }

    #[test]
    fn test_mismatched_parameters_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let b1 = block_with(dir.path(), "block_0000001.sgnx", &[("a", b"ACG")]);
        // A block with a different signature size.
        let path = dir.path().join("block_0000002.sgnx");
        let mut f = BloomFilter::new(128, 2, fnv1a).unwrap();
        f.insert(b"CGT");
        write_block(&path, 3, false, 2, vec!["b".to_string()], &[f]).unwrap();

        let out = dir.path().join("merged.sgnx");
        assert!(merge_blocks(&[b1, path], &out).is_err());
        assert!(!out.exists());
        Ok(())
    }

    #[test]
    fn test_merge_levels_to_single_block() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let level0 = dir.path().join("level_0");
        fs::create_dir_all(&level0)?;

        // Four level-0 blocks of 8 columns each, fan-in 2: two levels.
        for b in 0..4 {
            let docs: Vec<(String, Vec<u8>)> = (0..8)
                .map(|i| (format!("d{}_{}", b, i), format!("T{}{}", b, i).into_bytes()))
                .collect();
            let refs: Vec<(&str, &[u8])> = docs
                .iter()
                .map(|(n, t)| (n.as_str(), t.as_slice()))
                .collect();
            block_with(&level0, &format!("block_{:07}.sgnx", b + 1), &refs);
        }

        let final_block = merge_levels(dir.path(), 2, &NullSink, None)?;
        let reader = ClassicReader::open(&final_block)?;
        assert_eq!(reader.sub().columns.len(), 32);
        assert_eq!(reader.sub().columns[0], "d0_0");
        assert_eq!(reader.sub().columns[31], "d3_7");
        // Lower levels are cleaned up.
        assert!(!level0.exists());
        assert!(!dir.path().join("level_1").exists());
        Ok(())
    }
}
