//! Classic (single size class) index blocks.
//!
//! A block is the row-major transpose of a batch of per-document Bloom
//! filters: row r carries one bit per column, packed little-endian within
//! byte. Blocks are both a final index form and the unit the merger
//! combines level by level.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::error::{Result, SignetError};
use crate::format::{IndexHeader, SubIndexMeta};

/// Write one classic block: header, then `sig_size` rows of
/// `ceil(names.len()/8)` bytes. Column c is the c-th filter in input order.
/// A failed write unlinks the partial file.
pub fn write_block(
    path: &Path,
    term_size: u32,
    canonical: bool,
    num_hashes: u16,
    names: Vec<String>,
    filters: &[BloomFilter],
) -> Result<()> {
    let result = write_block_inner(path, term_size, canonical, num_hashes, names, filters);
    if result.is_err() {
        std::fs::remove_file(path).ok();
    }
    result
}

fn write_block_inner(
    path: &Path,
    term_size: u32,
    canonical: bool,
    num_hashes: u16,
    names: Vec<String>,
    filters: &[BloomFilter],
) -> Result<()> {
    if names.len() != filters.len() {
        return Err(SignetError::validation(format!(
            "{} names for {} filters",
            names.len(),
            filters.len()
        )));
    }
    let sig_size = match filters.first() {
        Some(first) => first.num_bits(),
        None => return Err(SignetError::validation("cannot write a block of zero columns")),
    };
    if filters.iter().any(|f| f.num_bits() != sig_size) {
        return Err(SignetError::validation("filters in a block must share one size"));
    }

    let header = IndexHeader {
        page_size: 0,
        term_size,
        canonical,
        subs: vec![SubIndexMeta {
            sig_size,
            num_hashes,
            columns: names,
        }],
    };
    let row_width = header.subs[0].row_width();

    let file = File::create(path).map_err(|e| SignetError::io(path, "create", e))?;
    let mut writer = BufWriter::new(file);
    header
        .write_to(&mut writer)
        .map_err(|e| SignetError::io(path, "write", e))?;

    let mut row = vec![0u8; row_width];
    for r in 0..sig_size {
        row.fill(0);
        for (c, filter) in filters.iter().enumerate() {
            if filter.bit(r) {
                row[c / 8] |= 1 << (c % 8);
            }
        }
        writer
            .write_all(&row)
            .map_err(|e| SignetError::io(path, "write", e))?;
    }
    writer
        .into_inner()
        .map_err(|e| SignetError::io(path, "flush", e.into_error()))?
        .sync_all()
        .map_err(|e| SignetError::io(path, "sync", e))?;
    Ok(())
}

/// Sequential row reader over a classic block.
#[derive(Debug)]
pub struct ClassicReader {
    reader: BufReader<File>,
    header: IndexHeader,
    path: PathBuf,
    rows_read: u64,
}

impl ClassicReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SignetError::io(path, "open", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| SignetError::io(path, "stat", e))?
            .len();
        let mut reader = BufReader::new(file);
        let (header, data_start) = IndexHeader::read_from(&mut reader, path)?;
        if header.is_compact() || header.subs.len() != 1 {
            return Err(SignetError::format(path, "not a classic block"));
        }
        if file_len != header.expected_len(data_start) {
            return Err(SignetError::format(
                path,
                format!(
                    "file is {} bytes, layout requires {}",
                    file_len,
                    header.expected_len(data_start)
                ),
            ));
        }
        Ok(ClassicReader {
            reader,
            header,
            path: path.to_path_buf(),
            rows_read: 0,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn sub(&self) -> &SubIndexMeta {
        &self.header.subs[0]
    }

    pub fn row_width(&self) -> usize {
        self.header.subs[0].row_width()
    }

    /// Read the next row into `buf` (must be exactly `row_width` bytes).
    pub fn read_row(&mut self, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.row_width());
        if self.rows_read >= self.header.subs[0].sig_size {
            return Err(SignetError::format(&self.path, "row read past end of block"));
        }
        use std::io::Read;
        self.reader
            .read_exact(buf)
            .map_err(|e| SignetError::io(&self.path, "read", e))?;
        self.rows_read += 1;
        Ok(())
    }
}
