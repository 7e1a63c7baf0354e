//! Random-access probe backends over a built index.
//!
//! All three variants answer the same contract: `probe(sub_index, rows)`
//! fills a caller buffer with one row-stride worth of bytes per requested
//! row. The stride is a full device page for the compact form and the bare
//! row width for the classic form. Dispatch is resolved once at open time.

mod aio;
mod buffered;
mod mmap;

pub use aio::AioBackend;
pub use buffered::BufferedBackend;
pub use mmap::MmapBackend;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Result, SignetError};
use crate::format::IndexHeader;

/// Backend selection, decided by the caller (CLI flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Positional reads through the OS page cache.
    Buffered,
    /// Whole-file memory mapping with a will-need hint.
    Mmap,
    /// O_DIRECT plus batched POSIX AIO submission.
    AsyncDirect,
}

/// Open-time view of an index file: parsed header, per-sub-index base
/// offsets, validated length.
#[derive(Debug)]
pub struct IndexLayout {
    pub header: IndexHeader,
    pub sub_offsets: Vec<u64>,
    pub path: PathBuf,
}

impl IndexLayout {
    /// Parse and validate the header of `path`; returns the layout and the
    /// (already open) file.
    pub fn open(path: &Path) -> Result<(Self, File)> {
        let file = File::open(path).map_err(|e| SignetError::io(path, "open", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| SignetError::io(path, "stat", e))?
            .len();
        let mut reader = BufReader::new(&file);
        let (header, data_start) = IndexHeader::read_from(&mut reader, path)?;
        let expected = header.expected_len(data_start);
        if file_len != expected {
            return Err(SignetError::format(
                path,
                format!("file is {} bytes, layout requires {}", file_len, expected),
            ));
        }
        let sub_offsets = header.sub_offsets(data_start);
        Ok((
            IndexLayout {
                header,
                sub_offsets,
                path: path.to_path_buf(),
            },
            file,
        ))
    }

    /// Row stride in bytes of sub-index `s`.
    pub fn row_stride(&self, s: usize) -> usize {
        self.header.row_stride(s) as usize
    }
}

/// A probe backend, resolved once at open time.
#[derive(Debug)]
pub enum IndexBackend {
    Buffered(BufferedBackend),
    Mmap(MmapBackend),
    AsyncDirect(AioBackend),
}

impl IndexBackend {
    /// Open `path` with the requested backend. The async-direct variant
    /// falls back to buffered (with a warning) when O_DIRECT or the AIO
    /// facility is unavailable, or when the index is the unpaged classic
    /// form.
    pub fn open(path: &Path, kind: BackendKind, ring_capacity: usize) -> Result<Self> {
        match kind {
            BackendKind::Buffered => Ok(IndexBackend::Buffered(BufferedBackend::open(path)?)),
            BackendKind::Mmap => Ok(IndexBackend::Mmap(MmapBackend::open(path)?)),
            BackendKind::AsyncDirect => match AioBackend::open(path, ring_capacity) {
                Ok(backend) => Ok(IndexBackend::AsyncDirect(backend)),
                Err(err) => {
                    log::warn!(
                        "async-direct backend unavailable ({}); falling back to buffered",
                        err
                    );
                    Ok(IndexBackend::Buffered(BufferedBackend::open(path)?))
                }
            },
        }
    }

    pub fn layout(&self) -> &IndexLayout {
        match self {
            IndexBackend::Buffered(b) => b.layout(),
            IndexBackend::Mmap(b) => b.layout(),
            IndexBackend::AsyncDirect(b) => b.layout(),
        }
    }

    /// Fill `out` with the rows' bytes: `out[i*stride..][..stride]` is the
    /// row `rows[i]` of sub-index `sub`.
    pub fn probe(&mut self, sub: usize, rows: &[u64], out: &mut [u8]) -> Result<()> {
        let layout = self.layout();
        let stride = layout.row_stride(sub);
        if out.len() != rows.len() * stride {
            return Err(SignetError::validation(format!(
                "probe buffer is {} bytes, need {}",
                out.len(),
                rows.len() * stride
            )));
        }
        let sig_size = layout.header.subs[sub].sig_size;
        if let Some(&bad) = rows.iter().find(|&&r| r >= sig_size) {
            return Err(SignetError::validation(format!(
                "row {} out of range for signature size {}",
                bad, sig_size
            )));
        }
        match self {
            IndexBackend::Buffered(b) => b.probe(sub, rows, out),
            IndexBackend::Mmap(b) => b.probe(sub, rows, out),
            IndexBackend::AsyncDirect(b) => b.probe(sub, rows, out),
        }
    }
}
