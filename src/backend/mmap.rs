//! Memory-mapped probe backend.
//!
//! The whole index is mapped read-only and the kernel is advised to start
//! faulting it in; probes then copy pages out of the mapping. Best when the
//! index fits in RAM or the working set has locality.

use memmap2::{Advice, Mmap};
use std::path::Path;

use super::IndexLayout;
use crate::error::{Result, SignetError};

#[derive(Debug)]
pub struct MmapBackend {
    mmap: Mmap,
    layout: IndexLayout,
}

impl MmapBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let (layout, file) = IndexLayout::open(path)?;
        // SAFETY: the index file is written once and opened read-only; no
        // live writer can truncate it under the mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SignetError::io(path, "mmap", e))?;
        if let Err(err) = mmap.advise(Advice::WillNeed) {
            log::debug!("madvise(WILLNEED) failed on '{}': {}", path.display(), err);
        }
        Ok(MmapBackend { mmap, layout })
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn probe(&mut self, sub: usize, rows: &[u64], out: &mut [u8]) -> Result<()> {
        let stride = self.layout.row_stride(sub);
        let base = self.layout.sub_offsets[sub] as usize;
        for (chunk, &row) in out.chunks_exact_mut(stride).zip(rows) {
            let offset = base + row as usize * stride;
            chunk.copy_from_slice(&self.mmap[offset..offset + stride]);
        }
        Ok(())
    }
}
