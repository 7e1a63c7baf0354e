//! Buffered probe backend: positional reads through the OS page cache.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::IndexLayout;
use crate::error::{Result, SignetError};

#[derive(Debug)]
pub struct BufferedBackend {
    file: File,
    layout: IndexLayout,
}

impl BufferedBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let (layout, file) = IndexLayout::open(path)?;
        Ok(BufferedBackend { file, layout })
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn probe(&mut self, sub: usize, rows: &[u64], out: &mut [u8]) -> Result<()> {
        let stride = self.layout.row_stride(sub);
        let base = self.layout.sub_offsets[sub];
        for (chunk, &row) in out.chunks_exact_mut(stride).zip(rows) {
            // Short reads are fatal; the layout was length-checked at open,
            // so one here means the file changed underneath us.
            self.file
                .read_exact_at(chunk, base + row * stride as u64)
                .map_err(|e| SignetError::io(&self.layout.path, "read", e))?;
        }
        Ok(())
    }
}
