//! Input document enumeration.
//!
//! A `DocumentList` scans a corpus directory, classifies files by extension,
//! explodes multi-record files into per-record sub-documents, and hands
//! ordered batches to the build pipeline.

use needletail::parse_fastx_file;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SignetError};

/// Document kinds recognized by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Whole file is one document; every length-q window is a term.
    Text,
    /// Cortex de-Bruijn graph; one term field per record.
    Cortex,
    /// Pre-serialized q-gram buffer, streamed verbatim.
    KmerBuffer,
    /// Multi-record FASTA; one sub-document per record.
    Fasta,
    /// Multi-record FASTQ; one sub-document per record, quality ignored.
    Fastq,
}

impl DocumentKind {
    /// Classify a path by extension. Unknown extensions yield `None`.
    pub fn from_path(path: &Path) -> Option<DocumentKind> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("txt") => Some(DocumentKind::Text),
            Some("ctx") => Some(DocumentKind::Cortex),
            Some("cobs_doc") => Some(DocumentKind::KmerBuffer),
            Some("fasta") => Some(DocumentKind::Fasta),
            Some("fastq") => Some(DocumentKind::Fastq),
            _ => None,
        }
    }

    fn is_multi_record(self) -> bool {
        matches!(self, DocumentKind::Fasta | DocumentKind::Fastq)
    }
}

/// Scan filter: a single kind, or the union of all recognized kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFilter {
    Any,
    Only(DocumentKind),
}

impl DocumentFilter {
    fn accepts(self, kind: DocumentKind) -> bool {
        match self {
            DocumentFilter::Any => true,
            DocumentFilter::Only(k) => k == kind,
        }
    }
}

/// One indexable unit: a file, or one record of a multi-record file.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// Byte size of the unit (sequence length for sub-documents); drives
    /// batching and size-class assignment.
    pub size: u64,
    /// Zero for single-record kinds; record ordinal otherwise.
    pub subdoc_index: u32,
}

impl DocumentEntry {
    /// Column name of this entry in the signature matrix.
    pub fn name(&self) -> String {
        let stem = basename(&self.path);
        if self.kind.is_multi_record() {
            format!("{}:{}", stem, self.subdoc_index)
        } else {
            stem
        }
    }
}

impl PartialEq for DocumentEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.subdoc_index == other.subdoc_index
    }
}

impl Eq for DocumentEntry {}

impl PartialOrd for DocumentEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocumentEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.path, self.subdoc_index).cmp(&(&other.path, other.subdoc_index))
    }
}

fn basename(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Ordered collection of document entries with batch dispatch.
#[derive(Debug, Default)]
pub struct DocumentList {
    entries: Vec<DocumentEntry>,
}

impl DocumentList {
    /// Wrap an explicit entry list, ordered by name.
    pub fn new(mut entries: Vec<DocumentEntry>) -> Self {
        entries.sort();
        DocumentList { entries }
    }

    /// Wrap an entry list whose order is already meaningful (e.g. a
    /// size-classed group); no re-sort.
    pub fn from_ordered(entries: Vec<DocumentEntry>) -> Self {
        DocumentList { entries }
    }

    /// Recursively enumerate regular files under `root` whose extension
    /// matches `filter`, exploding multi-record files into sub-documents.
    ///
    /// Unreadable files are skipped with a warning. A multi-record file
    /// whose records cannot be parsed aborts the scan.
    pub fn from_directory(root: &Path, filter: DocumentFilter) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let iter = match fs::read_dir(&dir) {
                Ok(iter) => iter,
                // An unreadable root is an error; unreadable subtrees are
                // skipped like unreadable files.
                Err(e) if dir == root => return Err(SignetError::io(root, "scan", e)),
                Err(e) => {
                    log::warn!("skipping unreadable directory '{}': {}", dir.display(), e);
                    continue;
                }
            };
            for item in iter {
                let item = item.map_err(|e| SignetError::io(&dir, "scan", e))?;
                let path = item.path();
                let meta = match item.metadata() {
                    Ok(meta) => meta,
                    Err(e) => {
                        log::warn!("skipping '{}': {}", path.display(), e);
                        continue;
                    }
                };
                if meta.is_dir() {
                    pending.push(path);
                } else if meta.is_file() {
                    if let Some(kind) = DocumentKind::from_path(&path) {
                        if filter.accepts(kind) {
                            Self::add(&mut entries, path, kind, meta.len())?;
                        }
                    }
                }
            }
        }

        let mut list = DocumentList { entries };
        list.sort_by_name();
        Ok(list)
    }

    fn add(
        entries: &mut Vec<DocumentEntry>,
        path: PathBuf,
        kind: DocumentKind,
        file_size: u64,
    ) -> Result<()> {
        if !kind.is_multi_record() {
            entries.push(DocumentEntry {
                path,
                kind,
                size: file_size,
                subdoc_index: 0,
            });
            return Ok(());
        }

        // Explode FASTA/FASTQ into one entry per record, sized by its
        // sequence length.
        let mut reader = match parse_fastx_file(&path) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("skipping unreadable '{}': {}", path.display(), e);
                return Ok(());
            }
        };
        let mut subdoc_index = 0u32;
        while let Some(record) = reader.next() {
            let record = record
                .map_err(|e| SignetError::input(&path, format!("record {}: {}", subdoc_index, e)))?;
            entries.push(DocumentEntry {
                path: path.clone(),
                kind,
                size: record.seq().len() as u64,
                subdoc_index,
            });
            subdoc_index += 1;
        }
        Ok(())
    }

    /// Total order by (path, sub-document index).
    pub fn sort_by_name(&mut self) {
        self.entries.sort();
    }

    /// Alternative order by (size, path) for size-balanced batching.
    pub fn sort_by_size(&mut self) {
        self.entries
            .sort_by(|a, b| (a.size, &a.path, a.subdoc_index).cmp(&(b.size, &b.path, b.subdoc_index)));
    }

    pub fn entries(&self) -> &[DocumentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Partition the current order into consecutive runs of at most
    /// `batch_size` entries and invoke `f` with each run's one-based
    /// sequence number, entries, and synthetic `[first-last]` name.
    pub fn process_batches<F>(&self, batch_size: usize, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &[DocumentEntry], &str) -> Result<()>,
    {
        for (i, batch) in self.entries.chunks(batch_size.max(1)).enumerate() {
            let name = format!(
                "[{}-{}]",
                basename(&batch[0].path),
                basename(&batch[batch.len() - 1].path)
            );
            f(i as u64 + 1, batch, &name)?;
        }
        Ok(())
    }
}
