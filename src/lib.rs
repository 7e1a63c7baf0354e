//! signet: a Bloom-filter signature-matrix index for large collections of
//! biological sequence documents.
//!
//! Build turns a directory of documents (FASTA/FASTQ, plain text, Cortex
//! graphs, pre-built k-mer buffers) into a bit-sliced signature matrix:
//! rows are Bloom bit positions, columns are documents. A query reduces to
//! a handful of row reads per term, a bitwise AND, and per-column
//! popcounts, so "which documents contain all q-grams of this sequence?"
//! is answered in milliseconds over corpora that dwarf RAM.
//!
//! The compact form packs several size-classed sub-indices into one
//! page-aligned file; three interchangeable backends (buffered, mmap,
//! async direct I/O) serve the row reads.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod backend;
pub mod bloom;
pub mod build;
pub mod classic;
pub mod compact;
pub mod config;
pub mod documents;
pub mod error;
pub mod extract;
pub mod format;
pub mod hashing;
pub mod logging;
pub mod merge;
pub mod progress;
pub mod query;

pub use backend::{BackendKind, IndexBackend};
pub use build::build_classic;
pub use compact::build_compact;
pub use config::BuildParams;
pub use documents::{DocumentEntry, DocumentFilter, DocumentKind, DocumentList};
pub use error::{Result, SignetError};
pub use progress::{LogSink, NullSink, ProgressEvent, ProgressSink};
pub use query::{QueryEngine, QueryHit};

/// Cooperative cancellation check, polled at batch and probe boundaries.
pub(crate) fn check_cancelled(flag: Option<&AtomicBool>) -> Result<()> {
    if flag.is_some_and(|f| f.load(Ordering::Relaxed)) {
        return Err(SignetError::validation("operation cancelled"));
    }
    Ok(())
}
