//! Build pipeline shared by the classic and compact index writers.
//!
//! Documents are processed in batches: every batch becomes a level-0 block
//! (Bloom construction is data-parallel across the batch), then the merger
//! folds the levels into a single block. Per-document parse failures skip
//! the document with a warning; everything else aborts the build.

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::bloom::{required_bits, BloomFilter};
use crate::check_cancelled;
use crate::classic::write_block;
use crate::config::BuildParams;
use crate::documents::{DocumentEntry, DocumentKind, DocumentList};
use crate::error::{Result, SignetError};
use crate::extract::KmerExtractor;
use crate::merge::merge_levels;
use crate::progress::{ProgressEvent, ProgressSink};

/// Estimated term count of a document, from its byte size.
pub fn estimate_terms(entry: &DocumentEntry, term_size: usize) -> u64 {
    let estimate = match entry.kind {
        DocumentKind::Text | DocumentKind::Fasta | DocumentKind::Fastq => {
            entry.size.saturating_sub(term_size as u64 - 1)
        }
        DocumentKind::KmerBuffer => entry.size / term_size as u64,
        // 8 bytes of packed k-mer words per record is the common case.
        DocumentKind::Cortex => entry.size / 8,
    };
    estimate.max(1)
}

/// Signature bits this document needs under the build parameters.
pub fn requirement(entry: &DocumentEntry, params: &BuildParams) -> u64 {
    required_bits(
        estimate_terms(entry, params.term_size),
        params.num_hashes,
        params.false_positive_rate,
    )
}

/// Build one document's filter. Parse failures are reported per file and
/// yield `None` so the batch continues without the document.
fn build_filter(
    entry: &DocumentEntry,
    sig_size: u64,
    params: &BuildParams,
    extractor: &KmerExtractor,
) -> Result<Option<BloomFilter>> {
    let mut filter = BloomFilter::new(sig_size, params.num_hashes, params.hasher)?;
    match extractor.process(entry, |term| filter.insert(term)) {
        Ok(()) => Ok(Some(filter)),
        Err(err @ SignetError::Input { .. }) => {
            log::warn!("skipping document: {}", err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Run the batch/merge pipeline over `list` at a fixed signature size and
/// return the path of the single resulting block inside `work_dir`.
pub fn build_block_tree(
    list: &DocumentList,
    sig_size: u64,
    params: &BuildParams,
    work_dir: &Path,
    sink: &dyn ProgressSink,
    cancel: Option<&AtomicBool>,
) -> Result<PathBuf> {
    let extractor = KmerExtractor::new(params.term_size, params.canonicalize)?;
    let level0 = work_dir.join("level_0");
    fs::create_dir_all(&level0).map_err(|e| SignetError::io(&level0, "mkdir", e))?;

    list.process_batches(params.batch_size, |seq, batch, name| {
        check_cancelled(cancel)?;
        sink.report(ProgressEvent::BatchStarted { seq, name });

        let built: Vec<Option<(String, BloomFilter)>> = batch
            .par_iter()
            .map(|entry| {
                build_filter(entry, sig_size, params, &extractor)
                    .map(|opt| opt.map(|f| (entry.name(), f)))
            })
            .collect::<Result<_>>()?;

        let mut names = Vec::with_capacity(batch.len());
        let mut filters = Vec::with_capacity(batch.len());
        for (doc_name, filter) in built.into_iter().flatten() {
            names.push(doc_name);
            filters.push(filter);
        }
        if filters.is_empty() {
            log::warn!("batch {} contains no readable documents", name);
            return Ok(());
        }

        let block = level0.join(format!("block_{:07}_{}.sgnx", seq, name));
        write_block(
            &block,
            params.term_size as u32,
            params.canonicalize,
            params.num_hashes,
            names,
            &filters,
        )?;
        sink.report(ProgressEvent::BatchFinished { seq, name });
        Ok(())
    })?;

    merge_levels(work_dir, params.batch_size, sink, cancel)
}

/// Build a classic (single size class) index over `list` at `output`.
///
/// The signature size is the largest per-document requirement, so every
/// column meets the configured false-positive rate.
pub fn build_classic(
    list: &DocumentList,
    output: &Path,
    params: &BuildParams,
    sink: &dyn ProgressSink,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    params.validate()?;
    if list.is_empty() {
        return Err(SignetError::validation("no documents to index"));
    }

    let sig_size = list
        .entries()
        .iter()
        .map(|e| requirement(e, params))
        .max()
        .unwrap();

    let work = WorkDir::create(output)?;
    let block = build_block_tree(list, sig_size, params, &work.path, sink, cancel)?;
    fs::rename(&block, output).map_err(|e| SignetError::io(output, "rename", e))?;
    Ok(())
}

/// Scratch directory next to the output file, removed on every exit path.
pub struct WorkDir {
    pub path: PathBuf,
}

impl WorkDir {
    pub fn create(output: &Path) -> Result<Self> {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        let path = output.with_file_name(format!(".{}.work", name));
        if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| SignetError::io(&path, "rmdir", e))?;
        }
        fs::create_dir_all(&path).map_err(|e| SignetError::io(&path, "mkdir", e))?;
        Ok(WorkDir { path })
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.path).ok();
    }
}
