//! Compact (multi-resolution) index construction.
//!
//! Documents are sorted by their signature-size requirement and cut into
//! groups of G; each group gets the signature size its largest member needs,
//! rounded so rows pack into whole device pages. Small documents therefore
//! share small signatures instead of paying for the largest one, which is
//! where the 5-20x size win over a uniform layout comes from.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::build::{build_block_tree, requirement, WorkDir};
use crate::check_cancelled;
use crate::classic::ClassicReader;
use crate::config::BuildParams;
use crate::documents::DocumentList;
use crate::error::{Result, SignetError};
use crate::format::IndexHeader;
use crate::progress::{ProgressEvent, ProgressSink};

/// Round a signature-size requirement up so a sub-index of `group_size`
/// columns keeps its rows page-packable: the result is a multiple of
/// `lcm(8, page_size / (group_size/8))`.
pub fn round_sig_size(req: u64, group_size: usize, page_size: usize) -> u64 {
    let row_width = (group_size / 8) as u64;
    let mult = lcm(8, page_size as u64 / row_width);
    req.next_multiple_of(mult)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// Build a compact index over `list` at `output`.
pub fn build_compact(
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

    // Ascending by requirement; path breaks ties so the layout is stable.
    let mut sized: Vec<(u64, crate::documents::DocumentEntry)> = list
        .entries()
        .iter()
        .map(|e| (requirement(e, params), e.clone()))
        .collect();
    sized.sort_by(|a, b| {
        (a.0, &a.1.path, a.1.subdoc_index).cmp(&(b.0, &b.1.path, b.1.subdoc_index))
    });

    let work = WorkDir::create(output)?;
    let mut group_blocks: Vec<PathBuf> = Vec::new();
    for (g, group) in sized.chunks(params.group_size).enumerate() {
        check_cancelled(cancel)?;
        let max_req = group.iter().map(|(req, _)| *req).max().unwrap();
        let sig_size = round_sig_size(max_req, params.group_size, params.page_size);
        sink.report(ProgressEvent::SubIndexStarted {
            index: g,
            columns: group.len(),
            sig_size,
        });

        let group_dir = work.path.join(format!("group_{}", g));
        fs::create_dir_all(&group_dir).map_err(|e| SignetError::io(&group_dir, "mkdir", e))?;
        let group_list =
            DocumentList::from_ordered(group.iter().map(|(_, e)| e.clone()).collect());
        let block = build_block_tree(&group_list, sig_size, params, &group_dir, sink, cancel)?;
        group_blocks.push(block);
        sink.report(ProgressEvent::SubIndexFinished { index: g });
    }

    let part = output.with_file_name(format!(
        "{}.part",
        output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index.sgnx".to_string())
    ));
    let assembled = assemble(&part, &group_blocks, params);
    if assembled.is_err() {
        fs::remove_file(&part).ok();
        return assembled;
    }
    fs::rename(&part, output).map_err(|e| SignetError::io(output, "rename", e))?;
    Ok(())
}

/// Pack the per-group blocks into one page-aligned compact file.
fn assemble(path: &Path, group_blocks: &[PathBuf], params: &BuildParams) -> Result<()> {
    let page_size = params.page_size;
    let mut readers = Vec::with_capacity(group_blocks.len());
    let mut subs = Vec::with_capacity(group_blocks.len());
    for block in group_blocks {
        let reader = ClassicReader::open(block)?;
        let sub = reader.sub().clone();
        if sub.row_width() > page_size {
            return Err(SignetError::validation(format!(
                "sub-index row width {} exceeds page size {}",
                sub.row_width(),
                page_size
            )));
        }
        subs.push(sub);
        readers.push(reader);
    }

    let header = IndexHeader {
        page_size: page_size as u32,
        term_size: params.term_size as u32,
        canonical: params.canonicalize,
        subs,
    };

    let file = File::create(path).map_err(|e| SignetError::io(path, "create", e))?;
    let mut writer = BufWriter::new(file);
    header
        .write_to(&mut writer)
        .map_err(|e| SignetError::io(path, "write", e))?;

    let mut page = vec![0u8; page_size];
    for reader in &mut readers {
        let width = reader.row_width();
        let rows = reader.sub().sig_size;
        for _ in 0..rows {
            page.fill(0);
            reader.read_row(&mut page[..width])?;
            writer
                .write_all(&page)
                .map_err(|e| SignetError::io(path, "write", e))?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| SignetError::io(path, "flush", e.into_error()))?
        .sync_all()
        .map_err(|e| SignetError::io(path, "sync", e))?;
    Ok(())
}
