use anyhow::Result;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use signet::bloom::BloomFilter;
use signet::classic::ClassicReader;
use signet::hashing::fnv1a;
use signet::progress::NullSink;
use signet::query::QueryEngine;
use signet::{build_classic, BackendKind, BuildParams, DocumentFilter, DocumentList};

fn tiny_params() -> BuildParams {
    BuildParams {
        term_size: 3,
        num_hashes: 2,
        batch_size: 8,
        ..BuildParams::default()
    }
}

fn build_corpus(dir: &Path, docs: &[(&str, &str)]) -> Result<DocumentList> {
    for (name, contents) in docs {
        fs::write(dir.join(name), contents)?;
    }
    Ok(DocumentList::from_directory(dir, DocumentFilter::Any)?)
}

/// Two 3-mer documents, query "ACG": both contain it exactly once.
#[test]
fn test_single_term_query_hits_both_documents() -> Result<()> {
    let dir = tempdir()?;
    let list = build_corpus(dir.path(), &[("d1.txt", "ACGTAC"), ("d2.txt", "ACGT")])?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    // Tiny documents share the minimum signature size.
    assert_eq!(engine.header().subs[0].sig_size, 64);
    assert_eq!(engine.header().subs[0].num_hashes, 2);

    let hits = engine.query(b"ACG", 10, 1, None, None)?;
    let as_pairs: Vec<(&str, u32)> = hits.iter().map(|h| (h.name.as_str(), h.count)).collect();
    assert_eq!(as_pairs, vec![("d1", 1), ("d2", 1)]);
    Ok(())
}

/// Query "ACGTAC" (terms ACG, CGT, GTA, TAC): the containing document
/// reports all four; the partial document matches its in-memory filter.
#[test]
fn test_multi_term_counts() -> Result<()> {
    let dir = tempdir()?;
    let list = build_corpus(dir.path(), &[("d1.txt", "ACGTAC"), ("d2.txt", "ACGT")])?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    let sig_size = engine.header().subs[0].sig_size;
    let hits = engine.query(b"ACGTAC", 10, 1, None, None)?;

    // d1 contains every query term: no false negatives means exactly 4.
    let d1 = hits.iter().find(|h| h.name == "d1").expect("d1 missing");
    assert_eq!(d1.count, 4);

    // d2 must report exactly what its own Bloom filter answers, so any
    // false positive the filter produces is also what the index produces.
    let mut d2_filter = BloomFilter::new(sig_size, 2, fnv1a)?;
    for term in [b"ACG".as_slice(), b"CGT".as_slice()] {
        d2_filter.insert(term);
    }
    let expected: u32 = [b"ACG".as_slice(), b"CGT".as_slice(), b"GTA".as_slice(), b"TAC".as_slice()]
        .iter()
        .filter(|t| d2_filter.contains(t))
        .count() as u32;
    let d2 = hits.iter().find(|h| h.name == "d2").expect("d2 missing");
    assert_eq!(d2.count, expected);
    assert!(d2.count >= 2, "false negative on d2");
    assert!(hits[0].name == "d1", "d1 must rank first");
    Ok(())
}

/// K_Q subset of K_d implies the reported count equals |K_Q|.
#[test]
fn test_no_false_negatives_over_random_corpus() -> Result<()> {
    let dir = tempdir()?;
    let sequence = "TTGACCGATTACCGGAATACCGGTTGACA";
    let list = build_corpus(
        dir.path(),
        &[
            ("container.txt", sequence),
            ("other.txt", "AAAAAAAAAAAAAAAAAAAA"),
        ],
    )?;
    let index = dir.path().join("classic.sgnx");
    let params = BuildParams {
        term_size: 5,
        num_hashes: 3,
        batch_size: 8,
        ..BuildParams::default()
    };
    build_classic(&list, &index, &params, &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    // Every window of the document is a subset query.
    for window in sequence.as_bytes().windows(12) {
        let unique: std::collections::HashSet<&[u8]> = window.windows(5).collect();
        let hits = engine.query(window, 10, 1, None, None)?;
        let container = hits
            .iter()
            .find(|h| h.name == "container")
            .expect("containment lost");
        assert_eq!(container.count as usize, unique.len());
    }
    Ok(())
}

#[test]
fn test_empty_and_short_queries_return_empty() -> Result<()> {
    let dir = tempdir()?;
    let list = build_corpus(dir.path(), &[("d1.txt", "ACGTAC")])?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    assert!(engine.query(b"", 10, 0, None, None)?.is_empty());
    assert!(engine.query(b"AC", 10, 0, None, None)?.is_empty());
    // Unrecognized bytes only: no terms either.
    assert!(engine.query(b"NNNNNNN", 10, 0, None, None)?.is_empty());
    Ok(())
}

/// A document with no recognized terms gets an all-zero column.
#[test]
fn test_zero_term_document_counts_zero() -> Result<()> {
    let dir = tempdir()?;
    let list = build_corpus(dir.path(), &[("d1.txt", "ACGTAC"), ("blank.txt", "NN-NN")])?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    let hits = engine.query(b"ACGTAC", 10, 0, None, None)?;
    let blank = hits.iter().find(|h| h.name == "blank").expect("blank missing");
    assert_eq!(blank.count, 0);
    // With a threshold it disappears.
    let hits = engine.query(b"ACGTAC", 10, 1, None, None)?;
    assert!(hits.iter().all(|h| h.name != "blank"));
    Ok(())
}

/// Column order of the built matrix is the document order, even when the
/// batch size does not divide the document count.
#[test]
fn test_column_stability_with_short_last_batch() -> Result<()> {
    let dir = tempdir()?;
    let docs: Vec<(String, String)> = (0..20)
        .map(|i| (format!("doc{:02}.txt", i), format!("ACGTACGTAC{:02}", i)))
        .collect();
    for (name, contents) in &docs {
        fs::write(dir.path().join(name), contents)?;
    }
    let list = DocumentList::from_directory(dir.path(), DocumentFilter::Any)?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let reader = ClassicReader::open(&index)?;
    let expected: Vec<String> = (0..20).map(|i| format!("doc{:02}", i)).collect();
    assert_eq!(reader.sub().columns, expected);
    Ok(())
}

/// The same query against the same index yields byte-identical results.
#[test]
fn test_query_determinism() -> Result<()> {
    let dir = tempdir()?;
    let list = build_corpus(
        dir.path(),
        &[
            ("a.txt", "ACGTACGTTGCA"),
            ("b.txt", "TGCATGCAACGT"),
            ("c.txt", "ACGTTGCATGCA"),
        ],
    )?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    let first = engine.query(b"ACGTTGCA", 10, 0, None, None)?;
    for _ in 0..5 {
        assert_eq!(engine.query(b"ACGTTGCA", 10, 0, None, None)?, first);
    }
    Ok(())
}

/// Repeated q-grams in the query contribute once.
#[test]
fn test_repeated_terms_count_once() -> Result<()> {
    let dir = tempdir()?;
    let list = build_corpus(dir.path(), &[("d1.txt", "AAAAAAAA")])?;
    let index = dir.path().join("classic.sgnx");
    build_classic(&list, &index, &tiny_params(), &NullSink, None)?;

    let mut engine = QueryEngine::open(&index, BackendKind::Buffered, 16)?;
    // "AAAAAA" has one distinct 3-mer.
    let hits = engine.query(b"AAAAAA", 10, 1, None, None)?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].count, 1);
    Ok(())
}
