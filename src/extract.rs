//! q-gram extraction.
//!
//! Turns a `DocumentEntry` into its finite stream of fixed-width terms. The
//! stream is delivered through a callback with a borrowed slice; the scratch
//! buffers live for the whole document so nothing is allocated per term.

use needletail::parse_fastx_file;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::documents::{DocumentEntry, DocumentKind};
use crate::error::{Result, SignetError};

/// Magic prefix of pre-built k-mer buffer documents.
pub const KMER_BUFFER_MAGIC: [u8; 4] = *b"SGND";
/// Version of the k-mer buffer document format.
pub const KMER_BUFFER_VERSION: u16 = 1;

// 0 marks bytes outside the recognized alphabet; everything else maps to the
// uppercase base.
const BASE_LUT: [u8; 256] = {
    let mut lut = [0u8; 256];
    lut[b'A' as usize] = b'A';
    lut[b'a' as usize] = b'A';
    lut[b'C' as usize] = b'C';
    lut[b'c' as usize] = b'C';
    lut[b'G' as usize] = b'G';
    lut[b'g' as usize] = b'G';
    lut[b'T' as usize] = b'T';
    lut[b't' as usize] = b'T';
    lut
};

const COMPLEMENT: [u8; 256] = {
    let mut lut = [0u8; 256];
    lut[b'A' as usize] = b'T';
    lut[b'T' as usize] = b'A';
    lut[b'C' as usize] = b'G';
    lut[b'G' as usize] = b'C';
    lut
};

/// Streams the canonical q-grams of documents.
pub struct KmerExtractor {
    q: usize,
    canonical: bool,
}

impl KmerExtractor {
    pub fn new(q: usize, canonical: bool) -> Result<Self> {
        if q == 0 {
            return Err(SignetError::validation("term size must be nonzero"));
        }
        Ok(KmerExtractor { q, canonical })
    }

    pub fn term_size(&self) -> usize {
        self.q
    }

    /// Emit every q-gram of `entry` in document order.
    pub fn process<F>(&self, entry: &DocumentEntry, mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut scratch = Scratch::new(self.q);
        match entry.kind {
            DocumentKind::Text => {
                let data = fs::read(&entry.path)
                    .map_err(|e| SignetError::io(&entry.path, "read", e))?;
                self.scan_sequence(&data, &mut scratch, &mut emit);
            }
            DocumentKind::Fasta | DocumentKind::Fastq => {
                self.scan_record(entry, &mut scratch, &mut emit)?;
            }
            DocumentKind::KmerBuffer => {
                self.stream_buffer(&entry.path, &mut emit)?;
            }
            DocumentKind::Cortex => {
                self.scan_cortex(&entry.path, &mut scratch, &mut emit)?;
            }
        }
        Ok(())
    }

    /// Collect the deduplicated q-grams of a query sequence, first-seen
    /// order (the order has no effect on counts but keeps runs identical).
    pub fn unique_terms(&self, seq: &[u8]) -> Vec<Vec<u8>> {
        let mut scratch = Scratch::new(self.q);
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut terms = Vec::new();
        self.scan_sequence(seq, &mut scratch, &mut |term: &[u8]| {
            if seen.insert(term.to_vec()) {
                terms.push(term.to_vec());
            }
        });
        terms
    }

    /// Slide a q-wide window over `seq`. Bytes outside the alphabet truncate
    /// the window; the scan resumes after them.
    fn scan_sequence<F>(&self, seq: &[u8], scratch: &mut Scratch, emit: &mut F)
    where
        F: FnMut(&[u8]),
    {
        scratch.window.clear();
        for &byte in seq {
            let base = BASE_LUT[byte as usize];
            if base == 0 {
                scratch.window.clear();
                continue;
            }
            if scratch.window.len() == self.q {
                scratch.window.copy_within(1.., 0);
                *scratch.window.last_mut().unwrap() = base;
            } else {
                scratch.window.push(base);
            }
            if scratch.window.len() == self.q {
                self.emit_term(scratch, emit);
            }
        }
    }

    fn emit_term<F>(&self, scratch: &mut Scratch, emit: &mut F)
    where
        F: FnMut(&[u8]),
    {
        if !self.canonical {
            emit(&scratch.window);
            return;
        }
        scratch.revcomp.clear();
        scratch
            .revcomp
            .extend(scratch.window.iter().rev().map(|&b| COMPLEMENT[b as usize]));
        if scratch.revcomp.as_slice() < scratch.window.as_slice() {
            emit(&scratch.revcomp);
        } else {
            emit(&scratch.window);
        }
    }

    /// Scan the sub-document record of a FASTA/FASTQ entry.
    fn scan_record<F>(&self, entry: &DocumentEntry, scratch: &mut Scratch, emit: &mut F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut reader = parse_fastx_file(&entry.path)
            .map_err(|e| SignetError::input(&entry.path, e.to_string()))?;
        let mut index = 0u32;
        while let Some(record) = reader.next() {
            let record = record
                .map_err(|e| SignetError::input(&entry.path, format!("record {}: {}", index, e)))?;
            if index == entry.subdoc_index {
                self.scan_sequence(&record.seq(), scratch, emit);
                return Ok(());
            }
            index += 1;
        }
        Err(SignetError::input(
            &entry.path,
            format!("sub-document {} out of range", entry.subdoc_index),
        ))
    }

    /// Stream a pre-built k-mer buffer verbatim.
    fn stream_buffer<F>(&self, path: &Path, emit: &mut F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let data = fs::read(path).map_err(|e| SignetError::io(path, "read", e))?;
        let mut r = ByteReader::new(&data, path);
        let magic: [u8; 4] = r.read_array()?;
        if magic != KMER_BUFFER_MAGIC {
            return Err(SignetError::input(path, "bad k-mer buffer magic"));
        }
        let version = r.read_u16()?;
        if version != KMER_BUFFER_VERSION {
            return Err(SignetError::input(
                path,
                format!("unsupported k-mer buffer version {}", version),
            ));
        }
        let q = r.read_u32()? as usize;
        if q != self.q {
            return Err(SignetError::input(
                path,
                format!("buffer term size {} does not match build term size {}", q, self.q),
            ));
        }
        let body = r.rest();
        if body.len() % q != 0 {
            return Err(SignetError::input(path, "trailing partial term"));
        }
        for term in body.chunks_exact(q) {
            emit(term);
        }
        Ok(())
    }

    /// Decode the 2-bit packed term field of each Cortex record and emit its
    /// q-gram windows.
    fn scan_cortex<F>(&self, path: &Path, scratch: &mut Scratch, emit: &mut F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let data = fs::read(path).map_err(|e| SignetError::io(path, "read", e))?;
        let mut r = ByteReader::new(&data, path);

        let magic: [u8; 6] = r.read_array()?;
        if &magic != b"CORTEX" {
            return Err(SignetError::input(path, "bad cortex magic"));
        }
        let version = r.read_u32()?;
        if version != 6 {
            return Err(SignetError::input(
                path,
                format!("unsupported cortex version {}", version),
            ));
        }
        let kmer_size = r.read_u32()? as usize;
        let words_per_kmer = r.read_u32()? as usize;
        let num_colours = r.read_u32()? as usize;
        if kmer_size == 0 || words_per_kmer == 0 || words_per_kmer < kmer_size.div_ceil(32) {
            return Err(SignetError::input(path, "inconsistent cortex k-mer geometry"));
        }
        if self.q > kmer_size {
            return Err(SignetError::input(
                path,
                format!("cortex k-mer size {} smaller than term size {}", kmer_size, self.q),
            ));
        }

        // Per-colour metadata is irrelevant to extraction; skip it
        // field-by-field.
        r.skip(num_colours * 4)?; // mean read lengths
        r.skip(num_colours * 8)?; // total sequence lengths
        for _ in 0..num_colours {
            let len = r.read_u32()? as usize;
            r.skip(len)?; // sample name
        }
        r.skip(num_colours * 16)?; // sequencing error rates (long double)
        for _ in 0..num_colours {
            r.skip(4)?; // cleaning flags
            r.skip(8)?; // cleaning thresholds
            let len = r.read_u32()? as usize;
            r.skip(len)?; // graph name
        }
        let closing: [u8; 6] = r.read_array()?;
        if &closing != b"CORTEX" {
            return Err(SignetError::input(path, "bad cortex header terminator"));
        }

        let record_len = words_per_kmer * 8 + num_colours * 5;
        let body = r.rest();
        if body.len() % record_len != 0 {
            return Err(SignetError::input(path, "truncated cortex record"));
        }

        let mut decoded = vec![0u8; kmer_size];
        for record in body.chunks_exact(record_len) {
            for (j, base) in decoded.iter_mut().enumerate() {
                let word_bytes: [u8; 8] = record[(j / 32) * 8..(j / 32) * 8 + 8]
                    .try_into()
                    .unwrap();
                let word = u64::from_le_bytes(word_bytes);
                *base = b"ACGT"[((word >> (2 * (j % 32))) & 3) as usize];
            }
            self.scan_sequence(&decoded, scratch, emit);
        }
        Ok(())
    }
}

struct Scratch {
    window: Vec<u8>,
    revcomp: Vec<u8>,
}

impl Scratch {
    fn new(q: usize) -> Self {
        Scratch {
            window: Vec::with_capacity(q),
            revcomp: Vec::with_capacity(q),
        }
    }
}

/// Bounds-checked little-endian cursor over a loaded document.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8], path: &'a Path) -> Self {
        ByteReader { buf, pos: 0, path }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(SignetError::input(self.path, "unexpected end of file"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn rest(self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
