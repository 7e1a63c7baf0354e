//! On-disk index header, shared by the classic and compact forms.
//!
//! Layout: 4 magic bytes, u16 version, u32 payload length, then the payload
//! (page size, term size, flags, sub-index descriptors with length-prefixed
//! column names). The compact form pads with zeros to the next page boundary
//! after the header; the classic form starts row data immediately.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, SignetError};

pub const MAGIC: [u8; 4] = *b"SGNX";
pub const VERSION: u16 = 1;

/// Header flag bit: terms were canonicalized at build time.
pub const FLAG_CANONICAL: u8 = 0b0000_0001;

// Bounds applied when loading untrusted headers.
const MAX_SUB_INDICES: u32 = 1 << 20;
const MAX_COLUMNS: u32 = 1 << 28;
const MAX_NAME_LENGTH: u32 = 4096;

/// Parameters of one sub-index (one size class).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubIndexMeta {
    /// Number of signature rows (m).
    pub sig_size: u64,
    /// Bloom hash count (k).
    pub num_hashes: u16,
    /// Column names in matrix order.
    pub columns: Vec<String>,
}

impl SubIndexMeta {
    /// Bytes of column data per row, before page padding.
    pub fn row_width(&self) -> usize {
        self.columns.len().div_ceil(8)
    }
}

/// Parsed index header, common to both on-disk forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Page size of the compact layout; 0 marks the unpaged classic form.
    pub page_size: u32,
    /// q-gram width the index was built with.
    pub term_size: u32,
    /// Terms were canonicalized at build time.
    pub canonical: bool,
    pub subs: Vec<SubIndexMeta>,
}

impl IndexHeader {
    pub fn is_compact(&self) -> bool {
        self.page_size != 0
    }

    /// Row stride in bytes for sub-index `s`: a full page in the compact
    /// form, the bare row width in the classic form.
    pub fn row_stride(&self, s: usize) -> u64 {
        if self.is_compact() {
            self.page_size as u64
        } else {
            self.subs[s].row_width() as u64
        }
    }

    /// Serialize the header; returns the file offset where row data begins
    /// (page-aligned for the compact form, padding written).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<u64> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.page_size.to_le_bytes());
        payload.extend_from_slice(&self.term_size.to_le_bytes());
        payload.push(if self.canonical { FLAG_CANONICAL } else { 0 });
        payload.extend_from_slice(&(self.subs.len() as u32).to_le_bytes());
        for sub in &self.subs {
            payload.extend_from_slice(&sub.sig_size.to_le_bytes());
            payload.extend_from_slice(&sub.num_hashes.to_le_bytes());
            payload.extend_from_slice(&(sub.columns.len() as u32).to_le_bytes());
            for name in &sub.columns {
                payload.extend_from_slice(&(name.len() as u32).to_le_bytes());
                payload.extend_from_slice(name.as_bytes());
            }
        }

        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&payload)?;

        let written = (MAGIC.len() + 2 + 4 + payload.len()) as u64;
        if !self.is_compact() {
            return Ok(written);
        }
        let data_start = written.next_multiple_of(self.page_size as u64);
        let padding = vec![0u8; (data_start - written) as usize];
        writer.write_all(&padding)?;
        Ok(data_start)
    }

    /// Parse and validate a header; returns it with the offset where row
    /// data begins.
    pub fn read_from<R: Read>(reader: &mut R, path: &Path) -> Result<(IndexHeader, u64)> {
        let corrupt = |detail: &str| SignetError::format(path, detail.to_string());

        let mut fixed = [0u8; 10];
        reader
            .read_exact(&mut fixed)
            .map_err(|_| corrupt("truncated header"))?;
        if fixed[0..4] != MAGIC {
            return Err(corrupt("bad magic bytes"));
        }
        let version = u16::from_le_bytes(fixed[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(SignetError::format(
                path,
                format!("unsupported version {} (expected {})", version, VERSION),
            ));
        }
        let payload_len = u32::from_le_bytes(fixed[6..10].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .map_err(|_| corrupt("truncated header payload"))?;

        let mut cursor = Cursor {
            buf: &payload,
            pos: 0,
        };
        let page_size = cursor.read_u32().ok_or_else(|| corrupt("short payload"))?;
        if page_size != 0 && !page_size.is_power_of_two() {
            return Err(corrupt("page size is not a power of two"));
        }
        let term_size = cursor.read_u32().ok_or_else(|| corrupt("short payload"))?;
        if term_size == 0 {
            return Err(corrupt("zero term size"));
        }
        let flags = cursor.read_u8().ok_or_else(|| corrupt("short payload"))?;
        let sub_count = cursor.read_u32().ok_or_else(|| corrupt("short payload"))?;
        if sub_count > MAX_SUB_INDICES {
            return Err(corrupt("implausible sub-index count"));
        }

        let mut subs = Vec::with_capacity(sub_count as usize);
        for _ in 0..sub_count {
            let sig_size = cursor.read_u64().ok_or_else(|| corrupt("short payload"))?;
            if sig_size == 0 {
                return Err(corrupt("zero signature size"));
            }
            let num_hashes = cursor.read_u16().ok_or_else(|| corrupt("short payload"))?;
            if num_hashes == 0 {
                return Err(corrupt("zero hash count"));
            }
            let columns = cursor.read_u32().ok_or_else(|| corrupt("short payload"))?;
            if columns > MAX_COLUMNS {
                return Err(corrupt("implausible column count"));
            }
            let mut names = Vec::with_capacity(columns as usize);
            for _ in 0..columns {
                let len = cursor.read_u32().ok_or_else(|| corrupt("short payload"))?;
                if len > MAX_NAME_LENGTH {
                    return Err(corrupt("implausible name length"));
                }
                let bytes = cursor
                    .read_bytes(len as usize)
                    .ok_or_else(|| corrupt("short payload"))?;
                let name = String::from_utf8(bytes.to_vec())
                    .map_err(|_| corrupt("column name is not UTF-8"))?;
                names.push(name);
            }
            subs.push(SubIndexMeta {
                sig_size,
                num_hashes,
                columns: names,
            });
        }
        if cursor.pos != payload.len() {
            return Err(corrupt("trailing bytes in header payload"));
        }

        let header = IndexHeader {
            page_size,
            term_size,
            canonical: flags & FLAG_CANONICAL != 0,
            subs,
        };
        let header_bytes = (MAGIC.len() + 2 + 4 + payload_len) as u64;
        let data_start = if header.is_compact() {
            header_bytes.next_multiple_of(page_size as u64)
        } else {
            header_bytes
        };
        Ok((header, data_start))
    }

    /// Absolute base offset of each sub-index, given the data start offset.
    pub fn sub_offsets(&self, data_start: u64) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.subs.len());
        let mut pos = data_start;
        for (s, sub) in self.subs.iter().enumerate() {
            offsets.push(pos);
            pos += sub.sig_size * self.row_stride(s);
        }
        offsets
    }

    /// Expected total file length; used to detect truncation at open.
    pub fn expected_len(&self, data_start: u64) -> u64 {
        let mut len = data_start;
        for (s, sub) in self.subs.iter().enumerate() {
            len += sub.sig_size * self.row_stride(s);
        }
        len
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.read_bytes(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;
    use std::path::PathBuf;

    fn sample_header(page_size: u32) -> IndexHeader {
        IndexHeader {
            page_size,
            term_size: 31,
            canonical: true,
            subs: vec![
                SubIndexMeta {
                    sig_size: 4096,
                    num_hashes: 3,
                    columns: vec!["a".into(), "b".into(), "c:0".into()],
                },
                SubIndexMeta {
                    sig_size: 8192,
                    num_hashes: 3,
                    columns: vec!["d".into()],
                },
            ],
        }
    }

    #[test]
    fn test_round_trip_compact() {
        let header = sample_header(4096);
        let mut buf = Vec::new();
        let data_start = header.write_to(&mut buf).unwrap();

        assert_eq!(data_start % 4096, 0);
        assert_eq!(buf.len() as u64, data_start);

        let (parsed, parsed_start) =
            IndexHeader::read_from(&mut IoCursor::new(&buf), &PathBuf::from("t")).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed_start, data_start);
    }

    #[test]
    fn test_round_trip_classic() {
        let header = IndexHeader {
            page_size: 0,
            term_size: 3,
            canonical: false,
            subs: vec![SubIndexMeta {
                sig_size: 64,
                num_hashes: 2,
                columns: vec!["d1".into(), "d2".into()],
            }],
        };
        let mut buf = Vec::new();
        let data_start = header.write_to(&mut buf).unwrap();
        // Classic form: no padding, rows start right after the payload.
        assert_eq!(data_start, buf.len() as u64);

        let (parsed, parsed_start) =
            IndexHeader::read_from(&mut IoCursor::new(&buf), &PathBuf::from("t")).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed_start, data_start);
    }

    #[test]
    fn test_sub_offsets_are_page_multiples() {
        let header = sample_header(4096);
        let offsets = header.sub_offsets(4096);
        assert_eq!(offsets, vec![4096, 4096 + 4096 * 4096]);
        for offset in offsets {
            assert_eq!(offset % 4096, 0);
        }
    }

    #[test]
    fn test_corrupt_magic_rejected() {
        let header = sample_header(4096);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf[0] ^= 0xFF;

        let err = IndexHeader::read_from(&mut IoCursor::new(&buf), &PathBuf::from("t"))
            .unwrap_err();
        assert_eq!(err.kind(), "integrity-failure");
    }

    #[test]
    fn test_bad_version_rejected() {
        let header = sample_header(4096);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf[4] = 0xEE;

        assert!(IndexHeader::read_from(&mut IoCursor::new(&buf), &PathBuf::from("t")).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let header = sample_header(4096);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf.truncate(20);

        let err = IndexHeader::read_from(&mut IoCursor::new(&buf), &PathBuf::from("t"))
            .unwrap_err();
        assert_eq!(err.kind(), "integrity-failure");
    }
}
