//! Build parameter handling and validation.
//!
//! All configuration checks live here so every entry point (CLI flags, TOML
//! config file, library callers) refuses an invalid parameter set the same
//! way, before any output is created.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, SignetError};
use crate::hashing::{fnv1a, HashFamily};

/// Smallest permitted device page; page sizes must be multiples of this.
pub const MIN_PAGE_SIZE: usize = 4096;

/// Upper bound on the term size; windows larger than this are not useful for
/// the signature scheme and would blow up scratch buffers.
pub const MAX_TERM_SIZE: usize = 256;

/// Parameters of one index build.
#[derive(Debug, Clone)]
pub struct BuildParams {
    /// q-gram width.
    pub term_size: usize,
    /// Number of Bloom hash functions per term.
    pub num_hashes: u16,
    /// Target false-positive rate per term, exclusive (0, 1).
    pub false_positive_rate: f64,
    /// Replace each term by min(term, reverse complement).
    pub canonicalize: bool,
    /// Documents per build batch (columns per level-0 block).
    pub batch_size: usize,
    /// Documents per compact sub-index.
    pub group_size: usize,
    /// Device page size for the compact layout.
    pub page_size: usize,
    /// Worker threads; 0 lets rayon decide.
    pub threads: usize,
    /// Hash family shared by build and query.
    pub hasher: HashFamily,
}

impl Default for BuildParams {
    fn default() -> Self {
        BuildParams {
            term_size: 31,
            num_hashes: 3,
            false_positive_rate: 0.3,
            canonicalize: false,
            batch_size: 32,
            group_size: 64,
            page_size: MIN_PAGE_SIZE,
            threads: 0,
            hasher: fnv1a,
        }
    }
}

impl BuildParams {
    /// Refuse parameter sets the index format or the build pipeline cannot
    /// honor. Called once at startup by every entry point.
    pub fn validate(&self) -> Result<()> {
        if self.term_size == 0 || self.term_size > MAX_TERM_SIZE {
            return Err(SignetError::validation(format!(
                "term size must be in 1..={} (got {})",
                MAX_TERM_SIZE, self.term_size
            )));
        }
        if self.num_hashes == 0 {
            return Err(SignetError::validation("number of hashes must be nonzero"));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(SignetError::validation(format!(
                "false-positive rate must be in (0, 1) (got {})",
                self.false_positive_rate
            )));
        }
        if self.batch_size == 0 || self.batch_size % 8 != 0 {
            return Err(SignetError::validation(format!(
                "batch size must be a nonzero multiple of 8 (got {})",
                self.batch_size
            )));
        }
        if self.group_size == 0 || self.group_size % 8 != 0 {
            return Err(SignetError::validation(format!(
                "group size must be a nonzero multiple of 8 (got {})",
                self.group_size
            )));
        }
        if !self.page_size.is_power_of_two() || self.page_size % MIN_PAGE_SIZE != 0 {
            return Err(SignetError::validation(format!(
                "page size must be a power of two and a multiple of {} (got {})",
                MIN_PAGE_SIZE, self.page_size
            )));
        }
        // Row width of a full group must fit a page and pack it evenly,
        // otherwise sub-index rows cannot stay page-aligned.
        let row_width = self.group_size / 8;
        if row_width > self.page_size || self.page_size % row_width != 0 {
            return Err(SignetError::validation(format!(
                "group size {} does not pack into page size {} (row width {})",
                self.group_size, self.page_size, row_width
            )));
        }
        Ok(())
    }
}

/// TOML build configuration, mirroring the CLI flags.
///
/// Every field is optional; missing fields keep their defaults so a config
/// file can pin just the parameters a corpus cares about.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub index: IndexSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexSettings {
    pub term_size: Option<usize>,
    pub num_hashes: Option<u16>,
    pub false_positive_rate: Option<f64>,
    pub canonicalize: Option<bool>,
    pub batch_size: Option<usize>,
    pub group_size: Option<usize>,
    pub page_size: Option<usize>,
    pub threads: Option<usize>,
}

/// Parse a TOML config file and fold it over `base`.
///
/// The merged parameter set is validated before it is returned.
pub fn load_config(path: &Path, base: BuildParams) -> Result<BuildParams> {
    let contents = fs::read_to_string(path).map_err(|e| SignetError::io(path, "read", e))?;

    let config: ConfigFile = toml::from_str(&contents)
        .map_err(|e| SignetError::validation(format!("bad config '{}': {}", path.display(), e)))?;

    let s = config.index;
    let merged = BuildParams {
        term_size: s.term_size.unwrap_or(base.term_size),
        num_hashes: s.num_hashes.unwrap_or(base.num_hashes),
        false_positive_rate: s.false_positive_rate.unwrap_or(base.false_positive_rate),
        canonicalize: s.canonicalize.unwrap_or(base.canonicalize),
        batch_size: s.batch_size.unwrap_or(base.batch_size),
        group_size: s.group_size.unwrap_or(base.group_size),
        page_size: s.page_size.unwrap_or(base.page_size),
        threads: s.threads.unwrap_or(base.threads),
        hasher: base.hasher,
    };
    merged.validate()?;
    Ok(merged)
}
