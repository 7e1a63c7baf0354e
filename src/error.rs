//! Unified error type for the signet library.
//!
//! Library code returns `SignetError`; the CLI boundary reduces each failure
//! to a single line carrying the stable kind identifier. Recoverable
//! conditions (skipped documents, async ring fallback) are logged at warning
//! level and never surface here.

use std::fmt;
use std::path::PathBuf;

/// Unified error type for the signet library.
#[derive(Debug)]
pub enum SignetError {
    /// I/O error with path context. Fatal to the current operation.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// Index file integrity failure (magic bytes, version, truncation).
    Format { path: PathBuf, detail: String },

    /// An input document that cannot be parsed.
    Input { path: PathBuf, detail: String },

    /// Invalid parameters or violated data invariants.
    Validation(String),

    /// A fixed-capacity resource was exceeded.
    Capacity {
        context: String,
        limit: usize,
        actual: usize,
    },
}

impl SignetError {
    /// Stable short identifier for the CLI boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            SignetError::Io { .. } => "io-failure",
            SignetError::Format { .. } => "integrity-failure",
            SignetError::Input { .. } => "input-malformed",
            SignetError::Validation(_) => "configuration-invalid",
            SignetError::Capacity { .. } => "capacity-exceeded",
        }
    }

    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        SignetError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Create an integrity/format error.
    pub fn format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        SignetError::Format {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a malformed-input error.
    pub fn input(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        SignetError::Input {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        SignetError::Validation(msg.into())
    }

    /// Create a capacity error.
    pub fn capacity(context: impl Into<String>, limit: usize, actual: usize) -> Self {
        SignetError::Capacity {
            context: context.into(),
            limit,
            actual,
        }
    }
}

impl fmt::Display for SignetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignetError::Io {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "I/O error during {} on '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            SignetError::Format { path, detail } => {
                write!(f, "invalid index in '{}': {}", path.display(), detail)
            }
            SignetError::Input { path, detail } => {
                write!(f, "malformed input '{}': {}", path.display(), detail)
            }
            SignetError::Validation(msg) => write!(f, "validation error: {}", msg),
            SignetError::Capacity {
                context,
                limit,
                actual,
            } => {
                write!(
                    f,
                    "capacity exceeded in {}: limit is {}, got {}",
                    context, limit, actual
                )
            }
        }
    }
}

impl std::error::Error for SignetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignetError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SignetError {
    fn from(err: std::io::Error) -> Self {
        SignetError::Io {
            path: PathBuf::new(),
            operation: "unknown",
            source: err,
        }
    }
}

/// Convenience type alias for Results using SignetError.
pub type Result<T> = std::result::Result<T, SignetError>;
