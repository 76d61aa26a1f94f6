//! Centralized error types for maildedup.

use std::path::PathBuf;
use thiserror::Error;

/// Minimum number of canonical headers a mail must expose to be hashable.
///
/// Below this count the header signal is too weak and unrelated mails would
/// collide on the same hash.
pub const MINIMAL_HEADERS_COUNT: usize = 4;

/// All errors produced by the maildedup library.
#[derive(Error, Debug)]
pub enum DedupError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified mail source does not exist.
    #[error("Mail source not found: {0}")]
    SourceNotFound(PathBuf),

    /// The same source path was registered twice.
    #[error("Mail source already registered: {0}")]
    DuplicateSource(PathBuf),

    /// The path is neither an mbox file nor a maildir folder.
    #[error("Unrecognized mail source structure: {0}")]
    UnknownBoxFormat(PathBuf),

    /// A maildir is missing one of its required sub-directories.
    #[error("'{path}' is not a maildir (missing '{subdir}' sub-directory)")]
    InvalidMaildir { path: PathBuf, subdir: &'static str },

    /// The export target already exists and append mode is off.
    #[error("Export target already exists: {0}")]
    ExportExists(PathBuf),

    /// A message identifier unknown to its container.
    #[error("No message '{id}' in '{path}'")]
    UnknownMailId { path: PathBuf, id: String },

    /// The mail exposes too few canonical headers to be safely hashed.
    #[error("{found} canonical headers found, {MINIMAL_HEADERS_COUNT} required")]
    TooFewHeaders { found: usize },

    /// Two mails of a duplicate set differ in size beyond the threshold.
    #[error("Mail size difference above threshold")]
    SizeDiffAboveThreshold,

    /// Two mails of a duplicate set differ in content beyond the threshold.
    #[error("Mail content difference above threshold")]
    ContentDiffAboveThreshold,

    /// A mail body could not be decoded with its declared charset.
    #[error("Undecodable mail content: {0}")]
    Encoding(String),

    /// Invalid configuration (bad header name, threshold, option coupling).
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The statistics self-audit uncovered a broken invariant.
    #[error("Inconsistent statistics: {0}")]
    StatsInconsistency(String),
}

/// Convenience alias for `Result<T, DedupError>`.
pub type Result<T> = std::result::Result<T, DedupError>;

impl DedupError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
