//! Error types for the stardict-reader crate.

use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum DictError {
    /// An error originating from I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The `.ifo` file is missing its magic banner, a required key, or has a
    /// non-numeric value where a number is required.
    #[error("malformed ifo file {path}: {reason}")]
    MalformedIfo { path: PathBuf, reason: String },

    /// None of the expected companion files is present for a dictionary stem.
    #[error("no {kind} file found for {stem}")]
    MissingFile { stem: PathBuf, kind: &'static str },

    /// The headword index (or its page cache) does not match its declared
    /// layout.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Walking an article with its declared field schema would read past the
    /// record's declared size.
    #[error("corrupt article at offset {offset}: {reason}")]
    CorruptArticle { offset: u32, reason: String },

    /// Inflating a gzip or dictzip payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),
}

/// A convenience `Result` type alias using the crate's [`DictError`] type.
pub type Result<T> = std::result::Result<T, DictError>;
