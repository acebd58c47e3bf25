//! Error types for the edgequake-batch2md library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`BatchError`] (**fatal**): the batch cannot be formed or its archive
//!   cannot be written (empty item list, dangling upload reference,
//!   cancellation, zip serialisation fault). Returned as `Err(BatchError)`
//!   from the batch entry points.
//!
//! * [`ItemError`] (**non-fatal**): a single item failed (wrong input shape,
//!   missing credential, failed download, converter error, timeout) but every other item is
//!   fine. Stored inside a failed [`crate::output::ConversionResult`] and
//!   written to `errors/` in the archive.
//!
//! * [`ConverterError`]: what an external converter raises. It never leaves
//!   the orchestrator as-is; it is always downgraded to
//!   [`ItemError::ConversionFailed`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-batch2md library.
///
/// Item-level failures use [`ItemError`] and are stored in
/// [`crate::output::ConversionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Boundary errors ───────────────────────────────────────────────────
    /// The batch contained no items.
    #[error("Batch is empty: at least one item is required")]
    EmptyBatch,

    /// An item descriptor cannot be turned into a request.
    #[error("Item #{index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Run errors ────────────────────────────────────────────────────────
    /// The batch was cancelled; no archive is produced.
    #[error("Batch cancelled before the archive was assembled")]
    Cancelled,

    /// Zip serialisation failed.
    #[error("Archive assembly failed: {detail}")]
    ArchiveAssemblyFailed { detail: String },

    /// Could not create or write the output archive file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<zip::result::ZipError> for BatchError {
    fn from(e: zip::result::ZipError) -> Self {
        BatchError::ArchiveAssemblyFailed {
            detail: e.to_string(),
        }
    }
}

impl From<std::io::Error> for BatchError {
    fn from(e: std::io::Error) -> Self {
        BatchError::ArchiveAssemblyFailed {
            detail: e.to_string(),
        }
    }
}

/// A non-fatal error for a single item.
///
/// The message is what ends up in `errors/{name}_error.md` and in the
/// failure section of `summary.md`.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemError {
    /// Content shape (binary / text / structured) does not fit the type.
    #[error("Invalid input for '{type_key}': expected {expected}, got {found}")]
    InvalidInputShape {
        type_key: String,
        expected: String,
        found: String,
    },

    /// A zip-based office file is not a zip container, which is how
    /// password-protected files are stored.
    #[error(
        "'{name}' is not a readable .{format} file. It is most likely password-protected; \
remove the password and upload it again."
    )]
    EncryptedContainer { name: String, format: String },

    /// No converter (and no fallback) exists for this type.
    #[error("Unsupported type '{type_key}'")]
    UnsupportedType { type_key: String },

    /// The item's category calls a credentialed service and no credential was given.
    #[error("An API key is required to convert {category} items")]
    CredentialRequired { category: String },

    /// A remote file reference could not be fetched.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// A remote file reference exceeded the download timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The converter raised.
    #[error("Conversion failed: {detail}")]
    ConversionFailed { detail: String },

    /// The item exceeded its timeout.
    #[error("Conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The batch was cancelled before this item finished.
    #[error("Conversion cancelled")]
    Cancelled,
}

/// Error raised by a converter: a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConverterError {
    pub message: String,
}

impl ConverterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ConverterError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ConverterError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<ConverterError> for ItemError {
    fn from(e: ConverterError) -> Self {
        ItemError::ConversionFailed { detail: e.message }
    }
}
