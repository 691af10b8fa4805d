//! Error types for the sjb-billing library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BillError`] — **Fatal**: the run cannot proceed at all (batch file
//!   missing, template missing, SMTP login rejected). Returned as
//!   `Err(BillError)` from the top-level `generate*` functions.
//!
//! * [`RecordError`] — **Non-fatal**: a single record failed (malformed row,
//!   converter crash, recipient refused) but every other record is fine.
//!   Stored inside [`crate::output::RecordOutcome`] so one bad line never
//!   costs the rest of the batch.
//!
//! In single-record mode there is nothing else to continue with, so a
//! `RecordError` is surfaced as [`BillError::Record`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the sjb-billing library.
#[derive(Debug, Error)]
pub enum BillError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The batch file was not found at the given path.
    #[error("Batch file not found: '{path}'\nCheck the path exists and is readable.")]
    BatchFileNotFound { path: PathBuf },

    /// The batch file exists but could not be opened.
    #[error("Cannot read batch file '{path}': {detail}")]
    BatchFileUnreadable { path: PathBuf, detail: String },

    /// Neither a complete single record nor a batch file was supplied, or both were.
    #[error("{0}\nRun the command again with --help.")]
    Usage(String),

    // ── Template errors ───────────────────────────────────────────────────
    /// The invoice template does not exist in the template directory.
    #[error("Template '{name}' not found in '{dir}'")]
    TemplateNotFound { dir: PathBuf, name: String },

    /// The invoice template exists but does not parse.
    #[error("Template '{name}' is invalid: {detail}")]
    TemplateInvalid { name: String, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create the output directory for generated invoices.
    #[error("Cannot prepare output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Mail transport errors ─────────────────────────────────────────────
    /// The SMTP endpoint could not be reached or the TLS handshake failed.
    #[error("Cannot connect to SMTP server {host}:{port}: {detail}")]
    Connection {
        host: String,
        port: u16,
        detail: String,
    },

    /// The SMTP server rejected the login.
    #[error("SMTP authentication failed for '{login}': {detail}")]
    Authentication { login: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Record errors (single-record mode) ────────────────────────────────
    /// The only record of the run failed.
    #[error(transparent)]
    Record(#[from] RecordError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single record.
///
/// `row` is the 1-based line number in the batch file, `None` for a record
/// built from explicit arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RecordError {
    /// A required field is absent or empty.
    #[error("{}missing required field '{field}'", row_prefix(.row))]
    MissingField { row: Option<u64>, field: String },

    /// The row has fewer columns than the active schema requires.
    #[error("row {row}: a field is missing ({found} of {expected} columns) in {line:?}, the line is ignored")]
    MalformedRow {
        row: u64,
        found: usize,
        expected: usize,
        line: String,
    },

    /// The amount is not a non-negative decimal number.
    #[error("{}invalid amount {value:?}", row_prefix(.row))]
    InvalidAmount { row: Option<u64>, value: String },

    /// The row could not be decoded (e.g. invalid UTF-8).
    #[error("row {row}: unreadable line: {detail}")]
    UnreadableRow { row: u64, detail: String },

    /// Template rendering failed for this person.
    #[error("rendering invoice for {member} failed: {detail}")]
    Render { member: String, detail: String },

    /// The intermediate HTML file could not be written or read back.
    #[error("cannot write '{path}': {detail}")]
    WriteFailed { path: PathBuf, detail: String },

    /// The document converter reported a failure.
    #[error("PDF conversion of '{source_path}' failed: {detail}")]
    Conversion { source_path: PathBuf, detail: String },

    /// Mailing was requested but the record carries no address.
    #[error("{}no email specified for {member}, email not sent", row_prefix(.row))]
    MissingEmail { row: Option<u64>, member: String },

    /// The invoice could not be read back to attach it.
    #[error("cannot attach '{path}': {detail}")]
    Attachment { path: PathBuf, detail: String },

    /// An address or header could not be turned into a message.
    #[error("cannot build message for {recipient}: {detail}")]
    InvalidMessage { recipient: String, detail: String },

    /// The SMTP server refused the message.
    #[error("sending to {recipient} failed: {detail}")]
    Dispatch { recipient: String, detail: String },
}

fn row_prefix(row: &Option<u64>) -> String {
    match row {
        Some(r) => format!("row {r}: "),
        None => String::new(),
    }
}

impl RecordError {
    /// Whether the error happened while parsing the record, before any
    /// document work started.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            RecordError::MissingField { .. }
                | RecordError::MalformedRow { .. }
                | RecordError::InvalidAmount { .. }
                | RecordError::UnreadableRow { .. }
        )
    }
}
