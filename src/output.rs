//! Result types returned by a billing run.

use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happened to the mail for one record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MailStatus {
    /// Mailing was not enabled for this run. (default)
    #[default]
    NotRequested,
    /// The server accepted the message.
    Sent { recipient: String },
    /// Mailing was enabled but the record had no address.
    Skipped,
    /// The message could not be built or was refused.
    Failed,
}

/// The outcome of one record, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// 1-based batch line, `None` in single-record mode.
    pub row: Option<u64>,
    /// Member display name, once the record parsed.
    pub member: Option<String>,
    /// The generated invoice, when conversion succeeded.
    pub pdf: Option<PathBuf>,
    pub mail: MailStatus,
    /// First error met by this record.
    pub error: Option<RecordError>,
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Non-blank rows (or the one explicit record) seen.
    pub total_records: usize,
    /// PDFs written.
    pub generated: usize,
    /// Rows rejected while parsing.
    pub skipped: usize,
    /// Parsed records whose rendering or conversion failed.
    pub failed: usize,
    pub mails_sent: usize,
    /// Mails not sent: missing address, bad message or refused.
    pub mails_failed: usize,
    pub duration_ms: u64,
}

/// Everything a run produced, in source order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub records: Vec<RecordOutcome>,
    pub stats: BatchStats,
}

impl BatchReport {
    /// Paths of all generated invoices, in source order.
    pub fn generated_files(&self) -> Vec<&PathBuf> {
        self.records.iter().filter_map(|r| r.pdf.as_ref()).collect()
    }

    /// Records that carry an error, in source order.
    pub fn errors(&self) -> impl Iterator<Item = &RecordError> {
        self.records.iter().filter_map(|r| r.error.as_ref())
    }
}
