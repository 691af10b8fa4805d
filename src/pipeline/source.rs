//! Record sources: one explicit record, or a semicolon-delimited batch file.
//!
//! Batch files have no header, no quoting and one record per line. Fields
//! are mapped by position through the active [`Schema`]'s
//! [`ColumnLayout`](crate::config::ColumnLayout). Rows are parsed lazily so a
//! large file is never held in memory, and every row error is yielded as an
//! `Err` item instead of ending the iteration.

use crate::config::{Schema, SchemaSelection};
use crate::error::{BillError, RecordError};
use crate::record::{BillRecord, RecordFields};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the records of a run come from.
#[derive(Debug)]
pub enum RecordSource {
    /// Exactly one record built from explicit inputs.
    Single(BillRecord),
    /// A batch file, opened and ready to iterate.
    Batch(BatchFile),
}

impl RecordSource {
    /// Whether this source holds exactly one record. A failure of that record
    /// is the outcome of the whole run.
    pub fn is_single(&self) -> bool {
        matches!(self, RecordSource::Single(_))
    }

    /// Lazy iterator over records in source order.
    pub fn records(self) -> Box<dyn Iterator<Item = Result<BillRecord, RecordError>> + Send> {
        match self {
            RecordSource::Single(record) => Box::new(std::iter::once(Ok(record))),
            RecordSource::Batch(file) => Box::new(file.into_records()),
        }
    }
}

/// An opened batch file.
#[derive(Debug)]
pub struct BatchFile {
    path: PathBuf,
    file: File,
    selection: SchemaSelection,
}

impl BatchFile {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>, selection: SchemaSelection) -> Result<Self, BillError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(BillError::BatchFileNotFound { path });
        }

        let file = File::open(&path).map_err(|e| BillError::BatchFileUnreadable {
            path: path.clone(),
            detail: e.to_string(),
        })?;

        info!("Reading records from {}", path.display());
        Ok(Self {
            path,
            file,
            selection,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the file into a lazy record iterator.
    pub fn into_records(self) -> BatchRecords {
        BatchRecords {
            lines: BufReader::new(self.file).split(b'\n'),
            line: 0,
            selection: self.selection,
            schema: None,
        }
    }
}

/// Iterator over the records of a [`BatchFile`].
///
/// Line numbers are physical: blank lines count, `\r\n` and `\n` endings
/// both end one line.
pub struct BatchRecords {
    lines: std::io::Split<BufReader<File>>,
    /// Number of the last line read, 1-based.
    line: u64,
    selection: SchemaSelection,
    /// Fixed by the first non-blank row.
    schema: Option<Schema>,
}

impl BatchRecords {
    /// The schema in use, once the first row has been seen.
    pub fn schema(&self) -> Option<Schema> {
        self.schema
    }
}

impl Iterator for BatchRecords {
    type Item = Result<BillRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.lines.next()?;
            self.line += 1;
            let line = self.line;

            let row = match raw.map_err(|e| e.to_string()).and_then(|bytes| split_row(&bytes)) {
                Ok(row) => row,
                Err(detail) => return Some(Err(RecordError::UnreadableRow { row: line, detail })),
            };

            if row.iter().all(|f| f.trim().is_empty()) {
                debug!("row {}: blank line skipped", line);
                continue;
            }

            let schema = *self
                .schema
                .get_or_insert_with(|| self.selection.resolve(row.len()));
            return Some(parse_row(&row, line, schema));
        }
    }
}

/// Split one physical line (without its `\n`) into `;`-separated fields.
/// Quotes are ordinary characters.
fn split_row(line: &[u8]) -> Result<csv::StringRecord, String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(line);
    let mut record = csv::StringRecord::new();
    reader
        .read_record(&mut record)
        .map_err(|e| e.to_string())?;
    Ok(record)
}

/// Map one row onto a record using the schema's column layout.
pub fn parse_row(
    row: &csv::StringRecord,
    line: u64,
    schema: Schema,
) -> Result<BillRecord, RecordError> {
    let layout = schema.layout();
    if row.len() < layout.required {
        return Err(RecordError::MalformedRow {
            row: line,
            found: row.len(),
            expected: layout.required,
            line: row.iter().collect::<Vec<_>>().join(";"),
        });
    }

    let column = |idx: Option<usize>| idx.and_then(|i| row.get(i));
    RecordFields {
        billed_last_name: row.get(layout.billed_last),
        billed_first_name: row.get(layout.billed_first),
        amount: row.get(layout.amount),
        member_last_name: column(layout.member_last),
        member_first_name: column(layout.member_first),
        recipient_email: column(layout.email),
        row: Some(line),
    }
    .into_record()
}
