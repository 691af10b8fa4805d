//! # sjb-billing
//!
//! Generate membership invoices as PDF files and optionally mail them.
//!
//! Each record names a billed party, an amount and a member. The crate binds
//! it to an HTML template, turns the result into a PDF with `wkhtmltopdf`,
//! and, when asked, mails the PDF to the member over one authenticated SMTP
//! session. Records come from command-line arguments or from a
//! semicolon-separated file.
//!
//! ## Pipeline Overview
//!
//! ```text
//! record(s)
//!  │
//!  ├─ 1. Source    one record, or rows of `last;first;amount[;…]`
//!  ├─ 2. Render    template + name, member, amount, season, date
//!  ├─ 3. Convert   HTML → {bills_dir}/{LAST}_{First}_Facture.pdf
//!  ├─ 4. Assemble  HTML body + base64 PDF attachment
//!  └─ 5. Dispatch  one SMTP session, AUTH once, QUIT once
//! ```
//!
//! A record that fails is logged and skipped; the batch goes on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sjb_billing::{generate_bills, BatchFile, BillingConfig, RecordSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BillingConfig::builder().season("2019/2020").build()?;
//!     let file = BatchFile::open("members.csv", config.schema)?;
//!     let report = generate_bills(RecordSource::Batch(file), &config, None).await?;
//!     for pdf in report.generated_files() {
//!         println!("{}", pdf.display());
//!     }
//!     eprintln!("{} failed", report.stats.failed + report.stats.skipped);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `generate-bill` binary (clap + anyhow + tracing-subscriber + rpassword) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! sjb-billing = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod generate;
pub mod names;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod templates;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BillingConfig, BillingConfigBuilder, ConverterSettings, MailProfile, Schema, SchemaSelection,
};
pub use error::{BillError, RecordError};
pub use generate::{generate_bills, generate_bills_sync, generate_bills_with, Invoicer};
pub use names::PersonName;
pub use output::{BatchReport, BatchStats, MailStatus, RecordOutcome};
pub use pipeline::dispatch::{MailDispatcher, MailSession};
pub use pipeline::pdf::{PdfConverter, WkHtmlToPdf};
pub use pipeline::source::{BatchFile, RecordSource};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{BillRecord, RecordFields};
