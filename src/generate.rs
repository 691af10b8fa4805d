//! Billing entry points: drive records through render → convert → mail.
//!
//! Records are processed one at a time, in source order. A record that fails
//! to parse, render, convert or send is logged, recorded in the
//! [`BatchReport`] and skipped; the run goes on with the next one. Only
//! errors that make every further record pointless (missing template, SMTP
//! login refused) abort the run. When the source holds a single record, its
//! failure is returned as the run's error.

use crate::config::BillingConfig;
use crate::error::{BillError, RecordError};
use crate::output::{BatchReport, BatchStats, MailStatus, RecordOutcome};
use crate::pipeline::dispatch::{MailDispatcher, MailSession};
use crate::pipeline::mail::MailAssembler;
use crate::pipeline::pdf::{ConversionAdapter, PdfConverter, WkHtmlToPdf};
use crate::pipeline::render::{DocumentRenderer, InvoiceFields};
use crate::pipeline::source::RecordSource;
use crate::record::BillRecord;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A ready-to-run billing pipeline: template loaded, output directory in
/// place, converter chosen.
#[derive(Debug)]
pub struct Invoicer<'a> {
    config: &'a BillingConfig,
    renderer: DocumentRenderer,
    adapter: ConversionAdapter,
}

impl<'a> Invoicer<'a> {
    /// Pipeline using the `wkhtmltopdf` converter from `config`.
    pub async fn new(config: &'a BillingConfig) -> Result<Self, BillError> {
        let converter = Arc::new(WkHtmlToPdf::new(config.converter.clone()));
        Self::with_converter(config, converter).await
    }

    /// Pipeline using a caller-supplied converter.
    pub async fn with_converter(
        config: &'a BillingConfig,
        converter: Arc<dyn PdfConverter>,
    ) -> Result<Self, BillError> {
        let renderer = DocumentRenderer::new(config)?;
        let adapter = ConversionAdapter::new(config, converter).await?;
        Ok(Self {
            config,
            renderer,
            adapter,
        })
    }

    /// Render and convert one record. Returns the invoice path.
    pub async fn generate(&self, record: &BillRecord) -> Result<PathBuf, RecordError> {
        let billed = record.billed();
        let member = record.member();
        let amount = record.amount.to_string();
        let date = self.config.date_label();

        let html = self.renderer.render(&InvoiceFields {
            billed_name: &billed.display(),
            member_name: &member.display(),
            amount: &amount,
            season: &self.config.season,
            date: &date,
        })?;
        self.adapter.convert(&member, &html).await
    }

    /// Process every record of `source`. Mails are sent through `session`
    /// when one is given.
    ///
    /// The session is not closed here; whoever opened it closes it.
    pub async fn run(
        &self,
        source: RecordSource,
        mut session: Option<&mut dyn MailSession>,
    ) -> Result<BatchReport, BillError> {
        let start = Instant::now();
        let single = source.is_single();
        let progress = &self.config.progress_callback;
        let mailing = session.is_some();
        progress.on_batch_start(mailing);

        let mut report = BatchReport::default();
        for item in source.records() {
            report.stats.total_records += 1;

            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    error!("{}", e);
                    progress.on_record_error(&row_label(&e), &e.to_string());
                    report.stats.skipped += 1;
                    if single {
                        return Err(e.into());
                    }
                    report.records.push(RecordOutcome {
                        row: error_row(&e),
                        member: None,
                        pdf: None,
                        mail: MailStatus::NotRequested,
                        error: Some(e),
                    });
                    continue;
                }
            };

            let mail = match session {
                Some(ref mut s) => Some(&mut **s as &mut dyn MailSession),
                None => None,
            };
            let outcome = self.process(&record, mail, &mut report.stats).await;
            if single {
                if let Some(e) = outcome.error {
                    return Err(e.into());
                }
            }
            report.records.push(outcome);
        }

        report.stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Billing complete: {} generated, {} skipped, {} failed, {} mails sent",
            report.stats.generated,
            report.stats.skipped,
            report.stats.failed,
            report.stats.mails_sent
        );
        progress.on_batch_complete(&report.stats);
        Ok(report)
    }

    /// [`run`](Self::run) with mailing, then close `session`, whatever the
    /// outcome.
    pub async fn run_and_close(
        &self,
        source: RecordSource,
        session: &mut dyn MailSession,
    ) -> Result<BatchReport, BillError> {
        let result = self.run(source, Some(&mut *session as &mut dyn MailSession)).await;
        session.close().await;
        result
    }

    /// Generate and optionally mail one parsed record.
    async fn process(
        &self,
        record: &BillRecord,
        session: Option<&mut dyn MailSession>,
        stats: &mut BatchStats,
    ) -> RecordOutcome {
        let label = record.label();
        let progress = &self.config.progress_callback;
        progress.on_record_start(&label);

        let mut outcome = RecordOutcome {
            row: record.row,
            member: Some(record.member().display()),
            pdf: None,
            mail: MailStatus::NotRequested,
            error: None,
        };

        let pdf = match self.generate(record).await {
            Ok(pdf) => pdf,
            Err(e) => {
                error!("{}: {}", label, e);
                progress.on_record_error(&label, &e.to_string());
                stats.failed += 1;
                outcome.error = Some(e);
                return outcome;
            }
        };
        stats.generated += 1;
        progress.on_record_complete(&label, &pdf);
        outcome.pdf = Some(pdf.clone());

        let Some(session) = session else {
            return outcome;
        };

        match self.mail(record, &pdf, session).await {
            Ok(recipient) => {
                stats.mails_sent += 1;
                progress.on_mail_sent(&label, &recipient);
                outcome.mail = MailStatus::Sent { recipient };
            }
            Err(e) => {
                stats.mails_failed += 1;
                progress.on_record_error(&label, &e.to_string());
                outcome.mail = match e {
                    RecordError::MissingEmail { .. } => {
                        warn!("{}", e);
                        MailStatus::Skipped
                    }
                    _ => {
                        error!("{}: {}", label, e);
                        MailStatus::Failed
                    }
                };
                outcome.error = Some(e);
            }
        }
        outcome
    }

    async fn mail(
        &self,
        record: &BillRecord,
        pdf: &std::path::Path,
        session: &mut dyn MailSession,
    ) -> Result<String, RecordError> {
        let member = record.member();
        let email = record
            .recipient_email
            .as_deref()
            .ok_or_else(|| RecordError::MissingEmail {
                row: record.row,
                member: member.display(),
            })?;

        let message = MailAssembler::new(&self.config.mail, &self.config.season)
            .assemble(member.first(), email, pdf)
            .await?;
        session.send(&message).await?;
        Ok(message.recipient)
    }
}

fn error_row(e: &RecordError) -> Option<u64> {
    match e {
        RecordError::MalformedRow { row, .. } | RecordError::UnreadableRow { row, .. } => {
            Some(*row)
        }
        RecordError::MissingField { row, .. }
        | RecordError::InvalidAmount { row, .. }
        | RecordError::MissingEmail { row, .. } => *row,
        _ => None,
    }
}

fn row_label(e: &RecordError) -> String {
    match error_row(e) {
        Some(r) => format!("row {r}"),
        None => "record".to_string(),
    }
}

/// Generate every invoice of `source`; mail them when `smtp_password` is
/// given.
///
/// The SMTP session is opened once before the first record and closed once
/// after the last, on every exit path.
///
/// # Errors
/// Returns `Err(BillError)` only for fatal errors:
/// - template missing or invalid, output directory unusable
/// - SMTP server unreachable or login refused
/// - the failure of the only record, in single-record mode
pub async fn generate_bills(
    source: RecordSource,
    config: &BillingConfig,
    smtp_password: Option<&str>,
) -> Result<BatchReport, BillError> {
    let invoicer = Invoicer::new(config).await?;
    run_with_mail(&invoicer, source, config, smtp_password).await
}

/// [`generate_bills`] with a caller-supplied converter.
pub async fn generate_bills_with(
    source: RecordSource,
    config: &BillingConfig,
    converter: Arc<dyn PdfConverter>,
    smtp_password: Option<&str>,
) -> Result<BatchReport, BillError> {
    let invoicer = Invoicer::with_converter(config, converter).await?;
    run_with_mail(&invoicer, source, config, smtp_password).await
}

async fn run_with_mail(
    invoicer: &Invoicer<'_>,
    source: RecordSource,
    config: &BillingConfig,
    smtp_password: Option<&str>,
) -> Result<BatchReport, BillError> {
    let Some(password) = smtp_password else {
        return invoicer.run(source, None).await;
    };

    let mut session = MailDispatcher::new(&config.mail).connect(password).await?;
    invoicer.run_and_close(source, &mut session).await
}

/// Synchronous wrapper around [`generate_bills`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_bills_sync(
    source: RecordSource,
    config: &BillingConfig,
    smtp_password: Option<&str>,
) -> Result<BatchReport, BillError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BillError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_bills(source, config, smtp_password))
}
