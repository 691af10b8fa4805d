//! CLI binary for sjb-billing.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `BillingConfig`, asks for the SMTP password and prints results.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sjb_billing::{
    generate_bills, BatchFile, BatchProgressCallback, BatchStats, BillError, BillingConfig,
    ConverterSettings, MailProfile, ProgressCallback, RecordFields, RecordSource, SchemaSelection,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner counting records plus one log line
/// per invoice. The number of rows is not known up front, so there is no bar.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let template = "{spinner:.cyan} {prefix:.bold}  {pos} records  {msg}";
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Billing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    /// Records that failed to parse, convert or send so far.
    fn problems(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, mailing: bool) {
        let what = if mailing {
            "Generating and mailing invoices…"
        } else {
            "Generating invoices…"
        };
        self.bar.println(format!("{} {}", cyan("◆"), bold(what)));
    }

    fn on_record_start(&self, label: &str) {
        self.bar.set_message(label.to_string());
    }

    fn on_record_complete(&self, label: &str, pdf: &Path) {
        self.bar.println(format!(
            "  {} {:<32}  {}",
            green("✓"),
            label,
            dim(&pdf.display().to_string())
        ));
        self.bar.inc(1);
    }

    fn on_record_error(&self, label: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 100 {
            let cut: String = error.chars().take(99).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<32}  {}", red("✗"), label, red(&msg)));
    }

    fn on_mail_sent(&self, label: &str, recipient: &str) {
        self.bar.println(format!(
            "  {} {:<32}  {}",
            green("✉"),
            label,
            dim(recipient)
        ));
    }

    fn on_batch_complete(&self, stats: &BatchStats) {
        self.bar.finish_and_clear();
        let problems = self.problems();
        let mark = if problems == 0 {
            green("✔")
        } else if stats.generated == 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{} {} invoices generated  ({} skipped, {} failed)",
            mark,
            bold(&stats.generated.to_string()),
            stats.skipped,
            stats.failed,
        );
        if stats.mails_sent + stats.mails_failed > 0 {
            eprintln!(
                "   {} mails sent, {} not sent",
                bold(&stats.mails_sent.to_string()),
                stats.mails_failed
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One invoice
  generate-bill --firstname Jean --lastname Dupont --amount 120

  # One invoice, mailed
  generate-bill --firstname Jean --lastname Dupont --amount 120 \
      --email jean@example.com --sendmail

  # A parent paying for a child
  generate-bill --firstname Jean --lastname Dupont --amount 150 \
      --member-firstname Alice --member-lastname Martin

  # A whole file, mailed
  generate-bill --csv_file members.csv --sendmail

  # JSON report for scripting
  generate-bill --csv_file members.csv --json > report.json

BATCH FILE FORMAT (semicolon-separated, no header):
  Minimal    LASTNAME;FIRSTNAME;AMOUNT[;EMAIL]
  Extended   LASTNAME;FIRSTNAME;AMOUNT;MEMBER_LASTNAME;MEMBER_FIRSTNAME;EMAIL

  With --schema auto (default), a first row of six or more columns selects
  the extended layout. Blank lines are ignored. Bad rows are reported and
  skipped.

OUTPUT:
  {bills-dir}/{LASTNAME}_{Firstname}_Facture.pdf, named after the member.

ENVIRONMENT VARIABLES:
  BILL_SMTP_PASSWORD   SMTP password; skips the interactive prompt
  RUST_LOG             Override the log filter (e.g. sjb_billing=debug)
"#;

/// Generate membership invoices as PDF and optionally mail them.
#[derive(Parser, Debug)]
#[command(
    name = "generate-bill",
    version,
    about = "Generate membership invoices as PDF and optionally mail them",
    long_about = "Generate one invoice from command-line fields, or one per row of a \
semicolon-separated file. Invoices are rendered from an HTML template, converted with \
wkhtmltopdf, and mailed over SMTP when --sendmail is given.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// First name of the billed party.
    #[arg(long)]
    firstname: Option<String>,

    /// Last name of the billed party.
    #[arg(long)]
    lastname: Option<String>,

    /// Amount due, e.g. 120 or 120,50.
    #[arg(long)]
    amount: Option<String>,

    /// Member first name, when different from the billed party.
    #[arg(long)]
    member_firstname: Option<String>,

    /// Member last name, when different from the billed party.
    #[arg(long)]
    member_lastname: Option<String>,

    /// Recipient address for --sendmail.
    #[arg(long)]
    email: Option<String>,

    /// Semicolon-separated batch file.
    #[arg(long = "csv_file", alias = "csv-file", value_name = "FILE")]
    csv_file: Option<PathBuf>,

    /// Mail each invoice after generating it.
    #[arg(long)]
    sendmail: bool,

    /// Batch file layout.
    #[arg(long, value_enum, default_value = "auto")]
    schema: SchemaArg,

    /// Season label, e.g. 2019/2020. Default: current season.
    #[arg(long, env = "BILL_SEASON")]
    season: Option<String>,

    /// Issue date (YYYY-MM-DD). Default: today in Europe/Paris.
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,

    /// Directory holding the invoice template.
    #[arg(long, env = "BILL_TEMPLATE_DIR", default_value = "templates")]
    template_dir: PathBuf,

    /// Template file name inside --template-dir.
    #[arg(long, env = "BILL_TEMPLATE_FILE", default_value = "bill.html")]
    template_file: String,

    /// Directory receiving the PDFs.
    #[arg(long, env = "BILL_BILLS_DIR", default_value = "bills")]
    bills_dir: PathBuf,

    /// Path to the wkhtmltopdf executable.
    #[arg(long, env = "BILL_WKHTMLTOPDF", default_value = "wkhtmltopdf")]
    wkhtmltopdf: PathBuf,

    /// Keep the intermediate HTML when conversion fails.
    #[arg(long)]
    keep_failed_html: bool,

    /// From header.
    #[arg(long, env = "BILL_MAIL_SENDER")]
    sender: Option<String>,

    /// Carbon-copy address; pass an empty string for none.
    #[arg(long, env = "BILL_MAIL_CC")]
    cc: Option<String>,

    /// Subject line. Default: "Facture {season}".
    #[arg(long, env = "BILL_MAIL_SUBJECT")]
    subject: Option<String>,

    /// SMTP server (implicit TLS).
    #[arg(long, env = "BILL_SMTP_HOST")]
    smtp_host: Option<String>,

    /// SMTP port.
    #[arg(long, env = "BILL_SMTP_PORT")]
    smtp_port: Option<u16>,

    /// SMTP login.
    #[arg(long, env = "BILL_SMTP_LOGIN")]
    smtp_login: Option<String>,

    /// Output the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress output.
    #[arg(long, env = "BILL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BILL_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum SchemaArg {
    Auto,
    Minimal,
    Extended,
}

impl From<SchemaArg> for SchemaSelection {
    fn from(v: SchemaArg) -> Self {
        match v {
            SchemaArg::Auto => SchemaSelection::Auto,
            SchemaArg::Minimal => SchemaSelection::Minimal,
            SchemaArg::Extended => SchemaSelection::Extended,
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    s.parse::<NaiveDate>()
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

impl Cli {
    fn has_single_fields(&self) -> bool {
        self.firstname.is_some()
            || self.lastname.is_some()
            || self.amount.is_some()
            || self.member_firstname.is_some()
            || self.member_lastname.is_some()
            || self.email.is_some()
    }

    /// Exactly one input: single-invoice options or `--csv_file`.
    fn check_inputs(&self) -> Result<(), BillError> {
        match (self.has_single_fields(), self.csv_file.is_some()) {
            (true, true) => Err(BillError::Usage(
                "--csv_file cannot be combined with single-invoice options".into(),
            )),
            (false, false) => Err(BillError::Usage(
                "nothing to bill: give --firstname/--lastname/--amount or --csv_file".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs duplicate what the progress lines already say.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Pick the record source ───────────────────────────────────────────
    cli.check_inputs()?;
    let source = match &cli.csv_file {
        None => {
            let record = RecordFields {
                billed_first_name: cli.firstname.as_deref(),
                billed_last_name: cli.lastname.as_deref(),
                amount: cli.amount.as_deref(),
                member_first_name: cli.member_firstname.as_deref(),
                member_last_name: cli.member_lastname.as_deref(),
                recipient_email: cli.email.as_deref(),
                row: None,
            }
            .into_record()
            .map_err(BillError::from)
            .context("Invalid invoice fields")?;
            RecordSource::Single(record)
        }
        Some(path) => {
            let file = BatchFile::open(path, cli.schema.clone().into())
                .context("Cannot open batch file")?;
            RecordSource::Batch(file)
        }
    };

    // ── Password before any record is processed ─────────────────────────
    let password = if cli.sendmail {
        Some(read_password()?)
    } else {
        None
    };

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = generate_bills(source, &config, password.as_deref())
        .await
        .context("Billing failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        for pdf in report.generated_files() {
            println!("{}", pdf.display());
        }
        let s = &report.stats;
        eprintln!(
            "Generated {}/{} invoices in {}ms",
            s.generated, s.total_records, s.duration_ms
        );
        if s.skipped + s.failed > 0 {
            eprintln!("  {} skipped, {} failed", s.skipped, s.failed);
        }
        if s.mails_sent + s.mails_failed > 0 {
            eprintln!("  {} mails sent, {} not sent", s.mails_sent, s.mails_failed);
        }
    }

    Ok(())
}

/// `BILL_SMTP_PASSWORD`, or a masked prompt on the terminal.
fn read_password() -> Result<String> {
    if let Ok(p) = std::env::var("BILL_SMTP_PASSWORD") {
        if !p.is_empty() {
            return Ok(p);
        }
    }
    rpassword::prompt_password("Password: ").context("Failed to read SMTP password")
}

/// Map CLI args to `BillingConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BillingConfig> {
    let defaults = MailProfile::default();
    let mail = MailProfile {
        sender: cli.sender.clone().unwrap_or(defaults.sender),
        cc: match cli.cc.as_deref() {
            Some("") => None,
            Some(cc) => Some(cc.to_string()),
            None => defaults.cc,
        },
        subject: cli.subject.clone().or(defaults.subject),
        smtp_host: cli.smtp_host.clone().unwrap_or(defaults.smtp_host),
        smtp_port: cli.smtp_port.unwrap_or(defaults.smtp_port),
        smtp_login: cli.smtp_login.clone().unwrap_or(defaults.smtp_login),
        ..defaults
    };

    let mut builder = BillingConfig::builder()
        .template_dir(&cli.template_dir)
        .template_file(&cli.template_file)
        .bills_dir(&cli.bills_dir)
        .schema(cli.schema.clone().into())
        .converter(ConverterSettings {
            program: cli.wkhtmltopdf.clone(),
            ..ConverterSettings::default()
        })
        .keep_failed_intermediate(cli.keep_failed_html)
        .mail(mail);

    if let Some(ref season) = cli.season {
        builder = builder.season(season);
    }
    if let Some(date) = cli.date {
        builder = builder.issue_date(date);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
