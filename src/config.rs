//! Configuration types for invoice generation and mailing.
//!
//! All behaviour is controlled through [`BillingConfig`], built once at start
//! via [`BillingConfigBuilder`] and passed by reference to every stage. There
//! is no ambient state: two configs can drive two runs side by side.

use crate::error::BillError;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a billing run.
///
/// Built via [`BillingConfig::builder()`] or using [`BillingConfig::default()`].
///
/// # Example
/// ```rust
/// use sjb_billing::{BillingConfig, SchemaSelection};
///
/// let config = BillingConfig::builder()
///     .season("2019/2020")
///     .bills_dir("out")
///     .schema(SchemaSelection::Extended)
///     .build()
///     .unwrap();
/// assert_eq!(config.mail.subject(&config.season), "Facture 2019/2020");
/// ```
#[derive(Clone)]
pub struct BillingConfig {
    /// Directory holding the invoice template. Intermediate HTML files are
    /// written here too. Default: `templates`.
    pub template_dir: PathBuf,

    /// Template file name inside `template_dir`. Default: `bill.html`.
    pub template_file: String,

    /// Directory receiving the generated PDFs. Default: `bills`.
    pub bills_dir: PathBuf,

    /// Timezone used to stamp the issue date. Default: Europe/Paris.
    pub timezone: Tz,

    /// `strftime` pattern for the issue date. Default: `%d/%m/%Y`.
    pub date_format: String,

    /// Fixed issue date; today in `timezone` when `None`.
    pub issue_date: Option<NaiveDate>,

    /// Membership period printed on invoices and mails, e.g. `2019/2020`.
    ///
    /// Defaults to the season containing today; seasons start in September.
    pub season: String,

    /// Column layout of batch files. Default: [`SchemaSelection::Auto`].
    pub schema: SchemaSelection,

    /// External HTML → PDF converter.
    pub converter: ConverterSettings,

    /// Keep the intermediate HTML when conversion fails. Default: false.
    pub keep_failed_intermediate: bool,

    /// Sender identity and SMTP endpoint.
    pub mail: MailProfile,

    /// Per-record progress events. Default: no-op.
    pub progress_callback: ProgressCallback,
}

impl Default for BillingConfig {
    fn default() -> Self {
        let timezone = chrono_tz::Europe::Paris;
        let today = Utc::now().with_timezone(&timezone).date_naive();
        Self {
            template_dir: PathBuf::from("templates"),
            template_file: "bill.html".to_string(),
            bills_dir: PathBuf::from("bills"),
            timezone,
            date_format: "%d/%m/%Y".to_string(),
            issue_date: None,
            season: season_for(today),
            schema: SchemaSelection::default(),
            converter: ConverterSettings::default(),
            keep_failed_intermediate: false,
            mail: MailProfile::default(),
            progress_callback: Arc::new(NoopProgressCallback),
        }
    }
}

impl fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillingConfig")
            .field("template_dir", &self.template_dir)
            .field("template_file", &self.template_file)
            .field("bills_dir", &self.bills_dir)
            .field("timezone", &self.timezone)
            .field("date_format", &self.date_format)
            .field("issue_date", &self.issue_date)
            .field("season", &self.season)
            .field("schema", &self.schema)
            .field("converter", &self.converter)
            .field("keep_failed_intermediate", &self.keep_failed_intermediate)
            .field("mail", &self.mail)
            .field("progress_callback", &"<dyn BatchProgressCallback>")
            .finish()
    }
}

impl BillingConfig {
    /// Create a new builder for `BillingConfig`.
    pub fn builder() -> BillingConfigBuilder {
        BillingConfigBuilder {
            config: Self::default(),
        }
    }

    /// The issue date as printed on the invoice.
    pub fn date_label(&self) -> String {
        let date = self
            .issue_date
            .unwrap_or_else(|| Utc::now().with_timezone(&self.timezone).date_naive());
        date.format(&self.date_format).to_string()
    }
}

/// The season label for a given day: `2019/2020` from September 2019 to
/// August 2020.
pub fn season_for(date: NaiveDate) -> String {
    let start = if date.month() >= 9 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}/{}", start, start + 1)
}

/// Builder for [`BillingConfig`].
#[derive(Debug)]
pub struct BillingConfigBuilder {
    config: BillingConfig,
}

impl BillingConfigBuilder {
    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.template_dir = dir.into();
        self
    }

    pub fn template_file(mut self, name: impl Into<String>) -> Self {
        self.config.template_file = name.into();
        self
    }

    pub fn bills_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.bills_dir = dir.into();
        self
    }

    pub fn timezone(mut self, tz: Tz) -> Self {
        self.config.timezone = tz;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.config.date_format = format.into();
        self
    }

    pub fn issue_date(mut self, date: NaiveDate) -> Self {
        self.config.issue_date = Some(date);
        self
    }

    pub fn season(mut self, season: impl Into<String>) -> Self {
        self.config.season = season.into();
        self
    }

    pub fn schema(mut self, schema: SchemaSelection) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn converter(mut self, converter: ConverterSettings) -> Self {
        self.config.converter = converter;
        self
    }

    pub fn keep_failed_intermediate(mut self, v: bool) -> Self {
        self.config.keep_failed_intermediate = v;
        self
    }

    pub fn mail(mut self, mail: MailProfile) -> Self {
        self.config.mail = mail;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = cb;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BillingConfig, BillError> {
        let c = &self.config;
        if c.template_file.trim().is_empty() {
            return Err(BillError::InvalidConfig(
                "Template file name must not be empty".into(),
            ));
        }
        if c.season.trim().is_empty() {
            return Err(BillError::InvalidConfig("Season must not be empty".into()));
        }
        if c.date_format.trim().is_empty() {
            return Err(BillError::InvalidConfig(
                "Date format must not be empty".into(),
            ));
        }
        if c.mail.smtp_port == 0 {
            return Err(BillError::InvalidConfig("SMTP port must be ≥ 1".into()));
        }
        if c.converter.program.as_os_str().is_empty() {
            return Err(BillError::InvalidConfig(
                "Converter program must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Mail profile ─────────────────────────────────────────────────────────

/// Sender identity, subject and SMTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailProfile {
    /// `From` header, e.g. `SJB <secretariat@sjb35.com>`.
    pub sender: String,
    /// Carbon-copy address added to every mail.
    pub cc: Option<String>,
    /// `Reply-To` header; the sender when `None`.
    pub reply_to: Option<String>,
    /// Subject line; `Facture {season}` when `None`.
    pub subject: Option<String>,
    pub smtp_host: String,
    /// Implicit-TLS port. Default: 465.
    pub smtp_port: u16,
    pub smtp_login: String,
    /// Name announced in EHLO. Default: `localhost`.
    pub hello_name: String,
    /// Connection and command timeout in seconds. Default: 30.
    pub timeout_secs: u64,
    /// Sign-off line under the mail body.
    pub signature: String,
    /// Club name used in the mail body.
    pub club: String,
}

impl Default for MailProfile {
    fn default() -> Self {
        Self {
            sender: "SJB <secretariat@sjb35.com>".to_string(),
            cc: Some("secretariat@sjb35.com".to_string()),
            reply_to: None,
            subject: None,
            smtp_host: "smtp-zose.yulpa.io".to_string(),
            smtp_port: 465,
            smtp_login: "secretariat@sjb35.com".to_string(),
            hello_name: "localhost".to_string(),
            timeout_secs: 30,
            signature: "Fabrice pour le SJB".to_string(),
            club: "SJB".to_string(),
        }
    }
}

impl MailProfile {
    /// The subject line for a season.
    pub fn subject(&self, season: &str) -> String {
        match &self.subject {
            Some(s) => s.clone(),
            None => format!("Facture {season}"),
        }
    }

    /// The `Reply-To` address.
    pub fn reply_to(&self) -> &str {
        self.reply_to.as_deref().unwrap_or(&self.sender)
    }
}

// ── Converter ────────────────────────────────────────────────────────────

/// How to invoke the external HTML → PDF converter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterSettings {
    /// Executable name or path. Default: `wkhtmltopdf`.
    pub program: PathBuf,
    /// Arguments placed before the source and target paths.
    pub args: Vec<String>,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("wkhtmltopdf"),
            args: vec![
                "--quiet".to_string(),
                "--encoding".to_string(),
                "utf-8".to_string(),
            ],
        }
    }
}

// ── Batch schema ─────────────────────────────────────────────────────────

/// Which column layout to apply to batch files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchemaSelection {
    /// Decide from the first non-blank row: six or more columns select
    /// [`Schema::Extended`], anything else [`Schema::Minimal`]. (default)
    #[default]
    Auto,
    /// `last;first;amount[;email]`
    Minimal,
    /// `billed_last;billed_first;amount;member_last;member_first;email`
    Extended,
}

impl SchemaSelection {
    /// Resolve to a concrete schema given the column count of the first row.
    pub fn resolve(self, first_row_columns: usize) -> Schema {
        match self {
            SchemaSelection::Minimal => Schema::Minimal,
            SchemaSelection::Extended => Schema::Extended,
            SchemaSelection::Auto => {
                if first_row_columns >= Schema::Extended.layout().required {
                    Schema::Extended
                } else {
                    Schema::Minimal
                }
            }
        }
    }
}

/// A concrete batch column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schema {
    Minimal,
    Extended,
}

/// Column index of each field for a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub billed_last: usize,
    pub billed_first: usize,
    pub amount: usize,
    pub member_last: Option<usize>,
    pub member_first: Option<usize>,
    pub email: Option<usize>,
    /// Minimum number of columns a row must have.
    pub required: usize,
}

impl Schema {
    pub fn layout(self) -> ColumnLayout {
        match self {
            Schema::Minimal => ColumnLayout {
                billed_last: 0,
                billed_first: 1,
                amount: 2,
                member_last: None,
                member_first: None,
                email: Some(3),
                required: 3,
            },
            Schema::Extended => ColumnLayout {
                billed_last: 0,
                billed_first: 1,
                amount: 2,
                member_last: Some(3),
                member_first: Some(4),
                email: Some(5),
                required: 6,
            },
        }
    }
}
