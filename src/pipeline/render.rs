//! Invoice rendering: bind a record to the HTML template.
//!
//! The template is located once, when the renderer is built, so a missing
//! template stops the run before any record is touched. Rendering itself is
//! a pure function of its inputs.

use crate::config::BillingConfig;
use crate::error::{BillError, RecordError};
use minijinja::{context, AutoEscape, Environment, ErrorKind};
use std::path::PathBuf;
use tracing::debug;

/// Fields printed on one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceFields<'a> {
    /// Billed party, display form.
    pub billed_name: &'a str,
    /// Member, display form.
    pub member_name: &'a str,
    pub amount: &'a str,
    pub season: &'a str,
    pub date: &'a str,
}

/// Renders invoices from the configured template.
///
/// Template variables: `name` (billed party), `member`, `amount`, `season`
/// and `dt` (issue date).
pub struct DocumentRenderer {
    env: Environment<'static>,
    template_dir: PathBuf,
    template_file: String,
}

impl std::fmt::Debug for DocumentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRenderer")
            .field("template_dir", &self.template_dir)
            .field("template_file", &self.template_file)
            .finish()
    }
}

impl DocumentRenderer {
    /// Locate and parse the template named in `config`.
    pub fn new(config: &BillingConfig) -> Result<Self, BillError> {
        let mut env = base_environment();
        env.set_loader(minijinja::path_loader(config.template_dir.clone()));

        let renderer = Self {
            env,
            template_dir: config.template_dir.clone(),
            template_file: config.template_file.clone(),
        };

        renderer
            .env
            .get_template(&renderer.template_file)
            .map_err(|e| match e.kind() {
                ErrorKind::TemplateNotFound => BillError::TemplateNotFound {
                    dir: renderer.template_dir.clone(),
                    name: renderer.template_file.clone(),
                },
                _ => BillError::TemplateInvalid {
                    name: renderer.template_file.clone(),
                    detail: e.to_string(),
                },
            })?;
        debug!(
            "Template {}/{} loaded",
            renderer.template_dir.display(),
            renderer.template_file
        );

        Ok(renderer)
    }

    /// Build a renderer from template source held in memory.
    pub fn from_source(name: &str, source: &str) -> Result<Self, BillError> {
        let mut env = base_environment();
        env.add_template_owned(name.to_string(), source.to_string())
            .map_err(|e| BillError::TemplateInvalid {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            env,
            template_dir: PathBuf::new(),
            template_file: name.to_string(),
        })
    }

    pub fn template_path(&self) -> PathBuf {
        self.template_dir.join(&self.template_file)
    }

    /// Render one invoice to HTML.
    pub fn render(&self, fields: &InvoiceFields<'_>) -> Result<String, RecordError> {
        let fail = |detail: String| RecordError::Render {
            member: fields.member_name.to_string(),
            detail,
        };
        let template = self
            .env
            .get_template(&self.template_file)
            .map_err(|e| fail(e.to_string()))?;
        template
            .render(context! {
                name => fields.billed_name,
                member => fields.member_name,
                amount => fields.amount,
                season => fields.season,
                dt => fields.date,
            })
            .map_err(|e| fail(e.to_string()))
    }
}

/// Values are inserted verbatim: the template author controls markup.
fn base_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env
}
