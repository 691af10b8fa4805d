//! HTML → PDF conversion and the intermediate-file lifecycle.
//!
//! For each person the adapter:
//!
//! 1. derives `{template_dir}/{LASTNAME}_{Firstname}_Facture.html` and
//!    `{bills_dir}/{LASTNAME}_{Firstname}_Facture.pdf` from the file-safe name,
//! 2. writes the rendered HTML to the first path, replacing any older file,
//! 3. runs the external converter,
//! 4. removes the HTML file.
//!
//! Reprocessing the same person overwrites the same PDF. On converter
//! failure the HTML is removed too, unless
//! [`BillingConfig::keep_failed_intermediate`](crate::config::BillingConfig::keep_failed_intermediate)
//! asks to keep it for diagnosis.

use crate::config::{BillingConfig, ConverterSettings};
use crate::error::{BillError, RecordError};
use crate::names::PersonName;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Suffix shared by every generated file.
pub const FILE_SUFFIX: &str = "_Facture";

/// Converts an HTML file on disk into a PDF file on disk.
#[async_trait]
pub trait PdfConverter: Send + Sync {
    /// Produce `target` from `source`. `target` is overwritten if present.
    async fn convert(&self, source: &Path, target: &Path) -> Result<(), RecordError>;
}

/// The `wkhtmltopdf` command-line converter.
#[derive(Debug, Clone)]
pub struct WkHtmlToPdf {
    settings: ConverterSettings,
}

impl WkHtmlToPdf {
    pub fn new(settings: ConverterSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PdfConverter for WkHtmlToPdf {
    async fn convert(&self, source: &Path, target: &Path) -> Result<(), RecordError> {
        let fail = |detail: String| RecordError::Conversion {
            source_path: source.to_path_buf(),
            detail,
        };

        debug!(
            "Running {} {:?} {} {}",
            self.settings.program.display(),
            self.settings.args,
            source.display(),
            target.display()
        );
        let output = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .arg(source)
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                fail(format!(
                    "cannot run '{}': {e}",
                    self.settings.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("{} ({})", output.status, stderr.trim())));
        }
        if !target.is_file() {
            return Err(fail(format!("converter produced no file at '{}'", target.display())));
        }
        Ok(())
    }
}

/// The two files derived from a person's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// Intermediate HTML; removed once conversion has run.
    pub html_path: PathBuf,
    /// The invoice kept on disk.
    pub pdf_path: PathBuf,
}

impl RenderedDocument {
    /// Deterministic paths for `member`; independent of amount or season.
    pub fn for_member(member: &PersonName, template_dir: &Path, bills_dir: &Path) -> Self {
        let stem = format!("{}{}", member.file_stem(), FILE_SUFFIX);
        Self {
            html_path: template_dir.join(format!("{stem}.html")),
            pdf_path: bills_dir.join(format!("{stem}.pdf")),
        }
    }
}

/// Wraps a [`PdfConverter`] with the intermediate-file lifecycle.
#[derive(Clone)]
pub struct ConversionAdapter {
    converter: Arc<dyn PdfConverter>,
    template_dir: PathBuf,
    bills_dir: PathBuf,
    keep_failed_intermediate: bool,
}

impl std::fmt::Debug for ConversionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionAdapter")
            .field("converter", &"<dyn PdfConverter>")
            .field("template_dir", &self.template_dir)
            .field("bills_dir", &self.bills_dir)
            .field("keep_failed_intermediate", &self.keep_failed_intermediate)
            .finish()
    }
}

impl ConversionAdapter {
    /// Build the adapter and make sure the output directory exists.
    pub async fn new(
        config: &BillingConfig,
        converter: Arc<dyn PdfConverter>,
    ) -> Result<Self, BillError> {
        tokio::fs::create_dir_all(&config.bills_dir)
            .await
            .map_err(|e| BillError::OutputDirFailed {
                path: config.bills_dir.clone(),
                source: e,
            })?;
        Ok(Self {
            converter,
            template_dir: config.template_dir.clone(),
            bills_dir: config.bills_dir.clone(),
            keep_failed_intermediate: config.keep_failed_intermediate,
        })
    }

    /// Paths that [`convert`](Self::convert) would use for `member`.
    pub fn paths_for(&self, member: &PersonName) -> RenderedDocument {
        RenderedDocument::for_member(member, &self.template_dir, &self.bills_dir)
    }

    /// Write `html`, convert it, remove it. Returns the PDF path.
    pub async fn convert(&self, member: &PersonName, html: &str) -> Result<PathBuf, RecordError> {
        let doc = self.paths_for(member);

        info!("Generate {}", doc.html_path.display());
        tokio::fs::write(&doc.html_path, html)
            .await
            .map_err(|e| RecordError::WriteFailed {
                path: doc.html_path.clone(),
                detail: e.to_string(),
            })?;

        info!(
            "Generate {} from {}",
            doc.pdf_path.display(),
            doc.html_path.display()
        );
        let converted = self.converter.convert(&doc.html_path, &doc.pdf_path).await;

        if converted.is_err() && self.keep_failed_intermediate {
            warn!("Keeping {} for diagnosis", doc.html_path.display());
        } else {
            info!("Remove {}", doc.html_path.display());
            if let Err(e) = tokio::fs::remove_file(&doc.html_path).await {
                warn!("Cannot remove {}: {}", doc.html_path.display(), e);
            }
        }

        converted.map(|()| doc.pdf_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CopyConverter;

    #[async_trait]
    impl PdfConverter for CopyConverter {
        async fn convert(&self, source: &Path, target: &Path) -> Result<(), RecordError> {
            let html = tokio::fs::read(source).await.unwrap();
            let mut pdf = b"%PDF-1.4\n".to_vec();
            pdf.extend_from_slice(&html);
            tokio::fs::write(target, pdf).await.unwrap();
            Ok(())
        }
    }

    struct FailingConverter;

    #[async_trait]
    impl PdfConverter for FailingConverter {
        async fn convert(&self, source: &Path, _target: &Path) -> Result<(), RecordError> {
            Err(RecordError::Conversion {
                source_path: source.to_path_buf(),
                detail: "exit status: 1".into(),
            })
        }
    }

    async fn adapter(
        converter: Arc<dyn PdfConverter>,
        keep: bool,
    ) -> (tempfile::TempDir, ConversionAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        let config = BillingConfig::builder()
            .template_dir(&templates)
            .bills_dir(dir.path().join("bills"))
            .keep_failed_intermediate(keep)
            .build()
            .unwrap();
        let adapter = ConversionAdapter::new(&config, converter).await.unwrap();
        (dir, adapter)
    }

    #[test]
    fn paths_follow_member_name() {
        let doc = RenderedDocument::for_member(
            &PersonName::new("Hélène", "Lefèvre"),
            Path::new("templates"),
            Path::new("bills"),
        );
        assert_eq!(doc.html_path, PathBuf::from("templates/LEFEVRE_Helene_Facture.html"));
        assert_eq!(doc.pdf_path, PathBuf::from("bills/LEFEVRE_Helene_Facture.pdf"));
    }

    #[tokio::test]
    async fn convert_writes_pdf_and_removes_html() {
        let (dir, adapter) = adapter(Arc::new(CopyConverter), false).await;
        let member = PersonName::new("Jean", "Dupont");

        let pdf = adapter.convert(&member, "<p>v1</p>").await.unwrap();
        assert_eq!(pdf, dir.path().join("bills/DUPONT_Jean_Facture.pdf"));
        assert!(!adapter.paths_for(&member).html_path.exists());

        // Same person again: same file, new content.
        let again = adapter.convert(&member, "<p>v2</p>").await.unwrap();
        assert_eq!(again, pdf);
        let content = std::fs::read_to_string(&pdf).unwrap();
        assert!(content.ends_with("<p>v2</p>"));
    }

    #[tokio::test]
    async fn failed_conversion_cleans_up_by_default() {
        let (_dir, adapter) = adapter(Arc::new(FailingConverter), false).await;
        let member = PersonName::new("Jean", "Dupont");
        let err = adapter.convert(&member, "<p/>").await.unwrap_err();
        assert!(matches!(err, RecordError::Conversion { .. }));
        assert!(!adapter.paths_for(&member).html_path.exists());
    }

    #[tokio::test]
    async fn failed_conversion_can_keep_html() {
        let (_dir, adapter) = adapter(Arc::new(FailingConverter), true).await;
        let member = PersonName::new("Jean", "Dupont");
        adapter.convert(&member, "<p/>").await.unwrap_err();
        assert!(adapter.paths_for(&member).html_path.exists());
    }

    #[tokio::test]
    async fn missing_converter_binary_is_a_conversion_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.html");
        std::fs::write(&source, "<p/>").unwrap();
        let converter = WkHtmlToPdf::new(ConverterSettings {
            program: PathBuf::from("/definitely/not/wkhtmltopdf"),
            args: vec![],
        });
        let err = converter
            .convert(&source, &dir.path().join("a.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot run"), "got: {err}");
    }
}
