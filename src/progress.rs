//! Progress-callback trait for per-record billing events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BillingConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each record.
//!
//! # Example
//!
//! ```rust
//! use sjb_billing::{BatchProgressCallback, BillingConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     generated: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_record_complete(&self, label: &str, pdf: &Path) {
//!         let done = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("#{done} {label} → {}", pdf.display());
//!     }
//! }
//!
//! let config = BillingConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { generated: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::BatchStats;
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as it processes each record.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Records are processed one at a time, so calls never
/// overlap, but the trait is `Send + Sync` so a callback can be shared with
/// other tasks.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first record is read.
    fn on_batch_start(&self, mailing: bool) {
        let _ = mailing;
    }

    /// Called before a parsed record is rendered.
    fn on_record_start(&self, label: &str) {
        let _ = label;
    }

    /// Called when a record's PDF has been written.
    fn on_record_complete(&self, label: &str, pdf: &Path) {
        let _ = (label, pdf);
    }

    /// Called when a record is skipped or fails at any stage.
    fn on_record_error(&self, label: &str, error: &str) {
        let _ = (label, error);
    }

    /// Called when a record's mail has been accepted by the server.
    fn on_mail_sent(&self, label: &str, recipient: &str) {
        let _ = (label, recipient);
    }

    /// Called once after every record has been attempted.
    fn on_batch_complete(&self, stats: &BatchStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BillingConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
