//! Pipeline stages for invoice generation.
//!
//! Each submodule implements one step. Stages only meet in
//! [`crate::generate`], which drives records through them in order.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ render ──▶ pdf ──▶ mail ──▶ dispatch
//! (args/CSV)  (jinja)   (wkhtmltopdf)  (MIME)  (SMTP)
//! ```
//!
//! 1. [`source`]   — one record from arguments, or a semicolon-separated file
//! 2. [`render`]   — bind a record to the HTML template
//! 3. [`pdf`]      — write the HTML, run the converter, clean up
//! 4. [`mail`]     — HTML body plus the invoice as a base64 attachment
//! 5. [`dispatch`] — one authenticated SMTP session for the whole run

pub mod dispatch;
pub mod mail;
pub mod pdf;
pub mod render;
pub mod source;
