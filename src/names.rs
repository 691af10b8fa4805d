//! Name normalisation for display text and file names.
//!
//! The same person appears in two forms:
//!
//! * the **display form** printed on the invoice and in mail greetings:
//!   first name capitalised, last name upper-cased (`Jean DUPONT`);
//! * the **file-safe form** used to build output paths: the display form
//!   with combining diacritics removed (`Hélène` → `Helene`), so invoice
//!   names stay plain ASCII letters on every filesystem.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// First letter upper-cased, the rest lower-cased (`jEAN` → `Jean`).
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Every letter upper-cased (`Dupont` → `DUPONT`).
pub fn uppercase(s: &str) -> String {
    s.to_uppercase()
}

/// Remove combining marks after canonical decomposition (NFD).
pub fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// A first/last name pair in display form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonName {
    first: String,
    last: String,
}

impl PersonName {
    /// Normalise raw first and last names to display form.
    pub fn new(first: &str, last: &str) -> Self {
        Self {
            first: capitalize(first.trim()),
            last: uppercase(last.trim()),
        }
    }

    /// Capitalised first name.
    pub fn first(&self) -> &str {
        &self.first
    }

    /// Upper-cased last name.
    pub fn last(&self) -> &str {
        &self.last
    }

    /// `Firstname LASTNAME`, as printed on the invoice.
    pub fn display(&self) -> String {
        format!("{} {}", self.first, self.last)
    }

    /// `LASTNAME_Firstname` without diacritics, the stem of every file
    /// generated for this person.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", strip_accents(&self.last), strip_accents(&self.first))
    }
}

impl std::fmt::Display for PersonName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.first, self.last)
    }
}
