//! The unit of work: one billed party, one member, one amount.

use crate::error::RecordError;
use crate::names::PersonName;
use rust_decimal::Decimal;
use std::str::FromStr;

/// One invoice to produce.
///
/// The member fields default to the billed party, which lets one person pay
/// for someone else's membership while the common case stays a single name.
/// Records are never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRecord {
    pub billed_first_name: String,
    pub billed_last_name: String,
    pub amount: Decimal,
    pub member_first_name: String,
    pub member_last_name: String,
    pub recipient_email: Option<String>,
    /// 1-based line number when the record came from a batch file.
    pub row: Option<u64>,
}

/// Raw, possibly incomplete inputs for a [`BillRecord`].
///
/// Both the CLI and the batch parser fill this in and let
/// [`RecordFields::into_record`] apply the presence, default and amount rules
/// in one place.
#[derive(Debug, Clone, Default)]
pub struct RecordFields<'a> {
    pub billed_first_name: Option<&'a str>,
    pub billed_last_name: Option<&'a str>,
    pub amount: Option<&'a str>,
    pub member_first_name: Option<&'a str>,
    pub member_last_name: Option<&'a str>,
    pub recipient_email: Option<&'a str>,
    pub row: Option<u64>,
}

impl RecordFields<'_> {
    /// Validate and normalise into a record.
    ///
    /// Every field is trimmed; empty strings count as absent.
    pub fn into_record(self) -> Result<BillRecord, RecordError> {
        let row = self.row;
        let billed_first = required(self.billed_first_name, "firstname", row)?;
        let billed_last = required(self.billed_last_name, "lastname", row)?;
        let raw_amount = required(self.amount, "amount", row)?;
        let amount = parse_amount(&raw_amount).ok_or(RecordError::InvalidAmount {
            row,
            value: raw_amount,
        })?;

        let member_first = present(self.member_first_name).unwrap_or_else(|| billed_first.clone());
        let member_last = present(self.member_last_name).unwrap_or_else(|| billed_last.clone());

        Ok(BillRecord {
            billed_first_name: billed_first,
            billed_last_name: billed_last,
            amount,
            member_first_name: member_first,
            member_last_name: member_last,
            recipient_email: present(self.recipient_email),
            row,
        })
    }
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(value: Option<&str>, field: &str, row: Option<u64>) -> Result<String, RecordError> {
    present(value).ok_or_else(|| RecordError::MissingField {
        row,
        field: field.to_string(),
    })
}

/// Parse a non-negative decimal amount. Accepts `,` as decimal separator.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let normalised = raw.trim().replace(',', ".");
    Decimal::from_str(&normalised)
        .ok()
        .filter(|d| !d.is_sign_negative())
}

impl BillRecord {
    /// Single-record constructor for explicit inputs.
    pub fn new(
        billed_first_name: &str,
        billed_last_name: &str,
        amount: Decimal,
    ) -> Result<Self, RecordError> {
        let amount = amount.to_string();
        RecordFields {
            billed_first_name: Some(billed_first_name),
            billed_last_name: Some(billed_last_name),
            amount: Some(&amount),
            ..Default::default()
        }
        .into_record()
    }

    /// Issue the invoice under another person's name.
    pub fn with_member(mut self, first_name: &str, last_name: &str) -> Self {
        if let Some(first) = present(Some(first_name)) {
            self.member_first_name = first;
        }
        if let Some(last) = present(Some(last_name)) {
            self.member_last_name = last;
        }
        self
    }

    /// Address to mail the invoice to.
    pub fn with_email(mut self, email: &str) -> Self {
        self.recipient_email = present(Some(email));
        self
    }

    /// The party responsible for payment, in display form.
    pub fn billed(&self) -> PersonName {
        PersonName::new(&self.billed_first_name, &self.billed_last_name)
    }

    /// The person the invoice is issued under, in display form.
    pub fn member(&self) -> PersonName {
        PersonName::new(&self.member_first_name, &self.member_last_name)
    }

    /// Short label for logs and progress lines: `row 3 (Jean DUPONT)`.
    pub fn label(&self) -> String {
        match self.row {
            Some(r) => format!("row {r} ({})", self.member()),
            None => self.member().display(),
        }
    }
}
