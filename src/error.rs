//! Row-level error taxonomy.
//!
//! Nothing in this module is fatal. A [`RowError`] rejects a single source
//! record and a [`FieldParseError`] degrades a single field; both are counted
//! by category in the import summary. Stream-level failures (missing file,
//! unreadable header, I/O errors) are plain `anyhow` errors raised by the
//! pipeline itself.

use thiserror::Error;

/// Why a source record was rejected before reaching the writer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    /// The mapped company number is absent, blank, or a null sentinel.
    #[error("company number is missing")]
    MissingKey,

    /// The record has a key but no usable company name (`company_name` is NOT NULL).
    #[error("company name is missing for {0}")]
    MissingName(String),

    /// The record is not valid UTF-8.
    #[error("record is not valid UTF-8: {0}")]
    Encoding(String),

    /// Anything else the parser could not make sense of.
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl RowError {
    /// Stable key used in the error breakdown of the import summary.
    pub fn category(&self) -> &'static str {
        match self {
            RowError::MissingKey => "missing_company_number",
            RowError::MissingName(_) => "missing_company_name",
            RowError::Encoding(_) => "invalid_utf8",
            RowError::Malformed(_) => "malformed_row",
        }
    }
}

/// What kind of conversion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Date,
    Integer,
    Flag,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Date => write!(f, "date"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Flag => write!(f, "flag"),
        }
    }
}

/// A per-field conversion failure. The row is still written; the field is
/// kept verbatim (dates) or nulled/defaulted (integers, flags).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot parse {field} as {kind}: {value:?}")]
pub struct FieldParseError {
    pub field: &'static str,
    pub kind: FieldKind,
    pub value: String,
}

impl FieldParseError {
    pub fn category(&self) -> String {
        format!("field_parse:{}", self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(RowError::MissingKey.category(), "missing_company_number");
        assert_eq!(
            RowError::MissingName("01234567".into()).category(),
            "missing_company_name"
        );
        let err = FieldParseError {
            field: "accounting_reference_date_day",
            kind: FieldKind::Integer,
            value: "x".into(),
        };
        assert_eq!(err.category(), "field_parse:accounting_reference_date_day");
        assert!(err.to_string().contains("integer"));
    }
}
