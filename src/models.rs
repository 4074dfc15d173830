//! Core data models used throughout the loader.
//!
//! A [`Company`] is the unit of storage: one fully normalized registry record,
//! keyed by `company_number`. It is produced by [`crate::normalize`] and
//! consumed by the [`crate::writer`].

use serde::{Deserialize, Serialize};

/// A normalized company record, ready for upsert.
///
/// `imported_at`, `last_updated`, `search_popularity` and `risk_score` are
/// not part of this struct: the store assigns the timestamps and the query
/// service owns the scores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub company_number: String,
    pub company_name: String,
    pub company_status: Option<String>,
    pub company_type: Option<String>,
    pub jurisdiction: Option<String>,

    /// ISO-8601 (`YYYY-MM-DD`) when the source date parsed, otherwise verbatim.
    pub date_of_creation: Option<String>,
    pub date_of_cessation: Option<String>,

    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub po_box: Option<String>,
    pub care_of: Option<String>,

    /// `None` means the source had no codes at all; never `Some(vec![])`.
    pub sic_codes: Option<Vec<String>>,
    /// Same null-vs-empty convention as `sic_codes`.
    pub previous_names: Option<Vec<String>>,

    pub accounting_reference_day: Option<i64>,
    pub accounting_reference_month: Option<i64>,
    pub last_accounts_made_up_to: Option<String>,
    pub accounts_category: Option<String>,
    pub confirmation_statement_last_made_up_to: Option<String>,

    pub has_charges: bool,
    pub has_been_liquidated: bool,
    pub has_insolvency_history: bool,
}

impl Company {
    /// JSON text for a multi-valued column, or `None` when there is no data.
    pub fn sic_codes_json(&self) -> Option<String> {
        to_json_list(self.sic_codes.as_deref())
    }

    pub fn previous_names_json(&self) -> Option<String> {
        to_json_list(self.previous_names.as_deref())
    }
}

fn to_json_list(values: Option<&[String]>) -> Option<String> {
    match values {
        Some(v) if !v.is_empty() => serde_json::to_string(v).ok(),
        _ => None,
    }
}

/// Persisted resume position for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Source file name the offset refers to.
    pub source: String,
    /// Number of source records fully handled (written or rejected).
    pub offset: u64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_serialize_to_none() {
        let mut c = Company::default();
        assert_eq!(c.sic_codes_json(), None);
        c.sic_codes = Some(vec![]);
        assert_eq!(c.sic_codes_json(), None);
        c.sic_codes = Some(vec!["01110".into(), "47110".into()]);
        assert_eq!(c.sic_codes_json().as_deref(), Some(r#"["01110","47110"]"#));
    }
}
