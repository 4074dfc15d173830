//! Row normalization: logical fields in, typed [`Company`] out.
//!
//! Pure functions, no I/O. A row is rejected only when it has no usable key
//! or name; every other defect degrades a single field and is reported as a
//! [`FieldParseError`] alongside the normalized record.

use chrono::NaiveDate;

use crate::error::{FieldKind, FieldParseError, RowError};
use crate::mapping::{Field, LogicalRow, PREVIOUS_NAME_COLUMNS, SIC_COLUMNS};
use crate::models::Company;

/// Values treated as null after trimming (compared case-insensitively).
const NULL_SENTINELS: &[&str] = &["NULL", "NONE", "N/A"];

/// Known status spellings. Lookup is case-sensitive; anything not listed
/// falls back to the lowercased original.
const STATUS_TABLE: &[(&str, &str)] = &[
    ("Active", "active"),
    ("ACTIVE", "active"),
    ("Active - Proposal to Strike off", "active-proposal-to-strike-off"),
    ("Dissolved", "dissolved"),
    ("DISSOLVED", "dissolved"),
    ("Liquidation", "liquidation"),
    ("LIQUIDATION", "liquidation"),
    ("In Liquidation", "liquidation"),
    ("Receivership", "receivership"),
    ("RECEIVERSHIP", "receivership"),
    ("Administration", "administration"),
    ("ADMINISTRATION", "administration"),
    ("In Administration", "administration"),
    ("Voluntary Arrangement", "voluntary-arrangement"),
    ("VOLUNTARY ARRANGEMENT", "voluntary-arrangement"),
    ("Converted/Closed", "converted-closed"),
    ("CONVERTED/CLOSED", "converted-closed"),
    ("Insolvency Proceedings", "insolvency-proceedings"),
    ("INSOLVENCY PROCEEDINGS", "insolvency-proceedings"),
];

/// A normalized record plus the field-level problems found on the way.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub company: Company,
    pub warnings: Vec<FieldParseError>,
    /// Status spelling missing from the status table, as it appeared.
    pub unmapped_status: Option<String>,
}

/// Normalize one logical row.
pub fn normalize(row: &LogicalRow) -> Result<Normalized, RowError> {
    let company_number = clean_value(row.get(Field::CompanyNumber)).ok_or(RowError::MissingKey)?;
    let company_name = clean_value(row.get(Field::CompanyName))
        .ok_or_else(|| RowError::MissingName(company_number.clone()))?;

    let mut warnings = Vec::new();
    let text = |field: Field| clean_value(row.get(field));
    let raw_status = text(Field::CompanyStatus);
    let unmapped_status = raw_status
        .as_deref()
        .filter(|s| lookup_status(s).is_none())
        .map(str::to_string);

    let company = Company {
        company_status: raw_status.as_deref().map(normalize_status),
        company_type: text(Field::CompanyCategory),
        jurisdiction: text(Field::CountryOfOrigin),
        date_of_creation: parse_date(
            "date_of_creation",
            row.get(Field::IncorporationDate),
            &mut warnings,
        ),
        date_of_cessation: parse_date(
            "date_of_cessation",
            row.get(Field::DissolutionDate),
            &mut warnings,
        ),
        address_line_1: text(Field::AddressLine1),
        address_line_2: text(Field::AddressLine2),
        locality: text(Field::PostTown),
        region: text(Field::County),
        country: text(Field::Country),
        postal_code: text(Field::PostCode),
        po_box: text(Field::PoBox),
        care_of: text(Field::CareOf),
        sic_codes: parse_sic_codes(row),
        previous_names: parse_previous_names(row),
        accounting_reference_day: parse_int(
            "accounting_reference_date_day",
            row.get(Field::AccountRefDay),
            &mut warnings,
        ),
        accounting_reference_month: parse_int(
            "accounting_reference_date_month",
            row.get(Field::AccountRefMonth),
            &mut warnings,
        ),
        last_accounts_made_up_to: parse_date(
            "last_accounts_made_up_to",
            row.get(Field::AccountsLastMadeUp),
            &mut warnings,
        ),
        accounts_category: text(Field::AccountsCategory),
        confirmation_statement_last_made_up_to: parse_date(
            "confirmation_statement_last_made_up_to",
            row.get(Field::ConfStmtLastMadeUp),
            &mut warnings,
        ),
        has_charges: parse_flag("has_charges", row.get(Field::MortgageCharges), &mut warnings),
        has_been_liquidated: parse_flag(
            "has_been_liquidated",
            row.get(Field::Liquidated),
            &mut warnings,
        ),
        has_insolvency_history: parse_flag(
            "has_insolvency_history",
            row.get(Field::InsolvencyHistory),
            &mut warnings,
        ),
        company_number,
        company_name,
    };

    Ok(Normalized {
        company,
        warnings,
        unmapped_status,
    })
}

/// Trim, and map blanks and null sentinels to `None`.
pub fn clean_value(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty()
        || NULL_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Map a cleaned status to the controlled vocabulary, or lowercase it.
pub fn normalize_status(status: &str) -> String {
    lookup_status(status)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_lowercase())
}

/// The controlled spelling for `status`, if the table knows it.
pub fn lookup_status(status: &str) -> Option<&'static str> {
    STATUS_TABLE
        .iter()
        .find(|(spelling, _)| *spelling == status)
        .map(|(_, normalized)| *normalized)
}

/// Rewrite `DD/MM/YYYY` as `YYYY-MM-DD`.
///
/// Values that are already ISO pass through silently. Anything else is kept
/// verbatim and reported.
pub fn parse_date(
    field: &'static str,
    value: Option<&str>,
    warnings: &mut Vec<FieldParseError>,
) -> Option<String> {
    let cleaned = clean_value(value)?;
    if let Some(date) = parse_day_first(&cleaned) {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if parse_iso(&cleaned).is_none() {
        warnings.push(FieldParseError {
            field,
            kind: FieldKind::Date,
            value: cleaned.clone(),
        });
    }
    Some(cleaned)
}

/// `D/M/YYYY` with one or two digit day and month and a four digit year.
///
/// chrono's `%Y` accepts any width and a sign, so the shape is checked here.
fn parse_day_first(value: &str) -> Option<NaiveDate> {
    let mut parts = value.split('/');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some()
        || !is_digits(day, 1..=2)
        || !is_digits(month, 1..=2)
        || !is_digits(year, 4..=4)
    {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn parse_iso(value: &str) -> Option<NaiveDate> {
    let mut parts = value.split('-');
    let (year, month, day) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some()
        || !is_digits(year, 4..=4)
        || !is_digits(month, 2..=2)
        || !is_digits(day, 2..=2)
    {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn is_digits(s: &str, width: std::ops::RangeInclusive<usize>) -> bool {
    width.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_int(
    field: &'static str,
    value: Option<&str>,
    warnings: &mut Vec<FieldParseError>,
) -> Option<i64> {
    let cleaned = clean_value(value)?;
    match cleaned.parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warnings.push(FieldParseError {
                field,
                kind: FieldKind::Integer,
                value: cleaned,
            });
            None
        }
    }
}

/// Indicator columns: `TRUE`/`YES`/`Y` or a nonzero number mean true.
fn parse_flag(field: &'static str, value: Option<&str>, warnings: &mut Vec<FieldParseError>) -> bool {
    let Some(cleaned) = clean_value(value) else {
        return false;
    };
    let upper = cleaned.to_ascii_uppercase();
    match upper.as_str() {
        "TRUE" | "YES" | "Y" => return true,
        "FALSE" | "NO" | "N" => return false,
        _ => {}
    }
    if let Ok(n) = cleaned.parse::<f64>() {
        return n != 0.0;
    }
    warnings.push(FieldParseError {
        field,
        kind: FieldKind::Flag,
        value: cleaned,
    });
    false
}

/// Codes from `"<code> - <description>"` entries, in column order.
fn parse_sic_codes(row: &LogicalRow) -> Option<Vec<String>> {
    let codes: Vec<String> = (1..=SIC_COLUMNS)
        .filter_map(|n| row.get(Field::SicText(n)))
        .filter_map(|text| {
            let text = text.trim();
            let code = text.split_once(" - ").map_or(text, |(code, _)| code).trim();
            (!code.is_empty()).then(|| code.to_string())
        })
        .collect();
    (!codes.is_empty()).then_some(codes)
}

fn parse_previous_names(row: &LogicalRow) -> Option<Vec<String>> {
    let names: Vec<String> = (1..=PREVIOUS_NAME_COLUMNS)
        .filter_map(|n| clean_value(row.get(Field::PreviousName(n))))
        .collect();
    (!names.is_empty()).then_some(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_row() -> LogicalRow {
        [
            (Field::CompanyNumber, "01234567"),
            (Field::CompanyName, "ACME WIDGETS LIMITED"),
        ]
        .into_iter()
        .collect()
    }

    fn with(mut row: LogicalRow, field: Field, value: &str) -> LogicalRow {
        row.insert(field, value);
        row
    }

    #[test]
    fn clean_value_handles_blanks_and_sentinels() {
        assert_eq!(clean_value(None), None);
        assert_eq!(clean_value(Some("   ")), None);
        assert_eq!(clean_value(Some("null")), None);
        assert_eq!(clean_value(Some(" None ")), None);
        assert_eq!(clean_value(Some("n/a")), None);
        assert_eq!(clean_value(Some("  ACME  ")), Some("ACME".to_string()));
    }

    #[test]
    fn missing_key_is_rejected() {
        for key in ["", "   ", "NULL", "none", "N/A"] {
            let row = with(base_row(), Field::CompanyNumber, key);
            assert_eq!(normalize(&row).unwrap_err(), RowError::MissingKey, "key {:?}", key);
        }
        let row: LogicalRow = [(Field::CompanyName, "NO NUMBER LTD")].into_iter().collect();
        assert_eq!(normalize(&row).unwrap_err(), RowError::MissingKey);
    }

    #[test]
    fn missing_name_is_rejected() {
        let row: LogicalRow = [(Field::CompanyNumber, "SC000001")].into_iter().collect();
        assert_eq!(
            normalize(&row).unwrap_err(),
            RowError::MissingName("SC000001".to_string())
        );
    }

    #[test]
    fn sic_code_prefix_is_extracted() {
        let row = with(
            base_row(),
            Field::SicText(1),
            "01110 - Growing of cereals (except rice), leguminous crops and oil seeds",
        );
        let company = normalize(&row).unwrap().company;
        assert_eq!(company.sic_codes, Some(vec!["01110".to_string()]));
    }

    #[test]
    fn sic_codes_keep_column_order_and_skip_blanks() {
        let row = with(base_row(), Field::SicText(3), "82990 - Other business support");
        let row = with(row, Field::SicText(1), "70229 - Management consultancy");
        let row = with(row, Field::SicText(2), "   ");
        let row = with(row, Field::SicText(4), "99999");
        let company = normalize(&row).unwrap().company;
        assert_eq!(
            company.sic_codes,
            Some(vec!["70229".into(), "82990".into(), "99999".into()])
        );
    }

    #[test]
    fn no_sic_codes_is_none() {
        let company = normalize(&base_row()).unwrap().company;
        assert_eq!(company.sic_codes, None);
        assert_eq!(company.sic_codes_json(), None);
    }

    #[test]
    fn status_normalization() {
        assert_eq!(normalize_status("ACTIVE"), "active");
        assert_eq!(normalize_status("Active"), "active");
        assert_eq!(normalize_status("Voluntary Arrangement"), "voluntary-arrangement");
        assert_eq!(normalize_status("Converted/Closed"), "converted-closed");
        assert_eq!(normalize_status("Bespoke-Unknown"), "bespoke-unknown");

        let row = with(base_row(), Field::CompanyStatus, "  ACTIVE ");
        let normalized = normalize(&row).unwrap();
        assert_eq!(normalized.company.company_status.as_deref(), Some("active"));
        assert_eq!(normalized.unmapped_status, None);
    }

    #[test]
    fn unknown_status_spelling_is_surfaced() {
        let row = with(base_row(), Field::CompanyStatus, "Registered Society ");
        let normalized = normalize(&row).unwrap();
        assert_eq!(
            normalized.company.company_status.as_deref(),
            Some("registered society")
        );
        assert_eq!(normalized.unmapped_status.as_deref(), Some("Registered Society"));
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn dates_are_rewritten_to_iso() {
        let mut warnings = Vec::new();
        assert_eq!(
            parse_date("d", Some("05/03/2021"), &mut warnings).as_deref(),
            Some("2021-03-05")
        );
        assert_eq!(
            parse_date("d", Some("5/3/2021"), &mut warnings).as_deref(),
            Some("2021-03-05")
        );
        assert_eq!(
            parse_date("d", Some("2021-03-05"), &mut warnings).as_deref(),
            Some("2021-03-05")
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn only_four_digit_years_are_rewritten() {
        let mut warnings = Vec::new();
        for value in [
            "05/03/21",
            "05/03/-2021",
            "05/03/+2021",
            "05/03/02021",
            "05/03/2021/1",
            "31/02/2021",
            "21-03-05",
            "+2021-03-05",
        ] {
            assert_eq!(
                parse_date("d", Some(value), &mut warnings).as_deref(),
                Some(value),
                "{:?}",
                value
            );
        }
        assert_eq!(warnings.len(), 8);
        assert!(warnings.iter().all(|w| w.kind == FieldKind::Date));
    }

    #[test]
    fn unparsable_dates_are_kept_and_reported() {
        let row = with(base_row(), Field::IncorporationDate, "sometime in 1999");
        let normalized = normalize(&row).unwrap();
        assert_eq!(
            normalized.company.date_of_creation.as_deref(),
            Some("sometime in 1999")
        );
        assert_eq!(normalized.warnings.len(), 1);
        assert_eq!(normalized.warnings[0].category(), "field_parse:date_of_creation");
    }

    #[test]
    fn bad_integers_become_none_without_rejecting_row() {
        let row = with(base_row(), Field::AccountRefDay, "thirty");
        let row = with(row, Field::AccountRefMonth, "12");
        let normalized = normalize(&row).unwrap();
        assert_eq!(normalized.company.accounting_reference_day, None);
        assert_eq!(normalized.company.accounting_reference_month, Some(12));
        assert_eq!(normalized.warnings[0].kind, FieldKind::Integer);
    }

    #[test]
    fn flags() {
        let company = normalize(&base_row()).unwrap().company;
        assert!(!company.has_charges);
        assert!(!company.has_been_liquidated);

        let row = with(base_row(), Field::MortgageCharges, "3");
        let row = with(row, Field::Liquidated, "true");
        let row = with(row, Field::InsolvencyHistory, "0");
        let company = normalize(&row).unwrap().company;
        assert!(company.has_charges);
        assert!(company.has_been_liquidated);
        assert!(!company.has_insolvency_history);
    }

    #[test]
    fn previous_names_in_column_order() {
        let row = with(base_row(), Field::PreviousName(2), "ACME HOLDINGS LTD");
        let row = with(row, Field::PreviousName(1), "ACME LTD");
        let row = with(row, Field::PreviousName(5), "NULL");
        let company = normalize(&row).unwrap().company;
        assert_eq!(
            company.previous_names,
            Some(vec!["ACME LTD".to_string(), "ACME HOLDINGS LTD".to_string()])
        );
    }

    #[test]
    fn address_fields_are_independent() {
        let row = with(base_row(), Field::PostCode, " SW1A 1AA ");
        let row = with(row, Field::PostTown, "LONDON");
        let company = normalize(&row).unwrap().company;
        assert_eq!(company.postal_code.as_deref(), Some("SW1A 1AA"));
        assert_eq!(company.locality.as_deref(), Some("LONDON"));
        assert_eq!(company.address_line_1, None);
    }
}
