//! Declarative mapping from logical field names to source column names.
//!
//! The upstream extract has drifted over time: some headers carry a stray
//! leading space (`" CompanyNumber"`), others do not. Every logical field
//! therefore owns a list of candidate column names, and all "which column is
//! this" knowledge lives here. The normalizer only ever asks for a [`Field`].
//!
//! Binding happens once per file: [`FieldMap::bind`] resolves the header to
//! column indices, and [`BoundFields::resolve`] then turns each record into a
//! [`LogicalRow`] without any string comparisons.

use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Number of numbered `SICCode.SicText_N` columns.
pub const SIC_COLUMNS: u8 = 4;
/// Number of numbered `PreviousName_N.CompanyName` columns.
pub const PREVIOUS_NAME_COLUMNS: u8 = 10;

/// A logical field of a source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    CompanyNumber,
    CompanyName,
    CompanyStatus,
    IncorporationDate,
    DissolutionDate,
    CompanyCategory,
    CountryOfOrigin,
    AddressLine1,
    AddressLine2,
    PostTown,
    County,
    Country,
    PostCode,
    PoBox,
    CareOf,
    AccountRefDay,
    AccountRefMonth,
    AccountsLastMadeUp,
    AccountsCategory,
    ConfStmtLastMadeUp,
    MortgageCharges,
    Liquidated,
    InsolvencyHistory,
    /// 1-based SIC text column.
    SicText(u8),
    /// 1-based previous name column.
    PreviousName(u8),
}

const SIMPLE_FIELDS: &[(Field, &str)] = &[
    (Field::CompanyNumber, "company_number"),
    (Field::CompanyName, "company_name"),
    (Field::CompanyStatus, "company_status"),
    (Field::IncorporationDate, "incorporation_date"),
    (Field::DissolutionDate, "dissolution_date"),
    (Field::CompanyCategory, "company_category"),
    (Field::CountryOfOrigin, "country_of_origin"),
    (Field::AddressLine1, "address_line_1"),
    (Field::AddressLine2, "address_line_2"),
    (Field::PostTown, "post_town"),
    (Field::County, "county"),
    (Field::Country, "country"),
    (Field::PostCode, "postcode"),
    (Field::PoBox, "po_box"),
    (Field::CareOf, "care_of"),
    (Field::AccountRefDay, "acc_ref_day"),
    (Field::AccountRefMonth, "acc_ref_month"),
    (Field::AccountsLastMadeUp, "acc_last_made_up"),
    (Field::AccountsCategory, "acc_category"),
    (Field::ConfStmtLastMadeUp, "conf_stmt_last_made_up"),
    (Field::MortgageCharges, "mort_charges"),
    (Field::Liquidated, "has_been_liquidated"),
    (Field::InsolvencyHistory, "has_insolvency_history"),
];

impl Field {
    /// Every logical field, numbered columns expanded, in a stable order.
    pub fn all() -> Vec<Field> {
        let mut fields: Vec<Field> = SIMPLE_FIELDS.iter().map(|(f, _)| *f).collect();
        fields.extend((1..=SIC_COLUMNS).map(Field::SicText));
        fields.extend((1..=PREVIOUS_NAME_COLUMNS).map(Field::PreviousName));
        fields
    }

    /// Fields the current extract does not carry. Older extracts had them,
    /// so they still bind when present; absence is not worth a warning.
    pub fn is_optional(self) -> bool {
        matches!(self, Field::Liquidated | Field::InsolvencyHistory)
    }

    fn default_candidates(self) -> Vec<String> {
        let names: &[&str] = match self {
            Field::CompanyNumber => &["CompanyNumber", " CompanyNumber"],
            Field::CompanyName => &["CompanyName"],
            Field::CompanyStatus => &["CompanyStatus"],
            Field::IncorporationDate => &["IncorporationDate"],
            Field::DissolutionDate => &["DissolutionDate"],
            Field::CompanyCategory => &["CompanyCategory"],
            Field::CountryOfOrigin => &["CountryOfOrigin"],
            Field::AddressLine1 => &["RegAddress.AddressLine1"],
            Field::AddressLine2 => &["RegAddress.AddressLine2", " RegAddress.AddressLine2"],
            Field::PostTown => &["RegAddress.PostTown"],
            Field::County => &["RegAddress.County"],
            Field::Country => &["RegAddress.Country"],
            Field::PostCode => &["RegAddress.PostCode"],
            Field::PoBox => &["RegAddress.POBox"],
            Field::CareOf => &["RegAddress.CareOf"],
            Field::AccountRefDay => &["Accounts.AccountRefDay"],
            Field::AccountRefMonth => &["Accounts.AccountRefMonth"],
            Field::AccountsLastMadeUp => &["Accounts.LastMadeUpDate"],
            Field::AccountsCategory => &["Accounts.AccountCategory"],
            Field::ConfStmtLastMadeUp => &["ConfStmtLastMadeUpDate", " ConfStmtLastMadeUpDate"],
            Field::MortgageCharges => &["Mortgages.NumMortCharges"],
            Field::Liquidated => &["HasBeenLiquidated"],
            Field::InsolvencyHistory => &["HasInsolvencyHistory"],
            Field::SicText(n) => return vec![format!("SICCode.SicText_{}", n)],
            Field::PreviousName(n) => {
                return vec![
                    format!("PreviousName_{}.CompanyName", n),
                    format!(" PreviousName_{}.CompanyName", n),
                ]
            }
        };
        names.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::SicText(n) => write!(f, "sic_text_{}", n),
            Field::PreviousName(n) => write!(f, "previous_name_{}", n),
            simple => {
                let name = SIMPLE_FIELDS
                    .iter()
                    .find(|(field, _)| field == simple)
                    .map(|(_, name)| *name)
                    .unwrap_or("unknown");
                f.write_str(name)
            }
        }
    }
}

impl FromStr for Field {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some((field, _)) = SIMPLE_FIELDS.iter().find(|(_, name)| *name == s) {
            return Ok(*field);
        }
        let numbered = |prefix: &str, max: u8| -> Option<u8> {
            s.strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=max).contains(n))
        };
        if let Some(n) = numbered("sic_text_", SIC_COLUMNS) {
            return Ok(Field::SicText(n));
        }
        if let Some(n) = numbered("previous_name_", PREVIOUS_NAME_COLUMNS) {
            return Ok(Field::PreviousName(n));
        }
        Err(anyhow!("Unknown logical field: '{}'", s))
    }
}

/// Logical field → candidate source column names.
#[derive(Debug, Clone)]
pub struct FieldMap {
    candidates: BTreeMap<Field, Vec<String>>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            candidates: Field::all()
                .into_iter()
                .map(|f| (f, f.default_candidates()))
                .collect(),
        }
    }
}

impl FieldMap {
    /// The built-in table with some fields' candidate lists replaced.
    ///
    /// Keys are logical names (`company_number`, `sic_text_2`, ...). An
    /// unknown name or an empty candidate list is an error.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut map = Self::default();
        for (name, columns) in overrides {
            let field: Field = name.parse()?;
            if columns.is_empty() {
                bail!("mapping.{} must list at least one column name", name);
            }
            map.candidates.insert(field, columns.clone());
        }
        Ok(map)
    }

    pub fn candidates(&self, field: Field) -> &[String] {
        self.candidates.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve header names to column indices.
    ///
    /// An exact match on any candidate wins. Failing that, a header matches
    /// a candidate when both are equal after trimming whitespace.
    pub fn bind<S: AsRef<str>>(&self, headers: &[S]) -> BoundFields {
        let mut columns = Vec::with_capacity(self.candidates.len());
        let mut missing = Vec::new();

        for (field, candidates) in &self.candidates {
            let exact = candidates
                .iter()
                .find_map(|c| headers.iter().position(|h| h.as_ref() == c));
            let found = exact.or_else(|| {
                candidates.iter().find_map(|c| {
                    headers
                        .iter()
                        .position(|h| h.as_ref().trim() == c.trim())
                })
            });
            match found {
                Some(idx) => columns.push((*field, idx)),
                None => missing.push(*field),
            }
        }

        BoundFields { columns, missing }
    }
}

/// A [`FieldMap`] resolved against one concrete header row.
#[derive(Debug, Clone)]
pub struct BoundFields {
    columns: Vec<(Field, usize)>,
    missing: Vec<Field>,
}

impl BoundFields {
    pub fn column_of(&self, field: Field) -> Option<usize> {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, idx)| *idx)
    }

    /// Logical fields with no matching header column.
    pub fn missing(&self) -> &[Field] {
        &self.missing
    }

    /// Missing fields the extract is expected to carry.
    pub fn missing_expected(&self) -> Vec<Field> {
        self.missing
            .iter()
            .copied()
            .filter(|f| !f.is_optional())
            .collect()
    }

    /// Map one record to logical fields. Absent and blank cells are left out.
    pub fn resolve<R: RecordCells + ?Sized>(&self, record: &R) -> LogicalRow {
        let mut row = LogicalRow::default();
        for (field, idx) in &self.columns {
            if let Some(value) = record.cell(*idx) {
                if !value.trim().is_empty() {
                    row.values.insert(*field, value.to_string());
                }
            }
        }
        row
    }
}

/// Indexed access to the cells of a raw record.
pub trait RecordCells {
    fn cell(&self, idx: usize) -> Option<&str>;
}

impl RecordCells for csv::StringRecord {
    fn cell(&self, idx: usize) -> Option<&str> {
        self.get(idx)
    }
}

impl RecordCells for Vec<String> {
    fn cell(&self, idx: usize) -> Option<&str> {
        self.get(idx).map(String::as_str)
    }
}

/// Logical field → raw text for one record. Missing means null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalRow {
    values: HashMap<Field, String>,
}

impl LogicalRow {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn insert(&mut self, field: Field, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V: Into<String>> FromIterator<(Field, V)> for LogicalRow {
    fn from_iter<I: IntoIterator<Item = (Field, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(f, v)| (f, v.into())).collect(),
        }
    }
}
