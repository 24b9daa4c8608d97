//! Domain types for PT permit synchronization.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. A [`DatasetRef`] is meaningful only relative to its owning
//! [`StoreId`]; moving data between stores is always an explicit operation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Environments and store identity
// ---------------------------------------------------------------------------

/// The four named database environments the pipeline moves data between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Staging,
    Production,
    ReplicatedProduction,
    ExternalSource,
}

impl Environment {
    /// All environments in a fixed, report-stable order.
    pub fn all() -> [Environment; 4] {
        [
            Environment::Staging,
            Environment::Production,
            Environment::ReplicatedProduction,
            Environment::ExternalSource,
        ]
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
            Environment::ReplicatedProduction => write!(f, "replicated_production"),
            Environment::ExternalSource => write!(f, "external_source"),
        }
    }
}

/// Identity of a data store: a named environment or a file container
/// (the archival geodatabase and its mirror are addressed by path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreId {
    Env(Environment),
    File(PathBuf),
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreId::Env(env) => env.fmt(f),
            StoreId::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<Environment> for StoreId {
    fn from(env: Environment) -> Self {
        StoreId::Env(env)
    }
}

/// A strongly-typed dataset (table or feature collection) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetName(pub String);

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DatasetName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DatasetName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A dataset reference: store identity plus dataset name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub store: StoreId,
    pub name: DatasetName,
}

impl DatasetRef {
    pub fn new(store: impl Into<StoreId>, name: impl Into<DatasetName>) -> Self {
        Self {
            store: store.into(),
            name: name.into(),
        }
    }

    /// Reference a dataset inside a file container.
    pub fn in_container(path: impl Into<PathBuf>, name: impl Into<DatasetName>) -> Self {
        Self {
            store: StoreId::File(path.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.name)
    }
}

// ---------------------------------------------------------------------------
// Row model
// ---------------------------------------------------------------------------

/// A single attribute value. `Real` carries totals; `Date` carries issue and
/// expiration dates; `Null` is a present-but-empty attribute.
///
/// Untagged serde keeps stored rows human-readable. Variant order matters:
/// `Date` must be tried before `Text` or ISO date strings deserialize as
/// plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Real(f64),
    Date(NaiveDate),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            FieldValue::Real(x) => Some(*x),
            FieldValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// An attribute row. `BTreeMap` keeps serialized rows field-ordered so stored
/// datasets diff cleanly between runs.
pub type Row = BTreeMap<String, FieldValue>;

/// Canonical field names shared by every PT dataset.
pub mod fields {
    pub const PERMIT_NUMBER: &str = "PERMIT_NUMBER";
    pub const STATUS_CODE: &str = "STATUS_CODE";
    pub const EXP_DATE: &str = "EXP_DATE";
    pub const DATE_ISSUED: &str = "DATE_ISSUED";
    pub const ENTITY_NAME: &str = "ENTITY_NAME";
    pub const WATER_CODE: &str = "WATER_CODE";
    pub const PURPOSE_CODE: &str = "PURPOSE_CODE";
    pub const SIC_CODE: &str = "SIC_CODE";
    pub const YEAR_ISSUED: &str = "YEAR_ISSUED";
    pub const PURPOSE: &str = "PURPOSE";
    pub const COUNTY: &str = "COUNTY";
    pub const TOTAL_ACRE_FEET: &str = "TOTAL_ACRE_FEET";
    pub const SHAPE: &str = "SHAPE";
    pub const OBJECT_ID: &str = "OBJECTID";
    pub const IN_FID: &str = "IN_FID";
    /// Lookup-table key column (code to be substituted).
    pub const CODE_VALUE: &str = "CODE_VALUE";
    /// Lookup-table value column (human-readable description).
    pub const DESCRIPTION: &str = "DESCRIPTION";
}

// ---------------------------------------------------------------------------
// Row filters
// ---------------------------------------------------------------------------

/// A row predicate evaluated by the backend during exports and derived-table
/// builds. Filters are pure data so operation lists stay declarative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowFilter {
    /// `STATUS_CODE` is NULL or in the configured active-status set.
    StatusIn { codes: Vec<Option<String>> },
    /// `EXP_DATE` is present and on or after the given date.
    ExpiresOnOrAfter { date: NaiveDate },
    /// `DATE_ISSUED` is present and on or after the given date.
    IssuedOnOrAfter { date: NaiveDate },
    /// `ENTITY_NAME` is present and not one of the redacted names.
    ExcludeEntities { names: Vec<String> },
    /// `YEAR_ISSUED` equals the given year.
    YearEquals { year: i32 },
}

impl RowFilter {
    /// Evaluate the predicate against one row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            RowFilter::StatusIn { codes } => match row.get(fields::STATUS_CODE) {
                None | Some(FieldValue::Null) => codes.contains(&None),
                Some(value) => value
                    .as_text()
                    .map(|code| codes.iter().any(|c| c.as_deref() == Some(code)))
                    .unwrap_or(false),
            },
            RowFilter::ExpiresOnOrAfter { date } => row
                .get(fields::EXP_DATE)
                .and_then(FieldValue::as_date)
                .map(|d| d >= *date)
                .unwrap_or(false),
            RowFilter::IssuedOnOrAfter { date } => row
                .get(fields::DATE_ISSUED)
                .and_then(FieldValue::as_date)
                .map(|d| d >= *date)
                .unwrap_or(false),
            RowFilter::ExcludeEntities { names } => row
                .get(fields::ENTITY_NAME)
                .and_then(FieldValue::as_text)
                .map(|name| !names.iter().any(|n| n == name))
                .unwrap_or(false),
            RowFilter::YearEquals { year } => row
                .get(fields::YEAR_ISSUED)
                .and_then(FieldValue::as_int)
                .map(|y| y == i64::from(*year))
                .unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Synchronization modes
// ---------------------------------------------------------------------------

/// How a sync operation moves rows into its target.
///
/// `Replace` invalidates artifacts (relationship classes) built on the
/// target; `TruncateThenAppend` and `CreateOrRefresh` preserve them. The
/// modes are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Delete and recreate the target from the (filtered) source rows.
    Replace,
    /// Target must exist; empty it, then append the source rows.
    TruncateThenAppend,
    /// Create the target on first run, else truncate then append.
    /// The idempotent-replay mode used for downstream replication.
    CreateOrRefresh,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Replace => write!(f, "replace"),
            SyncMode::TruncateThenAppend => write!(f, "truncate_then_append"),
            SyncMode::CreateOrRefresh => write!(f, "create_or_refresh"),
        }
    }
}

/// Schema-compatibility handling for appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Field sets must match exactly.
    Checked,
    /// Append whatever fields are present (cross-store replication).
    Unchecked,
}

// ---------------------------------------------------------------------------
// Relationship classes
// ---------------------------------------------------------------------------

/// A one-to-many relationship artifact built over two datasets on a shared
/// key field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub origin: DatasetRef,
    pub destination: DatasetRef,
    pub name: DatasetName,
    pub origin_key: String,
    pub destination_key: String,
}

// ---------------------------------------------------------------------------
// Store status (report surface)
// ---------------------------------------------------------------------------

/// Connection/status probe result for one store, as recorded in the
/// execution report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub store: String,
    pub connected: bool,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, FieldValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dataset_ref_display_is_store_qualified() {
        let r = DatasetRef::new(Environment::Staging, "WR_PT_Points");
        assert_eq!(r.to_string(), "staging/WR_PT_Points");
    }

    #[rstest::rstest]
    #[case(FieldValue::Null, true)]
    #[case(FieldValue::Text("A".into()), true)]
    #[case(FieldValue::Text("E".into()), true)]
    #[case(FieldValue::Text("X".into()), false)]
    #[case(FieldValue::Int(7), false)]
    fn status_filter_accepts_null_and_configured_codes(
        #[case] status: FieldValue,
        #[case] admitted: bool,
    ) {
        let filter = RowFilter::StatusIn {
            codes: vec![Some("A".into()), Some("E".into()), None],
        };
        assert_eq!(filter.matches(&row(&[("STATUS_CODE", status)])), admitted);
    }

    #[test]
    fn status_filter_treats_absent_field_as_null() {
        let with_null = RowFilter::StatusIn {
            codes: vec![Some("A".into()), None],
        };
        assert!(with_null.matches(&row(&[])));

        let without_null = RowFilter::StatusIn {
            codes: vec![Some("A".into())],
        };
        assert!(!without_null.matches(&row(&[])));
        assert!(!without_null.matches(&row(&[("STATUS_CODE", FieldValue::Null)])));
    }

    #[test]
    fn expiration_filter_is_inclusive() {
        let filter = RowFilter::ExpiresOnOrAfter {
            date: date(2025, 6, 1),
        };
        assert!(filter.matches(&row(&[("EXP_DATE", FieldValue::Date(date(2025, 6, 1)))])));
        assert!(filter.matches(&row(&[("EXP_DATE", FieldValue::Date(date(2026, 1, 1)))])));
        assert!(!filter.matches(&row(&[("EXP_DATE", FieldValue::Date(date(2025, 5, 31)))])));
        assert!(!filter.matches(&row(&[("EXP_DATE", FieldValue::Null)])));
    }

    #[test]
    fn entity_redaction_drops_null_and_listed_names() {
        let filter = RowFilter::ExcludeEntities {
            names: vec!["The Muppets".into()],
        };
        assert!(filter.matches(&row(&[("ENTITY_NAME", FieldValue::Text("Acme Water".into()))])));
        assert!(!filter.matches(&row(&[("ENTITY_NAME", FieldValue::Text("The Muppets".into()))])));
        assert!(!filter.matches(&row(&[("ENTITY_NAME", FieldValue::Null)])));
        assert!(!filter.matches(&row(&[])));
    }

    #[test]
    fn field_value_real_widens_ints() {
        assert_eq!(FieldValue::Int(3).as_real(), Some(3.0));
        assert_eq!(FieldValue::Real(2.5).as_real(), Some(2.5));
        assert_eq!(FieldValue::Text("x".into()).as_real(), None);
    }

    #[test]
    fn row_serde_roundtrip() {
        let r = row(&[
            ("PERMIT_NUMBER", FieldValue::Text("PT-2024-001".into())),
            ("TOTAL_ACRE_FEET", FieldValue::Real(12.5)),
            ("EXP_DATE", FieldValue::Date(date(2026, 3, 1))),
        ]);
        let json = serde_json::to_string(&r).expect("serialize");
        let back: Row = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.get("PERMIT_NUMBER"), r.get("PERMIT_NUMBER"));
        assert_eq!(
            back.get("EXP_DATE").and_then(FieldValue::as_date),
            Some(date(2026, 3, 1))
        );
    }
}
