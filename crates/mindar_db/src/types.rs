//! Shared types for the results database.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Tables
// ============================================================================

/// Every table the loader knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Per-ROI derivative values (ACT cortical thickness).
    DerivativesUnormd,
    /// Per-subject derivative images (ACT normalized thickness map).
    ImgDerivativesUnormd,
    /// ABIDE preprocessed, CIVET and Freesurfer results.
    AbideImgResults,
    /// Per-ROI derivative values keyed by reference ids.
    Derivatives,
    /// Per-subject derivative images keyed by reference ids.
    ImgDerivatives,
    Pipelines,
    Measures,
    Rois,
    /// Workflow driver run status.
    ResultsStats,
    AbideSubjects,
    Image03,
    NitrcImage03,
}

const DERIVATIVES_UNORMD_COLUMNS: &[&str] = &[
    "atlasname",
    "atlasversion",
    "roi",
    "roidescription",
    "pipelinename",
    "pipelinetype",
    "cfgfilelocation",
    "pipelinetools",
    "pipelineversion",
    "pipelinedescription",
    "derivativename",
    "measurename",
    "datasetid",
    "timestamp",
    "value",
    "units",
    "guid",
];

const IMG_DERIVATIVES_UNORMD_COLUMNS: &[&str] = &[
    "roi",
    "pipelinename",
    "pipelinetype",
    "cfgfilelocation",
    "pipelinetools",
    "pipelineversion",
    "pipelinedescription",
    "name",
    "measurename",
    "timestamp",
    "s3_path",
    "template",
    "guid",
    "datasetid",
    "roidescription",
];

const ABIDE_IMG_RESULTS_COLUMNS: &[&str] = &[
    "roi",
    "pipelinename",
    "pipelinetype",
    "pipelinetools",
    "pipelineversion",
    "pipelinedescription",
    "name",
    "measurename",
    "timestamp",
    "s3_path",
    "template",
    "guid",
    "datasetid",
    "roidescription",
    "strategy",
    "atlas",
    "value",
    "units",
    "cfgfilelocation",
];

const DERIVATIVES_COLUMNS: &[&str] = &[
    "name",
    "roiid",
    "pipelineid",
    "measureid",
    "datasetid",
    "value",
    "timestamp",
    "units",
    "guid",
];

const IMG_DERIVATIVES_COLUMNS: &[&str] = &[
    "name",
    "roiid",
    "pipelineid",
    "measureid",
    "datasetid",
    "s3_path",
    "timestamp",
    "template",
    "guid",
];

const REFERENCE_COLUMNS: &[&str] = &["name"];

const RESULTS_STATS_COLUMNS: &[&str] = &[
    "img03_id",
    "wf_status",
    "extract_status",
    "log_path",
    "nifti_path",
    "roi_path",
    "timestamp",
];

const ABIDE_SUBJECTS_COLUMNS: &[&str] = &[
    "guid",
    "site_id",
    "sub_id",
    "dx_group",
    "dsm_iv_tr",
    "age_at_scan",
    "sex",
    "handedness",
];

const IMAGE03_COLUMNS: &[&str] = &[
    "image_file",
    "subjectkey",
    "interview_age",
    "image_description",
];
const NITRC_IMAGE03_COLUMNS: &[&str] = &["subjectkey"];

impl Table {
    pub const ALL: [Table; 12] = [
        Table::DerivativesUnormd,
        Table::ImgDerivativesUnormd,
        Table::AbideImgResults,
        Table::Derivatives,
        Table::ImgDerivatives,
        Table::Pipelines,
        Table::Measures,
        Table::Rois,
        Table::ResultsStats,
        Table::AbideSubjects,
        Table::Image03,
        Table::NitrcImage03,
    ];

    /// SQL table name.
    pub fn name(&self) -> &'static str {
        match self {
            Table::DerivativesUnormd => "derivatives_unormd",
            Table::ImgDerivativesUnormd => "img_derivatives_unormd",
            Table::AbideImgResults => "abide_img_results",
            Table::Derivatives => "derivatives",
            Table::ImgDerivatives => "img_derivatives",
            Table::Pipelines => "pipelines",
            Table::Measures => "measures",
            Table::Rois => "rois",
            Table::ResultsStats => "results_stats",
            Table::AbideSubjects => "abide_subjects",
            Table::Image03 => "image03",
            Table::NitrcImage03 => "nitrc_image03",
        }
    }

    /// Integer primary key column.
    pub fn id_column(&self) -> &'static str {
        match self {
            Table::ResultsStats => "rs_id",
            Table::Image03 | Table::NitrcImage03 => "image03_id",
            _ => "id",
        }
    }

    /// Column that ties rows back to the artifact they came from.
    ///
    /// Only the derivative tables take part in the idempotent upsert.
    pub fn artifact_column(&self) -> Option<&'static str> {
        match self {
            Table::DerivativesUnormd
            | Table::ImgDerivativesUnormd
            | Table::Derivatives
            | Table::ImgDerivatives => Some("datasetid"),
            Table::AbideImgResults => Some("s3_path"),
            _ => None,
        }
    }

    /// Writable columns, excluding the primary key.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::DerivativesUnormd => DERIVATIVES_UNORMD_COLUMNS,
            Table::ImgDerivativesUnormd => IMG_DERIVATIVES_UNORMD_COLUMNS,
            Table::AbideImgResults => ABIDE_IMG_RESULTS_COLUMNS,
            Table::Derivatives => DERIVATIVES_COLUMNS,
            Table::ImgDerivatives => IMG_DERIVATIVES_COLUMNS,
            Table::Pipelines | Table::Measures | Table::Rois => REFERENCE_COLUMNS,
            Table::ResultsStats => RESULTS_STATS_COLUMNS,
            Table::AbideSubjects => ABIDE_SUBJECTS_COLUMNS,
            Table::Image03 => IMAGE03_COLUMNS,
            Table::NitrcImage03 => NITRC_IMAGE03_COLUMNS,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Id-keyed counterpart of a descriptive derivative table.
    pub fn normalized(&self) -> Option<Table> {
        match self {
            Table::DerivativesUnormd => Some(Table::Derivatives),
            Table::ImgDerivativesUnormd => Some(Table::ImgDerivatives),
            _ => None,
        }
    }

    /// Tables whose rows reference `pipelines`, `measures` and `rois` by id.
    pub fn is_normalized(&self) -> bool {
        matches!(self, Table::Derivatives | Table::ImgDerivatives)
    }

    /// Name vocabularies referenced by the normalized tables.
    pub fn is_reference(&self) -> bool {
        matches!(self, Table::Pipelines | Table::Measures | Table::Rois)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Table::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| DbError::invalid_state(format!("Unknown table: {}", s)))
    }
}

// ============================================================================
// Rows
// ============================================================================

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            FieldValue::Real(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One row destined for a table, keyed by column name.
///
/// The primary key is never part of the row; the writer assigns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    fields: BTreeMap<String, FieldValue>,
}

impl RecordRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(FieldValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reject columns the table does not have.
    pub fn validate_for(&self, table: Table) -> Result<()> {
        if self.is_empty() {
            return Err(DbError::invalid_state(format!(
                "Empty row for table {}",
                table
            )));
        }
        for column in self.fields.keys() {
            if !table.has_column(column) {
                return Err(DbError::invalid_state(format!(
                    "Table {} has no column '{}'",
                    table, column
                )));
            }
        }
        Ok(())
    }

    /// Drop every column `table` does not have.
    pub fn restricted_to(mut self, table: Table) -> Self {
        self.fields.retain(|column, _| table.has_column(column));
        self
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// Result of an existence check for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// Nothing recorded (any partial rows have been removed).
    Absent,
    /// Exactly the expected number of rows is recorded.
    Complete,
}

// ============================================================================
// Run status
// ============================================================================

pub const STATUS_PASS: &str = "PASS";
pub const STATUS_FAIL: &str = "FAIL";
pub const STATUS_NOT_APPLICABLE: &str = "N/A";

/// A run-status row appended by the workflow driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub img03_id: i64,
    pub wf_status: String,
    pub extract_status: String,
    pub log_path: String,
    pub nifti_path: String,
    pub roi_path: String,
    pub timestamp: String,
}

/// A stored run-status row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow {
    pub rs_id: i64,
    #[serde(flatten)]
    pub record: StatusRecord,
}

// ============================================================================
// Subjects
// ============================================================================

/// ABIDE phenotype row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbideSubject {
    pub guid: String,
    pub site_id: String,
    pub sub_id: String,
    pub dx_group: Option<i64>,
    pub dsm_iv_tr: Option<i64>,
    pub age_at_scan: Option<f64>,
    pub sex: String,
    pub handedness: Option<String>,
}

/// A stored ABIDE subject with its dataset id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbideSubjectRow {
    pub id: i64,
    #[serde(flatten)]
    pub subject: AbideSubject,
}

/// An image03 entry: dataset id and the remote image path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image03Entry {
    pub image03_id: i64,
    pub image_file: String,
}

/// An image03 entry with the subject and scan fields used to group scans
/// into sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageScan {
    pub image03_id: i64,
    pub subjectkey: String,
    /// Age in months at the interview.
    pub interview_age: Option<i64>,
    /// Scan type, e.g. `MPRAGE` or `EPI`.
    pub image_description: String,
    pub image_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_round_trips_through_name() {
        for table in Table::ALL {
            assert_eq!(table.name().parse::<Table>().unwrap(), table);
        }
        assert!("no_such_table".parse::<Table>().is_err());
    }

    #[test]
    fn test_normalized_counterparts() {
        assert_eq!(Table::DerivativesUnormd.normalized(), Some(Table::Derivatives));
        assert_eq!(Table::ImgDerivativesUnormd.normalized(), Some(Table::ImgDerivatives));
        assert_eq!(Table::AbideImgResults.normalized(), None);
        assert!(Table::ImgDerivatives.is_normalized());
        assert!(Table::Rois.is_reference());
        assert_eq!(Table::Rois.artifact_column(), None);
        assert!(Table::Derivatives.has_column("roiid"));
    }

    #[test]
    fn test_row_validation_rejects_unknown_column() {
        let row = RecordRow::new().with("roi", "1").with("bogus", 1.0);
        let err = row.validate_for(Table::DerivativesUnormd).unwrap_err();
        assert!(err.to_string().contains("bogus"));

        let ok = RecordRow::new().with("roi", "1").with("value", 2.5);
        ok.validate_for(Table::DerivativesUnormd).unwrap();
    }

    #[test]
    fn test_restricted_to_keeps_table_columns() {
        let row = RecordRow::new()
            .with("s3_path", "s3://b/k")
            .with("strategy", "filt_global")
            .with("atlasname", "AAL");
        let img = row.clone().restricted_to(Table::ImgDerivativesUnormd);
        assert_eq!(img.len(), 1);
        assert_eq!(img.text("s3_path"), Some("s3://b/k"));

        let abide = row.restricted_to(Table::AbideImgResults);
        assert_eq!(abide.len(), 2);
        assert!(abide.get("atlasname").is_none());
    }

    #[test]
    fn test_optional_values_become_null() {
        let row = RecordRow::new().with("units", None::<String>);
        assert_eq!(row.get("units"), Some(&FieldValue::Null));
    }
}
