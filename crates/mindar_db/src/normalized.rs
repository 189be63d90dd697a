//! Normalized derivative tables.
//!
//! `derivatives` and `img_derivatives` hold the same results as their
//! `*_unormd` counterparts, with the pipeline, measure and ROI names replaced
//! by ids into the `pipelines`, `measures` and `rois` vocabularies. Names are
//! registered on first use.

use crate::error::{DbError, Result};
use crate::types::{RecordRow, Table};
use crate::MindarDb;
use std::collections::HashMap;
use tracing::debug;

/// Columns copied unchanged from a descriptive row.
const SHARED_COLUMNS: &[&str] = &["datasetid", "timestamp", "guid"];

impl MindarDb {
    /// Id of `name` in a reference table, registering it when new.
    pub async fn reference_id(&self, table: Table, name: &str) -> Result<i64> {
        if !table.is_reference() {
            return Err(DbError::invalid_state(format!(
                "Table {} is not a name vocabulary",
                table
            )));
        }

        let select = format!("SELECT id FROM {} WHERE name = ?", table.name());
        let existing: Option<i64> = sqlx::query_scalar(&select)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = self.next_id(table).await?;
        let insert = format!("INSERT INTO {} (id, name) VALUES (?, ?)", table.name());
        sqlx::query(&insert)
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        debug!(table = %table, name, id, "Registered name");
        Ok(id)
    }

    /// Rewrite rows of a descriptive derivative table for its normalized
    /// counterpart.
    ///
    /// Returns the normalized table and one row per input row.
    pub async fn normalize_rows(
        &self,
        table: Table,
        rows: &[RecordRow],
    ) -> Result<(Table, Vec<RecordRow>)> {
        let target = table.normalized().ok_or_else(|| {
            DbError::invalid_state(format!("Table {} has no normalized form", table))
        })?;

        let mut ids: HashMap<(Table, String), i64> = HashMap::new();
        let mut out = Vec::with_capacity(rows.len());

        for row in rows {
            let name = row
                .text("derivativename")
                .or_else(|| row.text("name"))
                .ok_or_else(|| missing(table, "derivative name"))?;

            let mut normalized = RecordRow::new().with("name", name);
            for (column, vocabulary, source) in [
                ("roiid", Table::Rois, "roi"),
                ("pipelineid", Table::Pipelines, "pipelinename"),
                ("measureid", Table::Measures, "measurename"),
            ] {
                let value = row.text(source).ok_or_else(|| missing(table, source))?;
                let key = (vocabulary, value.to_string());
                let id = match ids.get(&key) {
                    Some(id) => *id,
                    None => {
                        let id = self.reference_id(vocabulary, value).await?;
                        ids.insert(key, id);
                        id
                    }
                };
                normalized.set(column, id);
            }

            for column in SHARED_COLUMNS
                .iter()
                .chain(target.columns().iter())
                .filter(|c| !normalized_only(c))
            {
                if let Some(value) = row.get(column) {
                    normalized.set(*column, value.clone());
                }
            }
            out.push(normalized.restricted_to(target));
        }

        Ok((target, out))
    }
}

fn normalized_only(column: &str) -> bool {
    matches!(column, "name" | "roiid" | "pipelineid" | "measureid")
}

fn missing(table: Table, what: &str) -> DbError {
    DbError::invalid_state(format!("{} row has no {}", table, what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, MindarDb) {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("normd.db")).await.unwrap();
        (tmp, db)
    }

    fn roi_row(roi: &str, value: f64) -> RecordRow {
        RecordRow::new()
            .with("atlasname", "OASIS")
            .with("roi", roi)
            .with("roidescription", "somewhere")
            .with("pipelinename", "ndar_act_workflow.py")
            .with("derivativename", "cortical thickness")
            .with("measurename", "mean")
            .with("datasetid", "11")
            .with("timestamp", "2026-01-01 00:00:00")
            .with("value", value)
            .with("units", "mm")
            .with("guid", "NDAR_INV11")
    }

    #[tokio::test]
    async fn test_reference_ids_are_stable() {
        let (_tmp, db) = setup().await;
        let mean = db.reference_id(Table::Measures, "mean").await.unwrap();
        let image = db.reference_id(Table::Measures, "image").await.unwrap();
        assert_eq!((mean, image), (1, 2));
        assert_eq!(db.reference_id(Table::Measures, "mean").await.unwrap(), 1);

        let err = db.reference_id(Table::Derivatives, "mean").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_normalize_roi_rows() {
        let (_tmp, db) = setup().await;
        let rows = vec![roi_row("1002", 2.5), roi_row("1003", 3.5), roi_row("1002", 2.0)];

        let (table, normalized) = db
            .normalize_rows(Table::DerivativesUnormd, &rows)
            .await
            .unwrap();
        assert_eq!(table, Table::Derivatives);
        assert_eq!(normalized.len(), 3);

        let first = &normalized[0];
        assert_eq!(first.text("name"), Some("cortical thickness"));
        assert_eq!(first.get("roiid"), Some(&FieldValue::Integer(1)));
        assert_eq!(normalized[1].get("roiid"), Some(&FieldValue::Integer(2)));
        assert_eq!(normalized[2].get("roiid"), Some(&FieldValue::Integer(1)));
        assert_eq!(first.get("pipelineid"), Some(&FieldValue::Integer(1)));
        assert_eq!(first.get("value"), Some(&FieldValue::Real(2.5)));
        assert_eq!(first.text("units"), Some("mm"));
        assert_eq!(first.text("guid"), Some("NDAR_INV11"));
        assert!(first.get("atlasname").is_none());

        db.write_records(table, &normalized).await.unwrap();
        assert_eq!(db.count_rows(Table::Derivatives, "11").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_normalize_image_row() {
        let (_tmp, db) = setup().await;
        let row = RecordRow::new()
            .with("roi", "Grey matter")
            .with("pipelinename", "ndar_act_workflow.py")
            .with("name", "Normalized cortical thickness image")
            .with("measurename", "image")
            .with("s3_path", "s3://ndar-data/outputs/11/11_corticalthickness_normd.nii.gz")
            .with("template", "OASIS-30_Atropos Template")
            .with("datasetid", "11")
            .with("guid", "NDAR_INV11");

        let (table, normalized) = db
            .normalize_rows(Table::ImgDerivativesUnormd, &[row])
            .await
            .unwrap();
        assert_eq!(table, Table::ImgDerivatives);
        assert_eq!(normalized[0].text("template"), Some("OASIS-30_Atropos Template"));
        assert!(normalized[0].text("s3_path").unwrap().ends_with(".nii.gz"));
    }

    #[tokio::test]
    async fn test_rows_without_names_are_rejected() {
        let (_tmp, db) = setup().await;
        let row = roi_row("4", 1.0).restricted_to(Table::ImgDerivativesUnormd);

        assert!(db.normalize_rows(Table::AbideImgResults, &[]).await.is_err());
        let err = db
            .normalize_rows(Table::DerivativesUnormd, &[row])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("derivative name"));
    }
}
