//! Run-status table written by the workflow driver.
//!
//! `results_stats` is append-only: every terminal run outcome adds one row,
//! and a subject counts as done once any of its rows reads `PASS`.

use crate::error::Result;
use crate::types::{StatusRecord, StatusRow, Table, STATUS_PASS};
use crate::MindarDb;
use sqlx::Row;
use tracing::info;

impl MindarDb {
    /// True when `img03_id` already has a `PASS` status row.
    pub async fn has_passed(&self, img03_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM results_stats WHERE img03_id = ? AND wf_status = ?",
        )
        .bind(img03_id)
        .bind(STATUS_PASS)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Append one status row, returning its `rs_id`.
    pub async fn append_status(&self, record: &StatusRecord) -> Result<i64> {
        let rs_id = self.next_id(Table::ResultsStats).await?;

        sqlx::query(
            r#"INSERT INTO results_stats
               (rs_id, img03_id, wf_status, extract_status, log_path, nifti_path, roi_path, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rs_id)
        .bind(record.img03_id)
        .bind(&record.wf_status)
        .bind(&record.extract_status)
        .bind(&record.log_path)
        .bind(&record.nifti_path)
        .bind(&record.roi_path)
        .bind(&record.timestamp)
        .execute(&self.pool)
        .await?;

        info!(
            rs_id,
            img03_id = record.img03_id,
            wf_status = %record.wf_status,
            extract_status = %record.extract_status,
            "Run status recorded"
        );
        Ok(rs_id)
    }

    /// Status rows, newest first, optionally for one subject.
    pub async fn list_status(&self, img03_id: Option<i64>, limit: usize) -> Result<Vec<StatusRow>> {
        let rows = match img03_id {
            Some(id) => {
                sqlx::query(
                    r#"SELECT rs_id, img03_id, wf_status, extract_status, log_path,
                              nifti_path, roi_path, timestamp
                       FROM results_stats WHERE img03_id = ?
                       ORDER BY rs_id DESC LIMIT ?"#,
                )
                .bind(id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"SELECT rs_id, img03_id, wf_status, extract_status, log_path,
                              nifti_path, roi_path, timestamp
                       FROM results_stats ORDER BY rs_id DESC LIMIT ?"#,
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| StatusRow {
                rs_id: row.get("rs_id"),
                record: StatusRecord {
                    img03_id: row.get("img03_id"),
                    wf_status: row.get("wf_status"),
                    extract_status: row.get("extract_status"),
                    log_path: row.get::<Option<String>, _>("log_path").unwrap_or_default(),
                    nifti_path: row.get::<Option<String>, _>("nifti_path").unwrap_or_default(),
                    roi_path: row.get::<Option<String>, _>("roi_path").unwrap_or_default(),
                    timestamp: row.get("timestamp"),
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{STATUS_FAIL, STATUS_NOT_APPLICABLE};
    use tempfile::TempDir;

    fn record(img03_id: i64, wf_status: &str, extract_status: &str) -> StatusRecord {
        StatusRecord {
            img03_id,
            wf_status: wf_status.to_string(),
            extract_status: extract_status.to_string(),
            log_path: "s3://bucket/logs/x.log".to_string(),
            nifti_path: STATUS_NOT_APPLICABLE.to_string(),
            roi_path: STATUS_NOT_APPLICABLE.to_string(),
            timestamp: MindarDb::timestamp_now(),
        }
    }

    #[tokio::test]
    async fn test_has_passed_only_for_pass_rows() {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("status.db")).await.unwrap();

        assert!(!db.has_passed(5).await.unwrap());

        db.append_status(&record(5, STATUS_NOT_APPLICABLE, STATUS_FAIL))
            .await
            .unwrap();
        assert!(!db.has_passed(5).await.unwrap());

        db.append_status(&record(5, STATUS_PASS, STATUS_PASS)).await.unwrap();
        assert!(db.has_passed(5).await.unwrap());
        assert!(!db.has_passed(6).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_and_list_status() {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("status.db")).await.unwrap();

        let first = db.append_status(&record(1, STATUS_PASS, STATUS_PASS)).await.unwrap();
        let second = db
            .append_status(&record(2, STATUS_NOT_APPLICABLE, STATUS_FAIL))
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let all = db.list_status(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].rs_id, 2);
        assert_eq!(all[0].record.extract_status, STATUS_FAIL);

        let one = db.list_status(Some(1), 10).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].record.wf_status, STATUS_PASS);
    }
}
