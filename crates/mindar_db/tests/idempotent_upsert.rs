//! End-to-end checks of the idempotent upsert against a REAL SQLite file.
//!
//! Each test drives the same sequence a loader runs per artifact:
//! check_existing, then write_records only when the artifact is absent.

use mindar_db::{DbError, MindarDb, Presence, RecordRow, Table};
use sqlx::Row;
use tempfile::TempDir;

fn artifact_rows(dataset: &str, n: usize) -> Vec<RecordRow> {
    (1..=n)
        .map(|i| {
            RecordRow::new()
                .with("datasetid", dataset)
                .with("roi", i.to_string())
                .with("roidescription", format!("region {}", i))
                .with("value", i as f64 * 0.5)
                .with("units", "mm")
        })
        .collect()
}

async fn load(db: &MindarDb, dataset: &str, rows: &[RecordRow]) -> mindar_db::Result<bool> {
    match db
        .check_existing(dataset, Table::DerivativesUnormd, rows.len())
        .await?
    {
        Presence::Complete => Ok(false),
        Presence::Absent => {
            db.write_records(Table::DerivativesUnormd, rows).await?;
            Ok(true)
        }
    }
}

async fn snapshot(db: &MindarDb, dataset: &str) -> Vec<(String, f64)> {
    sqlx::query("SELECT roi, value FROM derivatives_unormd WHERE datasetid = ? ORDER BY roi")
        .bind(dataset)
        .fetch_all(db.pool())
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.get::<String, _>("roi"), row.get::<f64, _>("value")))
        .collect()
}

#[tokio::test]
async fn test_repeated_runs_converge_to_one_row_set() {
    let tmp = TempDir::new().unwrap();
    let db = MindarDb::open(tmp.path().join("e2e.db")).await.unwrap();
    let rows = artifact_rows("1001", 5);

    assert!(load(&db, "1001", &rows).await.unwrap());
    let first = snapshot(&db, "1001").await;

    assert!(!load(&db, "1001", &rows).await.unwrap());
    let second = snapshot(&db, "1001").await;

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_interrupted_run_is_cleaned_and_completed() {
    let tmp = TempDir::new().unwrap();
    let db = MindarDb::open(tmp.path().join("e2e.db")).await.unwrap();
    let rows = artifact_rows("1002", 4);

    // Simulate a crash after two of four rows were committed
    db.write_records(Table::DerivativesUnormd, &rows[..2])
        .await
        .unwrap();
    assert_eq!(db.count_rows(Table::DerivativesUnormd, "1002").await.unwrap(), 2);

    assert!(load(&db, "1002", &rows).await.unwrap());
    assert_eq!(db.count_rows(Table::DerivativesUnormd, "1002").await.unwrap(), 4);

    // Ids keep increasing past the deleted rows
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM derivatives_unormd ORDER BY id")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_surplus_rows_halt_without_changes() {
    let tmp = TempDir::new().unwrap();
    let db = MindarDb::open(tmp.path().join("e2e.db")).await.unwrap();
    let rows = artifact_rows("1003", 3);

    db.write_records(Table::DerivativesUnormd, &rows).await.unwrap();
    db.write_records(Table::DerivativesUnormd, &rows[..1])
        .await
        .unwrap();
    let before = snapshot(&db, "1003").await;

    let err = load(&db, "1003", &rows).await.unwrap_err();
    assert!(err.is_data_inconsistency());
    assert!(matches!(err, DbError::DataInconsistency { found: 4, .. }));
    assert_eq!(snapshot(&db, "1003").await, before);
}

#[tokio::test]
async fn test_reopen_keeps_rows() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("e2e.db");

    let db = MindarDb::open(&path).await.unwrap();
    db.write_records(Table::DerivativesUnormd, &artifact_rows("1004", 2))
        .await
        .unwrap();
    db.close().await;

    let db = MindarDb::open_existing(&path).await.unwrap();
    assert_eq!(db.next_id(Table::DerivativesUnormd).await.unwrap(), 3);
}
