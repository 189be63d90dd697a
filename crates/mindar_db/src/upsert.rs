//! Idempotent upsert: existence check, key allocation and the row writer.
//!
//! The three pieces are used together, once per artifact:
//!
//! 1. [`MindarDb::check_existing`] counts rows already recorded for the
//!    artifact, deleting a partial set left by an interrupted run.
//! 2. [`MindarDb::next_id`] derives the next primary key from `MAX(id)`.
//! 3. [`MindarDb::write_records`] inserts one row per metric, committing each
//!    row on its own.
//!
//! # Concurrency
//!
//! None of this is transactionally isolated. Two processes writing the same
//! table can allocate the same id, and two processes loading the same
//! artifact can race on its row count. Callers must partition work so that
//! exactly one process writes a given artifact at a time. A database-native
//! sequence would remove the id race; `MAX(id) + 1` is kept because the
//! tables are shared with loaders that allocate ids the same way.

use crate::error::{DbError, Result};
use crate::types::{FieldValue, Presence, RecordRow, Table};
use crate::MindarDb;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

impl MindarDb {
    // ========================================================================
    // Existence check
    // ========================================================================

    /// Classify what is already recorded for `artifact` in `table`.
    ///
    /// - no rows: [`Presence::Absent`]
    /// - fewer than `expected`: the partial rows are deleted, then [`Presence::Absent`]
    /// - exactly `expected`: [`Presence::Complete`]
    /// - more than `expected`: [`DbError::DataInconsistency`], nothing is touched
    pub async fn check_existing(
        &self,
        artifact: &str,
        table: Table,
        expected: usize,
    ) -> Result<Presence> {
        let found = self.count_rows(table, artifact).await?;

        if found == 0 {
            debug!(table = %table, artifact, "No existing rows");
            return Ok(Presence::Absent);
        }

        match found.cmp(&expected) {
            Ordering::Less => {
                let deleted = self.delete_artifact(table, artifact).await?;
                warn!(
                    table = %table,
                    artifact,
                    found,
                    expected,
                    deleted,
                    "Removed partial rows from an interrupted run"
                );
                Ok(Presence::Absent)
            }
            Ordering::Equal => {
                debug!(table = %table, artifact, found, "Artifact already recorded");
                Ok(Presence::Complete)
            }
            Ordering::Greater => Err(DbError::DataInconsistency {
                table: table.name().to_string(),
                artifact: artifact.to_string(),
                expected,
                found,
            }),
        }
    }

    /// Number of rows recorded for `artifact` in `table`.
    pub async fn count_rows(&self, table: Table, artifact: &str) -> Result<usize> {
        let column = artifact_column(table)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            table.name(),
            column
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(artifact)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn delete_artifact(&self, table: Table, artifact: &str) -> Result<u64> {
        let column = artifact_column(table)?;
        let sql = format!("DELETE FROM {} WHERE {} = ?", table.name(), column);
        let result = sqlx::query(&sql)
            .bind(artifact)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Key allocation
    // ========================================================================

    /// Next primary key for `table`: `MAX(id) + 1`, or 1 when empty.
    ///
    /// Single-writer only; see the module docs.
    pub async fn next_id(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT MAX({}) FROM {}", table.id_column(), table.name());
        let max: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(max.map_or(1, |id| id + 1))
    }

    // ========================================================================
    // Writer
    // ========================================================================

    /// Insert `rows` into `table`, returning the ids assigned.
    ///
    /// One id is allocated for the batch and incremented in memory for each
    /// further row. Every insert commits on its own, so a failure part way
    /// leaves a partial set for the next [`check_existing`](Self::check_existing)
    /// to clean up.
    pub async fn write_records(&self, table: Table, rows: &[RecordRow]) -> Result<Vec<i64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        for row in rows {
            row.validate_for(table)?;
        }

        let mut next = self.next_id(table).await?;
        let mut ids = Vec::with_capacity(rows.len());

        for row in rows {
            let columns: Vec<&str> = row.iter().map(|(column, _)| column).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}, {}) VALUES (?, {})",
                table.name(),
                table.id_column(),
                columns.join(", "),
                placeholders
            );

            let mut query = sqlx::query(&sql).bind(next);
            for (_, value) in row.iter() {
                query = bind_value(query, value);
            }
            query.execute(&self.pool).await?;

            ids.push(next);
            next += 1;
        }

        info!(table = %table, rows = ids.len(), first_id = ids[0], "Rows inserted");
        Ok(ids)
    }
}

fn artifact_column(table: Table) -> Result<&'static str> {
    table.artifact_column().ok_or_else(|| {
        DbError::invalid_state(format!("Table {} is not keyed by artifact", table))
    })
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &FieldValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Integer(v) => query.bind(*v),
        FieldValue::Real(v) => query.bind(*v),
        FieldValue::Text(s) => query.bind(s.clone()),
    }
}
