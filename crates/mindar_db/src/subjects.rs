//! Subject reference tables: ABIDE phenotypes and image03 entries.

use crate::error::{DbError, Result};
use crate::types::{AbideSubject, AbideSubjectRow, Image03Entry, ImageScan, Table};
use crate::MindarDb;
use sqlx::Row;
use tracing::{debug, info};

impl MindarDb {
    // ========================================================================
    // ABIDE subjects
    // ========================================================================

    /// Look up an ABIDE subject by its numeric subject id.
    ///
    /// Ids compare numerically, so `"0050002"` finds `50002`.
    pub async fn subject_by_sub_id(&self, sub_id: &str) -> Result<AbideSubjectRow> {
        let row = sqlx::query(
            r#"SELECT id, guid, site_id, sub_id, dx_group, dsm_iv_tr, age_at_scan, sex, handedness
               FROM abide_subjects
               WHERE CAST(sub_id AS INTEGER) = CAST(? AS INTEGER)
               ORDER BY id LIMIT 1"#,
        )
        .bind(sub_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("ABIDE subject with sub_id {}", sub_id)))?;

        Ok(AbideSubjectRow {
            id: row.get("id"),
            subject: AbideSubject {
                guid: row.get("guid"),
                site_id: row.get::<Option<String>, _>("site_id").unwrap_or_default(),
                sub_id: row.get("sub_id"),
                dx_group: row.get("dx_group"),
                dsm_iv_tr: row.get("dsm_iv_tr"),
                age_at_scan: row.get("age_at_scan"),
                sex: row.get::<Option<String>, _>("sex").unwrap_or_default(),
                handedness: row.get("handedness"),
            },
        })
    }

    async fn subject_imported(&self, sub_id: &str) -> Result<bool> {
        match self.subject_by_sub_id(sub_id).await {
            Ok(_) => Ok(true),
            Err(DbError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Insert phenotype rows, skipping subjects already present.
    ///
    /// Returns the number of rows inserted.
    pub async fn import_abide_subjects(&self, subjects: &[AbideSubject]) -> Result<usize> {
        let mut next = self.next_id(Table::AbideSubjects).await?;
        let mut inserted = 0;

        for subject in subjects {
            if self.subject_imported(&subject.sub_id).await? {
                debug!(sub_id = %subject.sub_id, "Subject already imported");
                continue;
            }

            sqlx::query(
                r#"INSERT INTO abide_subjects
                   (id, guid, site_id, sub_id, dx_group, dsm_iv_tr, age_at_scan, sex, handedness)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(next)
            .bind(&subject.guid)
            .bind(&subject.site_id)
            .bind(&subject.sub_id)
            .bind(subject.dx_group)
            .bind(subject.dsm_iv_tr)
            .bind(subject.age_at_scan)
            .bind(&subject.sex)
            .bind(&subject.handedness)
            .execute(&self.pool)
            .await?;

            next += 1;
            inserted += 1;
        }

        info!(inserted, total = subjects.len(), "ABIDE subjects imported");
        Ok(inserted)
    }

    // ========================================================================
    // image03
    // ========================================================================

    /// Register an image03 entry (replaces an existing one with the same id).
    pub async fn register_image03(&self, entry: &Image03Entry) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO image03 (image03_id, image_file) VALUES (?, ?)")
            .bind(entry.image03_id)
            .bind(&entry.image_file)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Register the subject key for an image03 id.
    pub async fn register_subject_key(&self, image03_id: i64, subjectkey: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO nitrc_image03 (image03_id, subjectkey) VALUES (?, ?)")
            .bind(image03_id)
            .bind(subjectkey)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Subject key (guid) for an image03 id.
    pub async fn guid_for_image03(&self, image03_id: i64) -> Result<String> {
        sqlx::query_scalar("SELECT subjectkey FROM nitrc_image03 WHERE image03_id = ?")
            .bind(image03_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("subject key for image03 id {}", image03_id)))
    }

    /// image03 entries with `min <= image03_id <= max`, ordered by id.
    pub async fn image03_range(&self, min: i64, max: i64) -> Result<Vec<Image03Entry>> {
        let rows = sqlx::query(
            r#"SELECT image03_id, image_file FROM image03
               WHERE image03_id >= ? AND image03_id <= ?
               ORDER BY image03_id"#,
        )
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Image03Entry {
                image03_id: row.get("image03_id"),
                image_file: row.get("image_file"),
            })
            .collect())
    }

    /// Register an image03 entry together with its subject and scan fields.
    pub async fn register_image_scan(&self, scan: &ImageScan) -> Result<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO image03
               (image03_id, image_file, subjectkey, interview_age, image_description)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(scan.image03_id)
        .bind(&scan.image_file)
        .bind(&scan.subjectkey)
        .bind(scan.interview_age)
        .bind(&scan.image_description)
        .execute(&self.pool)
        .await?;

        self.register_subject_key(scan.image03_id, &scan.subjectkey)
            .await
    }

    /// image03 entries that carry a subject key, ordered by id.
    pub async fn image_scans(&self) -> Result<Vec<ImageScan>> {
        let rows = sqlx::query(
            r#"SELECT image03_id, image_file, subjectkey, interview_age, image_description
               FROM image03
               WHERE subjectkey IS NOT NULL
               ORDER BY image03_id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ImageScan {
                image03_id: row.get("image03_id"),
                subjectkey: row.get("subjectkey"),
                interview_age: row.get("interview_age"),
                image_description: row
                    .get::<Option<String>, _>("image_description")
                    .unwrap_or_default(),
                image_file: row.get("image_file"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn subject(sub_id: &str, guid: &str) -> AbideSubject {
        AbideSubject {
            guid: guid.to_string(),
            site_id: "PITT".to_string(),
            sub_id: sub_id.to_string(),
            dx_group: Some(1),
            dsm_iv_tr: Some(1),
            age_at_scan: Some(24.5),
            sex: "M".to_string(),
            handedness: Some("R".to_string()),
        }
    }

    #[tokio::test]
    async fn test_import_and_lookup_subjects() {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("subjects.db")).await.unwrap();

        let inserted = db
            .import_abide_subjects(&[subject("50002", "NDARAA"), subject("50003", "NDARBB")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        // Re-import is a no-op
        let again = db
            .import_abide_subjects(&[subject("50002", "NDARAA")])
            .await
            .unwrap();
        assert_eq!(again, 0);

        let found = db.subject_by_sub_id("0050003").await.unwrap();
        assert_eq!(found.id, 2);
        assert_eq!(found.subject.guid, "NDARBB");
        assert_eq!(found.subject.age_at_scan, Some(24.5));

        let missing = db.subject_by_sub_id("99999").await.unwrap_err();
        assert!(matches!(missing, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subject_lookup_errors_are_not_absence() {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("mindar.sqlite3")).await.unwrap();
        assert!(!db.subject_imported("50002").await.unwrap());

        sqlx::query("DROP TABLE abide_subjects")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(matches!(
            db.subject_imported("50002").await,
            Err(DbError::Sqlx(_))
        ));
    }

    #[tokio::test]
    async fn test_image03_range_and_guid() {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("subjects.db")).await.unwrap();

        for id in [10, 11, 12, 20] {
            db.register_image03(&Image03Entry {
                image03_id: id,
                image_file: format!("s3://NDAR_Central/submission/{}.zip", id),
            })
            .await
            .unwrap();
        }
        db.register_subject_key(11, "NDAR_INV11").await.unwrap();

        let entries = db.image03_range(11, 19).await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.image03_id).collect();
        assert_eq!(ids, vec![11, 12]);

        assert_eq!(db.guid_for_image03(11).await.unwrap(), "NDAR_INV11");
        assert!(matches!(
            db.guid_for_image03(12).await.unwrap_err(),
            DbError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_image_scans_carry_subject_fields() {
        let tmp = TempDir::new().unwrap();
        let db = MindarDb::open(tmp.path().join("scans.db")).await.unwrap();

        db.register_image03(&Image03Entry {
            image03_id: 5,
            image_file: "s3://NDAR_Central/submission/5.zip".to_string(),
        })
        .await
        .unwrap();
        for (id, kind) in [(21, "MPRAGE"), (20, "EPI")] {
            db.register_image_scan(&ImageScan {
                image03_id: id,
                subjectkey: "NDAR_INV20".to_string(),
                interview_age: Some(130),
                image_description: kind.to_string(),
                image_file: format!("s3://NDAR_Central/submission/{}.zip", id),
            })
            .await
            .unwrap();
        }

        let scans = db.image_scans().await.unwrap();
        let ids: Vec<i64> = scans.iter().map(|s| s.image03_id).collect();
        assert_eq!(ids, vec![20, 21]);
        assert_eq!(scans[0].image_description, "EPI");
        assert_eq!(scans[1].interview_age, Some(130));
        assert_eq!(db.guid_for_image03(21).await.unwrap(), "NDAR_INV20");
        assert_eq!(db.image03_range(1, 30).await.unwrap().len(), 3);
    }
}
