//! Database schema creation for all mindar tables.
//!
//! All CREATE TABLE statements live here - single source of truth.
//! Primary keys are plain INTEGER columns; values come from
//! [`MindarDb::next_id`](crate::MindarDb::next_id), not from SQLite.

use crate::error::Result;
use crate::MindarDb;
use tracing::info;

impl MindarDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        self.create_derivative_tables().await?;
        self.create_normalized_tables().await?;
        self.create_status_tables().await?;
        self.create_subject_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Derivative tables written by the loader.
    async fn create_derivative_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS derivatives_unormd (
                id INTEGER PRIMARY KEY,
                atlasname TEXT,
                atlasversion TEXT,
                roi TEXT,
                roidescription TEXT,
                pipelinename TEXT,
                pipelinetype TEXT,
                cfgfilelocation TEXT,
                pipelinetools TEXT,
                pipelineversion TEXT,
                pipelinedescription TEXT,
                derivativename TEXT,
                measurename TEXT,
                datasetid TEXT,
                timestamp TEXT,
                value REAL,
                units TEXT,
                guid TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS img_derivatives_unormd (
                id INTEGER PRIMARY KEY,
                roi TEXT,
                pipelinename TEXT,
                pipelinetype TEXT,
                cfgfilelocation TEXT,
                pipelinetools TEXT,
                pipelineversion TEXT,
                pipelinedescription TEXT,
                name TEXT,
                measurename TEXT,
                timestamp TEXT,
                s3_path TEXT,
                template TEXT,
                guid TEXT,
                datasetid TEXT,
                roidescription TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS abide_img_results (
                id INTEGER PRIMARY KEY,
                roi TEXT,
                pipelinename TEXT,
                pipelinetype TEXT,
                pipelinetools TEXT,
                pipelineversion TEXT,
                pipelinedescription TEXT,
                name TEXT,
                measurename TEXT,
                timestamp TEXT,
                s3_path TEXT,
                template TEXT,
                guid TEXT,
                datasetid TEXT,
                roidescription TEXT,
                strategy TEXT,
                atlas TEXT,
                value REAL,
                units TEXT,
                cfgfilelocation TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_derivatives_dataset ON derivatives_unormd(datasetid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_img_derivatives_dataset ON img_derivatives_unormd(datasetid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_abide_results_path ON abide_img_results(s3_path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Id-keyed derivative tables and the vocabularies they reference.
    async fn create_normalized_tables(&self) -> Result<()> {
        for table in ["pipelines", "measures", "rois"] {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
                table
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS derivatives (
                id INTEGER PRIMARY KEY,
                name TEXT,
                roiid INTEGER REFERENCES rois(id),
                pipelineid INTEGER REFERENCES pipelines(id),
                measureid INTEGER REFERENCES measures(id),
                datasetid TEXT,
                value REAL,
                timestamp TEXT,
                units TEXT,
                guid TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS img_derivatives (
                id INTEGER PRIMARY KEY,
                name TEXT,
                roiid INTEGER REFERENCES rois(id),
                pipelineid INTEGER REFERENCES pipelines(id),
                measureid INTEGER REFERENCES measures(id),
                datasetid TEXT,
                s3_path TEXT,
                timestamp TEXT,
                template TEXT,
                guid TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_normd_dataset ON derivatives(datasetid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_img_normd_dataset ON img_derivatives(datasetid)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Workflow driver run status.
    async fn create_status_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS results_stats (
                rs_id INTEGER PRIMARY KEY,
                img03_id INTEGER NOT NULL,
                wf_status TEXT NOT NULL,
                extract_status TEXT NOT NULL,
                log_path TEXT,
                nifti_path TEXT,
                roi_path TEXT,
                timestamp TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_stats_img03 ON results_stats(img03_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Subject reference tables.
    async fn create_subject_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS abide_subjects (
                id INTEGER PRIMARY KEY,
                guid TEXT NOT NULL,
                site_id TEXT,
                sub_id TEXT NOT NULL,
                dx_group INTEGER,
                dsm_iv_tr INTEGER,
                age_at_scan REAL,
                sex TEXT,
                handedness TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS image03 (
                image03_id INTEGER PRIMARY KEY,
                image_file TEXT NOT NULL,
                subjectkey TEXT,
                interview_age INTEGER,
                image_description TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS nitrc_image03 (
                image03_id INTEGER PRIMARY KEY,
                subjectkey TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
