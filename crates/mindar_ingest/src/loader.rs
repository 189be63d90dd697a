//! Generic artifact loader: locate → parse → check → write.
//!
//! One loader serves every pipeline in the catalog. For each artifact it
//! builds the complete row set first, so the expected row count handed to
//! the existence check is exactly what a successful insert would write.

use crate::catalog::Catalog;
use crate::error::{IngestError, Result};
use crate::locator::{locate, LocatedArtifact};
use crate::parser::{parse_freesurfer_stats, parse_metrics, FormatError};
use crate::roi_map::RoiMap;
use crate::rows::{RowBuilder, SubjectRef};
use crate::subject_id::find_subid;
use mindar_db::{MindarDb, Presence, RecordRow, Table};
use mindar_storage::ObjectStore;
use serde::Serialize;
use tracing::{debug, info};

/// One externally produced result to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub pipeline: String,
    /// Object key, used for classification and content download.
    pub key: String,
    /// Stored in `s3_path` columns.
    pub url: String,
}

impl ArtifactRef {
    pub fn new(pipeline: impl Into<String>, key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            key: key.into(),
            url: url.into(),
        }
    }
}

/// What happened to one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Inserted { table: Table, rows: usize },
    /// The expected rows were already present; nothing written.
    AlreadyLoaded { table: Table, rows: usize },
    /// No catalog rule matches the key.
    Skipped,
}

pub struct ArtifactLoader<'a> {
    db: &'a MindarDb,
    store: &'a dyn ObjectStore,
    catalog: &'a Catalog,
    roi_map: Option<&'a RoiMap>,
}

impl<'a> ArtifactLoader<'a> {
    pub fn new(db: &'a MindarDb, store: &'a dyn ObjectStore, catalog: &'a Catalog) -> Self {
        Self {
            db,
            store,
            catalog,
            roi_map: None,
        }
    }

    /// Describe ROI labels with `roi_map`.
    pub fn with_roi_map(mut self, roi_map: &'a RoiMap) -> Self {
        self.roi_map = Some(roi_map);
        self
    }

    /// Subject for an ABIDE-style key, via the id embedded in its file name.
    pub async fn resolve_abide_subject(&self, key: &str) -> Result<SubjectRef> {
        let sub_id = find_subid(key)?;
        let row = self.db.subject_by_sub_id(&sub_id).await?;
        Ok(SubjectRef::new(row.id.to_string(), row.subject.guid))
    }

    /// Load an artifact, downloading its content when the matching rule
    /// parses it.
    pub async fn load(&self, artifact: &ArtifactRef, subject: &SubjectRef) -> Result<LoadOutcome> {
        self.load_content(artifact, subject, None).await
    }

    /// Load an artifact whose content is already at hand (`None` fetches it
    /// from the store when needed).
    pub async fn load_content(
        &self,
        artifact: &ArtifactRef,
        subject: &SubjectRef,
        content: Option<String>,
    ) -> Result<LoadOutcome> {
        let spec = self.catalog.get(&artifact.pipeline)?;
        let Some(located) = locate(spec, &artifact.key)? else {
            debug!(pipeline = %spec.name, key = %artifact.key, "No rule matches, skipping");
            return Ok(LoadOutcome::Skipped);
        };

        let content = match content {
            Some(text) => Some(text),
            None if located.rule.reads_content() => Some(self.store.get_text(&artifact.key).await?),
            None => None,
        };

        let rows = self.build_rows(&located, subject, &artifact.url, content.as_deref())?;
        let table = located.table;
        let artifact_id = artifact_id(&rows, table)?;

        let mut written = self.upsert(table, &artifact_id, &rows).await?;
        if spec.normalized {
            let (normalized, normalized_rows) = self.db.normalize_rows(table, &rows).await?;
            written |= self
                .upsert(normalized, &artifact_id, &normalized_rows)
                .await?;
        }

        let rows = rows.len();
        Ok(if written {
            LoadOutcome::Inserted { table, rows }
        } else {
            LoadOutcome::AlreadyLoaded { table, rows }
        })
    }

    /// Write `rows` unless the artifact's full row set is already present.
    ///
    /// Returns whether anything was written.
    async fn upsert(&self, table: Table, artifact_id: &str, rows: &[RecordRow]) -> Result<bool> {
        match self.db.check_existing(artifact_id, table, rows.len()).await? {
            Presence::Complete => {
                info!(table = %table, artifact = %artifact_id, rows = rows.len(), "Already loaded");
                Ok(false)
            }
            Presence::Absent => {
                self.db.write_records(table, rows).await?;
                info!(table = %table, artifact = %artifact_id, rows = rows.len(), "Inserted");
                Ok(true)
            }
        }
    }

    fn build_rows(
        &self,
        located: &LocatedArtifact<'_>,
        subject: &SubjectRef,
        url: &str,
        content: Option<&str>,
    ) -> Result<Vec<RecordRow>> {
        let timestamp = MindarDb::timestamp_now();
        let builder = RowBuilder::new(located, subject, url, &timestamp);
        let rule = located.rule;

        let rows = match (content, &rule.layout) {
            (Some(text), Some(layout)) => {
                let metrics = parse_metrics(text, layout)?;
                builder.metrics(&metrics.into_vec(), self.roi_map)
            }
            (Some(text), None) if rule.stats_table => builder.stats(&parse_freesurfer_stats(text)?),
            (None, _) if rule.reads_content() => {
                return Err(IngestError::NotFound(format!(
                    "content of {}",
                    located.key
                )))
            }
            _ => builder.single(),
        };

        if rows.is_empty() {
            return Err(FormatError::Empty.into());
        }
        Ok(rows)
    }
}

/// Value of the table's artifact column, shared by every row.
fn artifact_id(rows: &[RecordRow], table: Table) -> Result<String> {
    let column = table
        .artifact_column()
        .ok_or_else(|| IngestError::catalog(format!("{} has no artifact column", table)))?;
    rows.first()
        .and_then(|row| row.text(column))
        .map(str::to_string)
        .ok_or_else(|| IngestError::catalog(format!("rows for {} lack {}", table, column)))
}
