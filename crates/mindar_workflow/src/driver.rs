//! Per-subject workflow driver.
//!
//! ```text
//! process_subject(job)
//!     ├── status table has PASS?  → Pass (skipped, nothing recorded)
//!     ├── unpack tool             → input missing?   → ExtractFail
//!     ├── pipeline tool           → failed/no output → PipelineFail (+ crash upload)
//!     ├── upload outputs, load rows through the catalog loader
//!     │                           → any error        → PersistFail
//!     └── Pass
//! ```
//!
//! Every outcome except the short-circuit uploads the run log and appends
//! exactly one row to `results_stats`.

use crate::error::{Result, WorkflowError};
use crate::layout::{crash_prefix, log_key, roi_stats_key, thickness_image_key, WorkLayout};
use crate::tool::{ToolCommand, ToolError, ToolRunner, ToolVars};
use chrono::Local;
use mindar_db::{MindarDb, StatusRecord, STATUS_FAIL, STATUS_NOT_APPLICABLE, STATUS_PASS};
use mindar_ingest::{ArtifactLoader, ArtifactRef, Catalog, LoadOutcome, RoiMap, SubjectRef};
use mindar_logging::RunLog;
use mindar_storage::{AwsCredentials, ObjectLocation, ObjectStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Status recorded when outputs exist but could not be persisted.
pub const STATUS_PERSIST_ERROR: &str = "Error inserting results into database";

/// Remote timestamp format for log and crash keys.
const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Bucket source images are read from.
pub const DEFAULT_SOURCE_BUCKET: &str = "NDAR_Central";

/// Everything the driver needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub work_root: PathBuf,
    /// Replaces the bucket of every source path before unpacking.
    pub source_bucket: String,
    pub unpack: ToolCommand,
    pub pipeline: ToolCommand,
    /// Catalog entry used to load the pipeline outputs.
    pub catalog_pipeline: String,
    /// Passed to the unpack tool through `{access_key_id}`/`{secret_access_key}`.
    pub credentials: Option<AwsCredentials>,
}

/// One subject to process: image03 id and the remote source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i64, String)")]
pub struct SubjectJob {
    pub image03_id: i64,
    pub source: String,
}

impl From<(i64, String)> for SubjectJob {
    fn from((image03_id, source): (i64, String)) -> Self {
        Self { image03_id, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pass,
    ExtractFail,
    PipelineFail,
    PersistFail,
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Pass => "PASS",
            Outcome::ExtractFail => "EXTRACT_FAIL",
            Outcome::PipelineFail => "PIPELINE_FAIL",
            Outcome::PersistFail => "PERSIST_FAIL",
        };
        f.write_str(s)
    }
}

/// Result of one `process_subject` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub image03_id: i64,
    pub outcome: Outcome,
    /// A previous run already passed; nothing was done or recorded.
    pub skipped: bool,
    pub status_id: Option<i64>,
    pub log_url: Option<String>,
}

/// Paths recorded in the status row.
struct StatusPaths {
    nifti: String,
    roi: String,
}

impl StatusPaths {
    fn not_applicable() -> Self {
        Self {
            nifti: STATUS_NOT_APPLICABLE.to_string(),
            roi: STATUS_NOT_APPLICABLE.to_string(),
        }
    }
}

pub struct WorkflowDriver<'a> {
    db: &'a MindarDb,
    store: &'a dyn ObjectStore,
    catalog: &'a Catalog,
    runner: &'a dyn ToolRunner,
    roi_map: Option<&'a RoiMap>,
    config: &'a WorkflowConfig,
    layout: WorkLayout,
}

impl<'a> WorkflowDriver<'a> {
    pub fn new(
        db: &'a MindarDb,
        store: &'a dyn ObjectStore,
        catalog: &'a Catalog,
        runner: &'a dyn ToolRunner,
        config: &'a WorkflowConfig,
    ) -> Self {
        Self {
            db,
            store,
            catalog,
            runner,
            roi_map: None,
            config,
            layout: WorkLayout::new(&config.work_root),
        }
    }

    pub fn with_roi_map(mut self, roi_map: &'a RoiMap) -> Self {
        self.roi_map = Some(roi_map);
        self
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    /// Run the whole workflow for one subject.
    ///
    /// Tool failures become outcomes; only database/storage failures while
    /// recording the outcome, and data inconsistencies, are errors.
    pub async fn process_subject(&self, job: &SubjectJob) -> Result<RunReport> {
        let id = job.image03_id;

        if self.db.has_passed(id).await? {
            info!(image03_id = id, "Already passed, skipping");
            return Ok(RunReport {
                image03_id: id,
                outcome: Outcome::Pass,
                skipped: true,
                status_id: None,
                log_url: None,
            });
        }

        self.layout.prepare(id).await?;
        let mut log = RunLog::create(self.layout.log_file(id))?;
        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        log.info(format!("Processing image03 id {} from {}", id, job.source));

        let vars = self.tool_vars(job);

        // ====================================================================
        // Extract
        // ====================================================================
        let input = self.layout.input_file(id);
        if input.exists() {
            log.info(format!("Input already extracted: {}", input.display()));
        } else {
            self.run_tool("unpack", &self.config.unpack, &vars, &mut log).await;
        }
        if !input.exists() {
            log.error(format!("Unpack produced no input image at {}", input.display()));
            return self
                .finish(
                    id,
                    &stamp,
                    log,
                    Outcome::ExtractFail,
                    STATUS_NOT_APPLICABLE,
                    STATUS_FAIL,
                    StatusPaths::not_applicable(),
                )
                .await;
        }

        // ====================================================================
        // Pipeline
        // ====================================================================
        let image = self.layout.thickness_image(id);
        let stats = self.layout.roi_stats(id);
        let mut pipeline_ok = true;
        if image.exists() && stats.exists() {
            log.info("Pipeline outputs already present");
        } else {
            pipeline_ok = self
                .run_tool("pipeline", &self.config.pipeline, &vars, &mut log)
                .await;
        }
        if !pipeline_ok || !image.exists() || !stats.exists() {
            log.error("Pipeline did not produce its outputs");
            let crash_uri = self.upload_crashes(id, &stamp, &mut log).await;
            return self
                .finish(
                    id,
                    &stamp,
                    log,
                    Outcome::PipelineFail,
                    &crash_uri,
                    STATUS_PASS,
                    StatusPaths::not_applicable(),
                )
                .await;
        }

        // ====================================================================
        // Persist
        // ====================================================================
        let mut paths = StatusPaths::not_applicable();
        match self.persist(id, &mut log, &mut paths).await {
            Ok(()) => {
                self.finish(id, &stamp, log, Outcome::Pass, STATUS_PASS, STATUS_PASS, paths)
                    .await
            }
            Err(err) => {
                log.error(format!("Persisting results failed: {}", err));
                let report = self
                    .finish(
                        id,
                        &stamp,
                        log,
                        Outcome::PersistFail,
                        STATUS_PERSIST_ERROR,
                        STATUS_PASS,
                        paths,
                    )
                    .await?;
                if err.is_fatal() {
                    return Err(err);
                }
                Ok(report)
            }
        }
    }

    fn tool_vars(&self, job: &SubjectJob) -> ToolVars {
        let id = job.image03_id;
        let (access_key_id, secret_access_key) = self
            .config
            .credentials
            .as_ref()
            .map(|c| (c.access_key_id.clone(), c.secret_access_key.clone()))
            .unwrap_or_default();

        ToolVars {
            access_key_id,
            secret_access_key,
            source: self.source_path(&job.source),
            input: self.layout.input_file(id).display().to_string(),
            work_dir: self.layout.work_dir(id).display().to_string(),
            output_dir: self.layout.output_dir(id).display().to_string(),
            crash_dir: self.layout.crash_dir(id).display().to_string(),
        }
    }

    /// Source path with its bucket replaced by the configured source bucket.
    fn source_path(&self, source: &str) -> String {
        match ObjectLocation::parse(source) {
            Ok(location) => location
                .with_bucket(self.config.source_bucket.as_str())
                .to_string(),
            Err(_) => source.to_string(),
        }
    }

    /// Run one tool, mirroring its output into the run log. True on success.
    async fn run_tool(
        &self,
        label: &str,
        command: &ToolCommand,
        vars: &ToolVars,
        log: &mut RunLog,
    ) -> bool {
        let invocation = command.invocation(vars);
        log.info(format!("Running {}: {}", label, invocation.display()));

        match self.runner.run(&invocation).await {
            Ok(output) => {
                log.output(label, &output.stdout);
                log.output(label, &output.stderr);
                log.info(format!("{} finished in {} ms", label, output.duration_ms));
                true
            }
            Err(err) => {
                if let ToolError::Failed { stdout, stderr, .. } = &err {
                    log.output(label, stdout);
                    log.output(label, stderr);
                }
                log.error(err.to_string());
                false
            }
        }
    }

    /// Upload every file the pipeline left in its crash directory.
    ///
    /// Returns the URI of the crash prefix, recorded as the run's status.
    async fn upload_crashes(&self, id: i64, stamp: &str, log: &mut RunLog) -> String {
        let prefix = crash_prefix(stamp);
        let dir = self.layout.crash_dir(id);
        let mut uploaded = 0;

        match tokio::fs::read_dir(&dir).await {
            Ok(mut entries) => loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if !path.is_file() {
                            continue;
                        }
                        let key = format!("{}{}", prefix, entry.file_name().to_string_lossy());
                        match self.store.put_file(&key, &path).await {
                            Ok(()) => uploaded += 1,
                            Err(err) => log.warn(format!("Crash upload of {} failed: {}", key, err)),
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log.warn(format!("Reading {} failed: {}", dir.display(), err));
                        break;
                    }
                }
            },
            Err(err) => log.warn(format!("No crash directory {}: {}", dir.display(), err)),
        }

        let uri = self.store.uri(&prefix);
        log.info(format!("Uploaded {} crash file(s) to {}", uploaded, uri));
        uri
    }

    /// Upload the outputs and load them into the database.
    ///
    /// `paths` is filled in as uploads succeed so a later failure still
    /// records where the outputs went.
    async fn persist(&self, id: i64, log: &mut RunLog, paths: &mut StatusPaths) -> Result<()> {
        let image_key = thickness_image_key(id);
        let stats_key = roi_stats_key(id);

        self.store
            .put_file(&image_key, &self.layout.thickness_image(id))
            .await?;
        paths.nifti = self.store.uri(&image_key);
        self.store.put_file(&stats_key, &self.layout.roi_stats(id)).await?;
        paths.roi = self.store.uri(&stats_key);
        log.info(format!("Uploaded outputs to {} and {}", paths.nifti, paths.roi));

        let guid = self.db.guid_for_image03(id).await?;
        let subject = SubjectRef::new(id.to_string(), guid);

        let mut loader = ArtifactLoader::new(self.db, self.store, self.catalog);
        if let Some(map) = self.roi_map {
            loader = loader.with_roi_map(map);
        }

        let pipeline = &self.config.catalog_pipeline;
        let stats_text = tokio::fs::read_to_string(self.layout.roi_stats(id)).await?;
        let stats_artifact = ArtifactRef::new(pipeline.as_str(), stats_key.as_str(), paths.roi.as_str());
        let image_artifact =
            ArtifactRef::new(pipeline.as_str(), image_key.as_str(), paths.nifti.as_str());

        for (artifact, content) in [(stats_artifact, Some(stats_text)), (image_artifact, None)] {
            match loader.load_content(&artifact, &subject, content).await? {
                LoadOutcome::Skipped => {
                    return Err(WorkflowError::Config(format!(
                        "catalog pipeline {} has no rule for {}",
                        pipeline, artifact.key
                    )))
                }
                outcome => log.info(format!("{}: {:?}", artifact.key, outcome)),
            }
        }
        Ok(())
    }

    /// Upload the run log and append the status row.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        id: i64,
        stamp: &str,
        mut log: RunLog,
        outcome: Outcome,
        wf_status: &str,
        extract_status: &str,
        paths: StatusPaths,
    ) -> Result<RunReport> {
        log.info(format!("Finished with {}", outcome));

        let key = log_key(stamp, id);
        let log_url = match self.store.put_file(&key, log.path()).await {
            Ok(()) => self.store.uri(&key),
            Err(err) => {
                warn!(image03_id = id, error = %err, "Run log upload failed");
                STATUS_NOT_APPLICABLE.to_string()
            }
        };

        let record = StatusRecord {
            img03_id: id,
            wf_status: wf_status.to_string(),
            extract_status: extract_status.to_string(),
            log_path: log_url.clone(),
            nifti_path: paths.nifti,
            roi_path: paths.roi,
            timestamp: MindarDb::timestamp_now(),
        };
        let status_id = self.db.append_status(&record).await?;

        Ok(RunReport {
            image03_id: id,
            outcome,
            skipped: false,
            status_id: Some(status_id),
            log_url: Some(log_url),
        })
    }
}
