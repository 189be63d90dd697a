//! Workflow driver runs with scripted tools, an in-memory bucket and a real
//! SQLite database.

use async_trait::async_trait;
use mindar_db::{MindarDb, StatusRecord, Table};
use mindar_ingest::Catalog;
use mindar_storage::{AwsCredentials, InMemoryObjectStore};
use mindar_workflow::layout::{ROI_STATS, THICKNESS_IMAGE};
use mindar_workflow::{
    Outcome, SubjectJob, ToolCommand, ToolError, ToolInvocation, ToolOutput, ToolRunner,
    WorkflowConfig, WorkflowDriver, STATUS_PERSIST_ERROR,
};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

const ROI_STATS_TEXT: &str = "File Sub-brick Mean_2 Mean_1002\n/out/thick.nii.gz 0[?] 1.5 2.5\n";

type Script = dyn Fn(&ToolInvocation) -> Result<ToolOutput, ToolError> + Send + Sync;

/// Records every invocation and answers with a script instead of a process.
struct ScriptedRunner {
    calls: Mutex<Vec<ToolInvocation>>,
    script: Box<Script>,
}

impl ScriptedRunner {
    fn new(
        script: impl Fn(&ToolInvocation) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        }
    }

    fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(invocation.clone());
        (self.script)(invocation)
    }
}

/// Unpack writes the input image; the pipeline writes both outputs.
fn working_tools(inv: &ToolInvocation) -> Result<ToolOutput, ToolError> {
    match inv.program.as_str() {
        "unpack" => {
            std::fs::write(&inv.args[5], b"nifti").unwrap();
        }
        "act-pipeline" => {
            let out = Path::new(&inv.args[1]);
            std::fs::write(out.join(THICKNESS_IMAGE), b"thickness").unwrap();
            std::fs::write(out.join(ROI_STATS), ROI_STATS_TEXT).unwrap();
        }
        other => panic!("unexpected tool {other}"),
    }
    Ok(ToolOutput::default())
}

struct Fixture {
    _dir: TempDir,
    db: MindarDb,
    store: InMemoryObjectStore,
    catalog: Catalog,
    config: WorkflowConfig,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let db = MindarDb::open(dir.path().join("mindar.sqlite3")).await.unwrap();
    let config = WorkflowConfig {
        work_root: dir.path().join("work"),
        source_bucket: "NDAR_Central".to_string(),
        unpack: ToolCommand::new(
            "unpack",
            &["--key", "{access_key_id}", "--secret", "{secret_access_key}", "-o", "{input}", "{source}"],
            60,
        ),
        pipeline: ToolCommand::new("act-pipeline", &["{input}", "{output_dir}", "{crash_dir}"], 60),
        catalog_pipeline: "act".to_string(),
        credentials: Some(AwsCredentials::new("AKIDTEST", "topsecret")),
    };
    Fixture {
        _dir: dir,
        db,
        store: InMemoryObjectStore::new("results"),
        catalog: Catalog::builtin().unwrap(),
        config,
    }
}

fn job(id: i64) -> SubjectJob {
    SubjectJob {
        image03_id: id,
        source: format!("s3://submission_9/sub-{id}/image.zip"),
    }
}

#[tokio::test]
async fn prior_pass_short_circuits_without_tools() {
    let fx = fixture().await;
    fx.db
        .append_status(&StatusRecord {
            img03_id: 1,
            wf_status: "PASS".to_string(),
            extract_status: "PASS".to_string(),
            log_path: "s3://results/logs/x_1.log".to_string(),
            nifti_path: "N/A".to_string(),
            roi_path: "N/A".to_string(),
            timestamp: MindarDb::timestamp_now(),
        })
        .await
        .unwrap();

    let runner = ScriptedRunner::new(|inv| panic!("tool {} must not run", inv.program));
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    let report = driver.process_subject(&job(1)).await.unwrap();
    assert_eq!(report.outcome, Outcome::Pass);
    assert!(report.skipped);
    assert!(runner.calls().is_empty());
    assert_eq!(fx.db.list_status(Some(1), 10).await.unwrap().len(), 1);
    assert!(fx.store.keys().is_empty());
}

#[tokio::test]
async fn missing_unpack_output_is_extract_fail() {
    let fx = fixture().await;
    let runner = ScriptedRunner::new(|_| Ok(ToolOutput::default()));
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    let report = driver.process_subject(&job(2)).await.unwrap();
    assert_eq!(report.outcome, Outcome::ExtractFail);
    assert!(!report.skipped);

    // The pipeline never runs
    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "unpack");

    let rows = fx.db.list_status(Some(2), 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    let status = &rows[0].record;
    assert_eq!(status.extract_status, "FAIL");
    assert_eq!(status.wf_status, "N/A");
    assert_eq!(status.nifti_path, "N/A");
    assert_eq!(status.roi_path, "N/A");
    assert!(status.log_path.starts_with("s3://results/logs/"));
    assert!(status.log_path.ends_with("_2.log"));

    let log_keys: Vec<String> = fx
        .store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("logs/"))
        .collect();
    assert_eq!(log_keys.len(), 1);
}

#[tokio::test]
async fn unpack_gets_rewritten_source_and_credentials() {
    let fx = fixture().await;
    let runner = ScriptedRunner::new(|_| Ok(ToolOutput::default()));
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    driver.process_subject(&job(3)).await.unwrap();

    let unpack = &runner.calls()[0];
    assert_eq!(unpack.args[1], "AKIDTEST");
    assert_eq!(unpack.args[3], "topsecret");
    assert_eq!(unpack.args[6], "s3://NDAR_Central/sub-3/image.zip");
    assert!(!unpack.display().contains("topsecret"));

    let log = std::fs::read_to_string(driver.layout().log_file(3)).unwrap();
    assert!(!log.contains("topsecret"));
    assert!(!log.contains("AKIDTEST"));
}

#[tokio::test]
async fn pipeline_failure_uploads_crash_files() {
    let fx = fixture().await;
    let runner = ScriptedRunner::new(|inv| match inv.program.as_str() {
        "unpack" => working_tools(inv),
        _ => {
            std::fs::write(Path::new(&inv.args[2]).join("crash-act.pklz"), b"trace").unwrap();
            Err(ToolError::Failed {
                program: inv.program.clone(),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "segfault".to_string(),
            })
        }
    });
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    let report = driver.process_subject(&job(4)).await.unwrap();
    assert_eq!(report.outcome, Outcome::PipelineFail);

    let rows = fx.db.list_status(Some(4), 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    let status = &rows[0].record;
    assert!(status.wf_status.starts_with("s3://results/crashes/"));
    assert!(status.wf_status.ends_with('/'));
    assert_eq!(status.extract_status, "PASS");
    assert_eq!(status.nifti_path, "N/A");

    assert!(fx
        .store
        .keys()
        .iter()
        .any(|k| k.starts_with("crashes/") && k.ends_with("/crash-act.pklz")));
    assert!(!fx.db.has_passed(4).await.unwrap());
}

#[tokio::test]
async fn pipeline_timeout_is_pipeline_fail() {
    let fx = fixture().await;
    let runner = ScriptedRunner::new(|inv| match inv.program.as_str() {
        "unpack" => working_tools(inv),
        _ => Err(ToolError::Timeout {
            program: inv.program.clone(),
            timeout: Duration::from_secs(60),
        }),
    });
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    let report = driver.process_subject(&job(6)).await.unwrap();
    assert_eq!(report.outcome, Outcome::PipelineFail);
    assert_eq!(fx.db.list_status(Some(6), 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn successful_run_persists_rows_and_passes() {
    let fx = fixture().await;
    fx.db.register_subject_key(5, "NDAR_INV5").await.unwrap();
    let runner = ScriptedRunner::new(working_tools);
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    let report = driver.process_subject(&job(5)).await.unwrap();
    assert_eq!(report.outcome, Outcome::Pass);
    assert_eq!(runner.calls().len(), 2);

    let rows = fx.db.list_status(Some(5), 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    let status = &rows[0].record;
    assert_eq!(status.wf_status, "PASS");
    assert_eq!(status.nifti_path, "s3://results/outputs/5/5_corticalthickness_normd.nii.gz");
    assert_eq!(status.roi_path, "s3://results/outputs/5/5_ROIstats.txt");

    assert!(fx.store.contains("outputs/5/5_ROIstats.txt"));
    assert!(fx.store.contains("outputs/5/5_corticalthickness_normd.nii.gz"));
    assert_eq!(fx.db.count_rows(Table::DerivativesUnormd, "5").await.unwrap(), 2);
    assert_eq!(fx.db.count_rows(Table::ImgDerivativesUnormd, "5").await.unwrap(), 1);
    assert_eq!(fx.db.count_rows(Table::Derivatives, "5").await.unwrap(), 2);
    assert_eq!(fx.db.count_rows(Table::ImgDerivatives, "5").await.unwrap(), 1);

    // A second run is a no-op
    let again = driver.process_subject(&job(5)).await.unwrap();
    assert!(again.skipped);
    assert_eq!(runner.calls().len(), 2);
    assert_eq!(fx.db.list_status(Some(5), 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_guid_is_persist_fail_and_retried_later() {
    let fx = fixture().await;
    let runner = ScriptedRunner::new(working_tools);
    let driver = WorkflowDriver::new(&fx.db, &fx.store, &fx.catalog, &runner, &fx.config);

    let report = driver.process_subject(&job(8)).await.unwrap();
    assert_eq!(report.outcome, Outcome::PersistFail);

    let rows = fx.db.list_status(Some(8), 10).await.unwrap();
    assert_eq!(rows[0].record.wf_status, STATUS_PERSIST_ERROR);
    assert_eq!(
        rows[0].record.nifti_path,
        "s3://results/outputs/8/8_corticalthickness_normd.nii.gz"
    );
    assert!(!fx.db.has_passed(8).await.unwrap());

    // Outputs on disk are reused: no tool runs on the retry
    fx.db.register_subject_key(8, "NDAR_INV8").await.unwrap();
    let retry = driver.process_subject(&job(8)).await.unwrap();
    assert_eq!(retry.outcome, Outcome::Pass);
    assert_eq!(runner.calls().len(), 2);
    assert_eq!(fx.db.list_status(Some(8), 10).await.unwrap().len(), 2);
    assert_eq!(fx.db.count_rows(Table::DerivativesUnormd, "8").await.unwrap(), 2);
}
