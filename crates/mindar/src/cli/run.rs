//! Run command - process subjects of a subject list through the workflow
//!
//! `--index N` processes the N-th entry (1-based, matching cluster job-array
//! task ids); `--all` processes every entry in order.

use crate::cli::config::{
    connect_store, load_catalog, load_roi_map, open_db, read_yaml, runtime, Settings, SharedArgs,
};
use crate::cli::error::HelpfulError;
use anyhow::Context;
use mindar_ingest::{Catalog, RoiMap};
use mindar_workflow::{ProcessRunner, SubjectJob, WorkflowConfig, WorkflowDriver};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Arguments for the run command
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Subject list YAML: a list of [image03_id, s3_path] pairs
    #[arg(long)]
    pub subjects: PathBuf,

    /// 1-based entry of the subject list to process
    #[arg(long, conflicts_with = "all", required_unless_present = "all")]
    pub index: Option<usize>,

    /// Process every entry sequentially
    #[arg(long)]
    pub all: bool,

    /// ROI label descriptions YAML (overrides [workflow] roi_map)
    #[arg(long)]
    pub roi_map: Option<PathBuf>,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Execute the run command
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let jobs: Vec<SubjectJob> =
        read_yaml(&args.subjects, "a list of [image03_id, s3_path] pairs")?;
    let jobs = select_jobs(jobs, args.index, &args.subjects)?;

    let settings = Settings::resolve(&args.shared)?;
    let catalog = load_catalog(args.shared.catalog.as_deref())?;
    let roi_path = args.roi_map.clone().or_else(|| settings.workflow.roi_map.clone());
    let roi_map = load_roi_map(roi_path.as_deref())?;
    let config = settings.workflow_config(settings.credentials()?);

    let rt = runtime()?;
    rt.block_on(run_async(&settings, &catalog, roi_map.as_ref(), &config, &jobs))
}

/// Pick the entries to process: one (1-based) or all.
pub fn select_jobs(
    jobs: Vec<SubjectJob>,
    index: Option<usize>,
    path: &Path,
) -> anyhow::Result<Vec<SubjectJob>> {
    let Some(index) = index else {
        return Ok(jobs);
    };
    let total = jobs.len();
    match index.checked_sub(1).and_then(|i| jobs.into_iter().nth(i)) {
        Some(job) => Ok(vec![job]),
        None => Err(HelpfulError::new(format!("Index {} is out of range", index))
            .with_context(format!(
                "{} lists {} subject(s); indices start at 1",
                path.display(),
                total
            ))
            .with_suggestion("TRY: Use --all to process the whole list")
            .into()),
    }
}

async fn run_async(
    settings: &Settings,
    catalog: &Catalog,
    roi_map: Option<&RoiMap>,
    config: &WorkflowConfig,
    jobs: &[SubjectJob],
) -> anyhow::Result<()> {
    let db = open_db(settings).await?;
    let store = connect_store(settings).await?;
    let runner = ProcessRunner;

    let mut driver = WorkflowDriver::new(&db, store.as_ref(), catalog, &runner, config);
    if let Some(map) = roi_map {
        driver = driver.with_roi_map(map);
    }

    let mut failed = 0;
    for job in jobs {
        match driver.process_subject(job).await {
            Ok(report) if report.skipped => {
                println!("{}  {} (already processed)", job.image03_id, report.outcome);
            }
            Ok(report) => {
                println!("{}  {}", job.image03_id, report.outcome);
                if !report.outcome.is_pass() {
                    failed += 1;
                }
            }
            Err(err) if err.is_fatal() => {
                db.close().await;
                return Err(err)
                    .with_context(|| format!("Stopping at image03 id {}", job.image03_id));
            }
            Err(err) => {
                error!(image03_id = job.image03_id, "Run failed: {}", err);
                failed += 1;
            }
        }
    }

    db.close().await;
    info!(total = jobs.len(), failed, "Run finished");

    if failed > 0 {
        return Err(HelpfulError::batch_failed("subjects", failed, jobs.len()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs() -> Vec<SubjectJob> {
        (1..=3)
            .map(|id| SubjectJob {
                image03_id: id * 10,
                source: format!("s3://bucket/{}.zip", id),
            })
            .collect()
    }

    #[test]
    fn test_select_all() {
        let selected = select_jobs(jobs(), None, Path::new("subs.yml")).unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_select_is_one_based() {
        let selected = select_jobs(jobs(), Some(1), Path::new("subs.yml")).unwrap();
        assert_eq!(selected, vec![jobs()[0].clone()]);

        let selected = select_jobs(jobs(), Some(3), Path::new("subs.yml")).unwrap();
        assert_eq!(selected[0].image03_id, 30);
    }

    #[test]
    fn test_select_out_of_range() {
        assert!(select_jobs(jobs(), Some(0), Path::new("subs.yml")).is_err());
        let err = select_jobs(jobs(), Some(4), Path::new("subs.yml")).unwrap_err();
        assert!(err.to_string().contains("Index 4"));
    }

    #[test]
    fn test_subject_list_yaml() {
        let jobs: Vec<SubjectJob> =
            serde_yaml::from_str("- [101, 's3://NDAR_Central/a.zip']\n- [102, 's3://NDAR_Central/b.zip']\n")
                .unwrap();
        assert_eq!(jobs[1].image03_id, 102);
        assert_eq!(jobs[0].source, "s3://NDAR_Central/a.zip");
    }
}
