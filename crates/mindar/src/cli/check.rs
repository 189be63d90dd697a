//! Check command - make sure ACT results are loaded for a list of dataset ids
//!
//! For each id the uploaded workflow output (`outputs/<id>/...`) is loaded
//! into the chosen table. Complete entries are left alone; partial ones are
//! replaced.

use crate::cli::batch::BatchSummary;
use crate::cli::config::{
    connect_store, load_catalog, load_roi_map, open_db, read_yaml, runtime, Settings, SharedArgs,
};
use crate::cli::error::HelpfulError;
use anyhow::Context;
use mindar_db::{MindarDb, Table};
use mindar_ingest::{ArtifactLoader, ArtifactRef, Catalog, LoadOutcome, RoiMap, SubjectRef};
use mindar_storage::ObjectStore;
use mindar_workflow::layout::{roi_stats_key, thickness_image_key};
use std::path::PathBuf;
use tracing::error;

/// Arguments for the check command
#[derive(Debug, clap::Args)]
pub struct CheckArgs {
    /// YAML list of image03 dataset ids
    #[arg(long)]
    pub ids: PathBuf,

    /// Table to check: derivatives_unormd or img_derivatives_unormd
    #[arg(long)]
    pub table: String,

    /// ROI label descriptions YAML (overrides [workflow] roi_map)
    #[arg(long)]
    pub roi_map: Option<PathBuf>,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Object key of the ACT output loaded into `table`.
pub fn output_key(table: Table, id: i64) -> anyhow::Result<String> {
    match table {
        Table::DerivativesUnormd => Ok(roi_stats_key(id)),
        Table::ImgDerivativesUnormd => Ok(thickness_image_key(id)),
        other => Err(HelpfulError::new(format!("Cannot check table {}", other))
            .with_context("Only ACT result tables are filled from uploaded outputs")
            .with_suggestion("TRY: --table derivatives_unormd or --table img_derivatives_unormd")
            .into()),
    }
}

/// Execute the check command
pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let table: Table = args.table.parse()?;
    output_key(table, 0)?;

    let ids: Vec<i64> = read_yaml(&args.ids, "a list of image03 dataset ids")?;
    let settings = Settings::resolve(&args.shared)?;
    let catalog = load_catalog(args.shared.catalog.as_deref())?;
    let roi_path = args.roi_map.clone().or_else(|| settings.workflow.roi_map.clone());
    let roi_map = load_roi_map(roi_path.as_deref())?;
    let pipeline = settings.workflow.catalog_pipeline.clone();

    let rt = runtime()?;
    let summary = rt.block_on(async {
        let db = open_db(&settings).await?;
        let store = connect_store(&settings).await?;
        let result = check_ids(
            &db,
            store.as_ref(),
            &catalog,
            roi_map.as_ref(),
            &pipeline,
            table,
            &ids,
        )
        .await;
        db.close().await;
        result
    })?;

    summary.print("dataset ids");
    summary.into_result("dataset ids")
}

/// Load the ACT output of every id into `table`.
pub async fn check_ids(
    db: &MindarDb,
    store: &dyn ObjectStore,
    catalog: &Catalog,
    roi_map: Option<&RoiMap>,
    pipeline: &str,
    table: Table,
    ids: &[i64],
) -> anyhow::Result<BatchSummary> {
    let mut loader = ArtifactLoader::new(db, store, catalog);
    if let Some(map) = roi_map {
        loader = loader.with_roi_map(map);
    }

    let mut summary = BatchSummary::default();
    for &id in ids {
        let key = output_key(table, id)?;
        let artifact = ArtifactRef::new(pipeline, key.as_str(), store.uri(&key));

        let result = match db.guid_for_image03(id).await {
            Ok(guid) => {
                let subject = SubjectRef::new(id.to_string(), guid);
                loader.load(&artifact, &subject).await
            }
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(LoadOutcome::Skipped) => {
                error!(dataset_id = id, key = %key, pipeline, "No catalog rule for the key");
                summary.record_failure();
            }
            Ok(outcome) => summary.record(&outcome),
            Err(err) if err.is_fatal() => {
                return Err(err).with_context(|| format!("Stopping at dataset id {}", id));
            }
            Err(err) => {
                error!(dataset_id = id, "Check failed: {}", err);
                summary.record_failure();
            }
        }
    }

    Ok(summary)
}
