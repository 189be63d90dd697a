//! Upload command - load every result of one pipeline found in the bucket
//!
//! Keys are listed under `--prefix`, kept when they contain the pipeline
//! name, classified by the catalog and loaded with the subject resolved from
//! the id embedded in the file name. Rows record the public https URL of
//! the object.

use crate::cli::batch::BatchSummary;
use crate::cli::config::{connect_store, load_catalog, open_db, runtime, Settings, SharedArgs};
use crate::cli::error::HelpfulError;
use anyhow::Context;
use mindar_db::MindarDb;
use mindar_ingest::{locate, ArtifactLoader, ArtifactRef, Catalog, LoadOutcome};
use mindar_storage::{normalize_prefix, ObjectStore};
use tracing::{debug, error, info};

/// Arguments for the upload command
#[derive(Debug, clap::Args)]
pub struct UploadArgs {
    /// Catalog pipeline whose results are loaded (e.g. cpac, civet, freesurfer)
    #[arg(long)]
    pub pipeline: String,

    /// Only list keys under this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Execute the upload command
pub fn run(args: UploadArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&args.shared)?;
    let catalog = load_catalog(args.shared.catalog.as_deref())?;
    if catalog.get(&args.pipeline).is_err() {
        let known: Vec<&str> = catalog.names().collect();
        return Err(HelpfulError::new(format!("Unknown pipeline: {}", args.pipeline))
            .with_suggestion(format!("TRY: One of {}", known.join(", ")))
            .into());
    }
    let prefix = normalize_prefix(args.prefix.as_deref())?;

    let rt = runtime()?;
    let summary = rt.block_on(async {
        let db = open_db(&settings).await?;
        let store = connect_store(&settings).await?;
        let result = upload_pipeline(&db, store.as_ref(), &catalog, &args.pipeline, &prefix).await;
        db.close().await;
        result
    })?;

    if args.json {
        // A failed batch is reported as one JSON error object instead
        summary.clone().into_result("artifacts")?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    summary.print("artifacts");
    summary.into_result("artifacts")
}

/// Load every key under `prefix` that belongs to `pipeline`.
///
/// Per-artifact failures are logged and counted; a data inconsistency
/// stops the batch.
pub async fn upload_pipeline(
    db: &MindarDb,
    store: &dyn ObjectStore,
    catalog: &Catalog,
    pipeline: &str,
    prefix: &str,
) -> anyhow::Result<BatchSummary> {
    let spec = catalog.get(pipeline)?;
    let loader = ArtifactLoader::new(db, store, catalog);

    let keys: Vec<String> = store
        .list(prefix)
        .await?
        .into_iter()
        .filter(|key| key.contains(pipeline))
        .collect();
    info!(pipeline, prefix, keys = keys.len(), "Loading pipeline results");

    let mut summary = BatchSummary::default();
    for key in &keys {
        let located = match locate(spec, key) {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                error!(key = %key, "{}", err);
                summary.record_failure();
                continue;
            }
        };
        if !located {
            debug!(key = %key, "No rule matches");
            summary.record(&LoadOutcome::Skipped);
            continue;
        }

        let artifact = ArtifactRef::new(pipeline, key.as_str(), store.public_url(key));
        let result = match loader.resolve_abide_subject(key).await {
            Ok(subject) => loader.load(&artifact, &subject).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(outcome) => summary.record(&outcome),
            Err(err) if err.is_fatal() => {
                return Err(err).with_context(|| format!("Stopping at {}", key));
            }
            Err(err) => {
                error!(key = %key, "Load failed: {}", err);
                summary.record_failure();
            }
        }
    }

    Ok(summary)
}
