//! Sublist command - write a subject list for a range of image03 ids

use crate::cli::config::{open_existing_db, runtime, Settings, SharedArgs};
use crate::cli::error::HelpfulError;
use mindar_db::MindarDb;
use std::path::{Path, PathBuf};
use tracing::info;

/// Arguments for the sublist command
#[derive(Debug, clap::Args)]
pub struct SublistArgs {
    /// Smallest image03 id (inclusive)
    #[arg(long)]
    pub min: i64,

    /// Largest image03 id (inclusive)
    #[arg(long)]
    pub max: i64,

    /// Output subject list YAML
    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Execute the sublist command
pub fn run(args: SublistArgs) -> anyhow::Result<()> {
    if args.min > args.max {
        return Err(HelpfulError::new(format!(
            "Empty id range: --min {} is greater than --max {}",
            args.min, args.max
        ))
        .into());
    }
    let settings = Settings::resolve(&args.shared)?;

    let rt = runtime()?;
    let count = rt.block_on(async {
        let db = open_existing_db(&settings).await?;
        let result = write_sublist(&db, args.min, args.max, &args.out).await;
        db.close().await;
        result
    })?;

    println!("Wrote {} subject(s) to {}", count, args.out.display());
    Ok(())
}

/// Write `[[image03_id, image_file], ...]` for ids in `[min, max]`.
pub async fn write_sublist(db: &MindarDb, min: i64, max: i64, out: &Path) -> anyhow::Result<usize> {
    let entries = db.image03_range(min, max).await?;
    let sublist: Vec<(i64, &str)> = entries
        .iter()
        .map(|e| (e.image03_id, e.image_file.as_str()))
        .collect();

    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(out, serde_yaml::to_string(&sublist)?)?;
    info!(min, max, count = sublist.len(), path = %out.display(), "Subject list written");
    Ok(sublist.len())
}
