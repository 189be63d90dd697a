//! Status command - list workflow run status rows

use crate::cli::config::{open_db, runtime, Settings, SharedArgs};
use crate::cli::output::{print_table_colored, truncate_start};
use comfy_table::Color;
use mindar_db::{StatusRow, STATUS_FAIL, STATUS_PASS};
use serde::Serialize;

/// Arguments for the status command
#[derive(Debug, clap::Args)]
pub struct StatusArgs {
    /// Only runs of this image03 id
    #[arg(long)]
    pub id: Option<i64>,

    /// Maximum number of rows
    #[arg(long, default_value = "50")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    image03_id: Option<i64>,
    limit: usize,
    runs: Vec<StatusRow>,
}

fn status_color(status: &str) -> Option<Color> {
    match status {
        STATUS_PASS => Some(Color::Green),
        STATUS_FAIL => Some(Color::Red),
        s if s.starts_with("s3://") || s.starts_with("Error") => Some(Color::Red),
        _ => Some(Color::DarkGrey),
    }
}

/// Execute the status command
pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&args.shared)?;

    let rt = runtime()?;
    let runs = rt.block_on(async {
        let db = open_db(&settings).await?;
        let runs = db.list_status(args.id, args.limit).await;
        db.close().await;
        anyhow::Ok(runs?)
    })?;

    if args.json {
        let output = StatusOutput {
            image03_id: args.id,
            limit: args.limit,
            runs,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No workflow runs recorded.");
        return Ok(());
    }

    let headers = ["RUN", "IMAGE03", "WORKFLOW", "EXTRACT", "LOG", "NIFTI", "ROI", "TIME"];
    let rows = runs
        .iter()
        .map(|run| {
            let r = &run.record;
            vec![
                (run.rs_id.to_string(), None),
                (r.img03_id.to_string(), None),
                (truncate_start(&r.wf_status, 40), status_color(&r.wf_status)),
                (r.extract_status.clone(), status_color(&r.extract_status)),
                (truncate_start(&r.log_path, 40), None),
                (truncate_start(&r.nifti_path, 40), None),
                (truncate_start(&r.roi_path, 40), None),
                (r.timestamp.clone(), None),
            ]
        })
        .collect();
    print_table_colored(&headers, rows);
    Ok(())
}
