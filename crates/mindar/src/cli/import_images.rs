//! Import-images command - register image03 scans from a CSV export
//!
//! Expected columns: image03_id, subjectkey, interview_age,
//! image_description, image_file. Re-importing an id replaces its row.

use crate::cli::config::{open_db, runtime, Settings, SharedArgs};
use crate::cli::error::HelpfulError;
use mindar_db::ImageScan;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;

/// Arguments for the import-images command
#[derive(Debug, clap::Args)]
pub struct ImportImagesArgs {
    /// image03 CSV export
    #[arg(long)]
    pub csv: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(Debug, Deserialize)]
struct ImageRecord {
    image03_id: i64,
    subjectkey: String,
    #[serde(default)]
    interview_age: Option<String>,
    #[serde(default)]
    image_description: Option<String>,
    image_file: String,
}

impl From<ImageRecord> for ImageScan {
    fn from(record: ImageRecord) -> Self {
        ImageScan {
            image03_id: record.image03_id,
            subjectkey: record.subjectkey,
            interview_age: record
                .interview_age
                .as_deref()
                .and_then(|age| age.trim().parse().ok()),
            image_description: record.image_description.unwrap_or_default(),
            image_file: record.image_file,
        }
    }
}

/// Parse image03 rows.
pub fn parse_scans(input: impl Read) -> anyhow::Result<Vec<ImageScan>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let mut scans = Vec::new();
    for (line, record) in reader.deserialize::<ImageRecord>().enumerate() {
        let record = record.map_err(|err| {
            HelpfulError::new(format!("CSV parse error at row {}: {}", line + 1, err)).with_suggestion(
                "TRY: The header must include image03_id, subjectkey and image_file columns",
            )
        })?;
        scans.push(record.into());
    }
    Ok(scans)
}

/// Execute the import-images command
pub fn run(args: ImportImagesArgs) -> anyhow::Result<()> {
    if !args.csv.exists() {
        return Err(HelpfulError::file_not_found(&args.csv).into());
    }
    let scans = parse_scans(std::fs::File::open(&args.csv)?)?;
    let settings = Settings::resolve(&args.shared)?;

    let rt = runtime()?;
    rt.block_on(async {
        let db = open_db(&settings).await?;
        for scan in &scans {
            db.register_image_scan(scan).await?;
        }
        db.close().await;
        anyhow::Ok(())
    })?;

    println!("Registered {} image(s)", scans.len());
    Ok(())
}
