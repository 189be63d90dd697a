//! Import-subjects command - load ABIDE phenotype rows from CSV
//!
//! Expected columns: GUID, SITE_ID, SUB_ID, DX_GROUP, DSM_IV_TR,
//! AGE_AT_SCAN, SEX, HANDEDNESS_CATEGORY. Rows without a GUID are skipped;
//! subjects already present are left alone.

use crate::cli::config::{open_db, runtime, Settings, SharedArgs};
use crate::cli::error::HelpfulError;
use mindar_db::AbideSubject;
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

/// Arguments for the import-subjects command
#[derive(Debug, clap::Args)]
pub struct ImportSubjectsArgs {
    /// Phenotype CSV export
    #[arg(long)]
    pub csv: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(Debug, Deserialize)]
struct PhenotypeRecord {
    #[serde(rename = "GUID", default)]
    guid: Option<String>,
    #[serde(rename = "SITE_ID", default)]
    site_id: Option<String>,
    #[serde(rename = "SUB_ID")]
    sub_id: String,
    #[serde(rename = "DX_GROUP", default)]
    dx_group: Option<String>,
    #[serde(rename = "DSM_IV_TR", default)]
    dsm_iv_tr: Option<String>,
    #[serde(rename = "AGE_AT_SCAN", default)]
    age_at_scan: Option<String>,
    #[serde(rename = "SEX", default)]
    sex: Option<String>,
    #[serde(rename = "HANDEDNESS_CATEGORY", default)]
    handedness: Option<String>,
}

impl PhenotypeRecord {
    fn into_subject(self) -> Option<AbideSubject> {
        let guid = self.guid.map(|g| g.trim().to_string()).filter(|g| !g.is_empty())?;
        let sex = match self.sex.as_deref().map(str::trim) {
            Some("1") => "M",
            _ => "F",
        };
        Some(AbideSubject {
            guid,
            site_id: self.site_id.unwrap_or_default().trim().to_string(),
            sub_id: normalize_sub_id(&self.sub_id),
            dx_group: parse_integer(self.dx_group.as_deref()),
            dsm_iv_tr: parse_integer(self.dsm_iv_tr.as_deref()),
            age_at_scan: self.age_at_scan.as_deref().and_then(|s| s.trim().parse().ok()),
            sex: sex.to_string(),
            handedness: self
                .handedness
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
        })
    }
}

/// `0050002` → `50002`.
fn normalize_sub_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Integers, also when exported as `1.0`.
fn parse_integer(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

/// Parse phenotype rows. Returns the subjects and the number of rows
/// skipped for lacking a GUID.
pub fn parse_phenotypes(input: impl Read) -> anyhow::Result<(Vec<AbideSubject>, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let mut subjects = Vec::new();
    let mut skipped = 0;
    for (line, record) in reader.deserialize::<PhenotypeRecord>().enumerate() {
        let record = record.map_err(|err| {
            HelpfulError::new(format!("CSV parse error at row {}: {}", line + 1, err))
                .with_suggestion("TRY: The header must include GUID and SUB_ID columns")
        })?;
        match record.into_subject() {
            Some(subject) => subjects.push(subject),
            None => {
                debug!(row = line + 1, "No GUID, skipping");
                skipped += 1;
            }
        }
    }
    Ok((subjects, skipped))
}

/// Execute the import-subjects command
pub fn run(args: ImportSubjectsArgs) -> anyhow::Result<()> {
    if !args.csv.exists() {
        return Err(HelpfulError::file_not_found(&args.csv).into());
    }
    let file = std::fs::File::open(&args.csv)?;
    let (subjects, skipped) = parse_phenotypes(file)?;
    let settings = Settings::resolve(&args.shared)?;

    let rt = runtime()?;
    let inserted = rt.block_on(async {
        let db = open_db(&settings).await?;
        let result = db.import_abide_subjects(&subjects).await;
        db.close().await;
        anyhow::Ok(result?)
    })?;

    println!(
        "Imported {} subject(s); {} already present, {} without GUID",
        inserted,
        subjects.len() - inserted,
        skipped
    );
    Ok(())
}
