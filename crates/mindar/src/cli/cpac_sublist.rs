//! Cpac-sublist command - write a C-PAC subject list from image03 scans
//!
//! Each subject with an anatomical and a resting-state scan gets one entry.
//! Scans are unpacked under `--inputs` with the configured unpack tool; a
//! scan that fails to unpack is listed by its remote path.

use crate::cli::config::{open_existing_db, runtime, Settings, SharedArgs};
use crate::cli::error::HelpfulError;
use mindar_workflow::{CpacSubject, ProcessRunner, SublistBuilder};
use std::path::{Path, PathBuf};
use tracing::info;

/// Arguments for the cpac-sublist command
#[derive(Debug, clap::Args)]
pub struct CpacSublistArgs {
    /// Directory the scans are unpacked into
    #[arg(long)]
    pub inputs: PathBuf,

    /// Study name, the first directory level under --inputs
    #[arg(long)]
    pub study: String,

    /// Output subject list YAML (must not exist)
    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub shared: SharedArgs,
}

/// Execute the cpac-sublist command
pub fn run(args: CpacSublistArgs) -> anyhow::Result<()> {
    if args.out.exists() {
        return Err(HelpfulError::new(format!(
            "Subject list already exists: {}",
            args.out.display()
        ))
        .with_suggestion("TRY: Remove it or choose another --out path")
        .into());
    }
    let settings = Settings::resolve(&args.shared)?;
    let credentials = settings.credentials()?;
    let unpack = settings.unpack_command();

    let rt = runtime()?;
    let subjects = rt.block_on(async {
        let db = open_existing_db(&settings).await?;
        let scans = db.image_scans().await;
        db.close().await;

        let runner = ProcessRunner;
        let builder = SublistBuilder::new(&runner, &unpack, &args.inputs, &args.study)
            .with_credentials(credentials.as_ref());
        anyhow::Ok(builder.build(&scans?).await)
    })?;

    write_cpac_sublist(&subjects, &args.out)?;
    println!("Wrote {} subject(s) to {}", subjects.len(), args.out.display());
    Ok(())
}

pub fn write_cpac_sublist(subjects: &[CpacSubject], out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(out, serde_yaml::to_string(subjects)?)?;
    info!(count = subjects.len(), path = %out.display(), "C-PAC subject list written");
    Ok(())
}
