//! Local working layout and remote key layout for one subject.

use std::path::{Path, PathBuf};

/// Output image name written by the cortical thickness pipeline.
pub const THICKNESS_IMAGE: &str = "OUTPUT_CorticalThicknessNormalizedToTemplate.nii.gz";
/// ROI statistics written by the cortical thickness pipeline.
pub const ROI_STATS: &str = "ROIstats.txt";

/// Directories and files under the configured work root.
///
/// ```text
/// <root>/inputs/<id>.nii.gz
/// <root>/work-dirs/<id>/output/OUTPUT_CorticalThicknessNormalizedToTemplate.nii.gz
/// <root>/work-dirs/<id>/output/ROIstats.txt
/// <root>/work-dirs/<id>/crashes/
/// <root>/logs/<id>.log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_file(&self, id: i64) -> PathBuf {
        self.root.join("inputs").join(format!("{}.nii.gz", id))
    }

    pub fn work_dir(&self, id: i64) -> PathBuf {
        self.root.join("work-dirs").join(id.to_string())
    }

    pub fn output_dir(&self, id: i64) -> PathBuf {
        self.work_dir(id).join("output")
    }

    pub fn thickness_image(&self, id: i64) -> PathBuf {
        self.output_dir(id).join(THICKNESS_IMAGE)
    }

    pub fn roi_stats(&self, id: i64) -> PathBuf {
        self.output_dir(id).join(ROI_STATS)
    }

    pub fn crash_dir(&self, id: i64) -> PathBuf {
        self.work_dir(id).join("crashes")
    }

    pub fn log_file(&self, id: i64) -> PathBuf {
        self.root.join("logs").join(format!("{}.log", id))
    }

    /// Create every directory a run writes into.
    pub async fn prepare(&self, id: i64) -> std::io::Result<()> {
        for dir in [
            self.root.join("inputs"),
            self.output_dir(id),
            self.crash_dir(id),
            self.root.join("logs"),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Remote keys
// ============================================================================

pub fn thickness_image_key(id: i64) -> String {
    format!("outputs/{id}/{id}_corticalthickness_normd.nii.gz")
}

pub fn roi_stats_key(id: i64) -> String {
    format!("outputs/{id}/{id}_ROIstats.txt")
}

pub fn log_key(stamp: &str, id: i64) -> String {
    format!("logs/{}_{}.log", stamp, id)
}

/// Prefix every crash file of one run is uploaded under.
pub fn crash_prefix(stamp: &str) -> String {
    format!("crashes/{}/", stamp)
}
