//! C-PAC subject list builder.
//!
//! Groups image03 scans into one entry per subject with an anatomical scan
//! and at least one resting-state scan, unpacks each scan into the C-PAC
//! inputs tree and reports the local paths.
//!
//! ```text
//! <inputs>/<study>/<subjectkey>/<unique_id>/anat_1/anat.nii.gz
//!                                          /rest_1/rest.nii.gz
//!                                          /rest_2/rest.nii.gz
//! ```

use crate::tool::{ToolCommand, ToolRunner, ToolVars};
use mindar_db::ImageScan;
use mindar_storage::AwsCredentials;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Used as the unique id when the anatomical scan has no interview age.
pub const UNKNOWN_AGE: &str = "NA";

/// Scan type, from the image description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Anat,
    Rest,
}

impl ScanKind {
    /// Classify an image description. Functional terms win over `mri`,
    /// which `fmri` also contains.
    pub fn classify(description: &str) -> Option<Self> {
        let lower = description.to_ascii_lowercase();
        if ["fmri", "resting", "epi"].iter().any(|t| lower.contains(t)) {
            Some(Self::Rest)
        } else if ["mri", "structural", "mprage"].iter().any(|t| lower.contains(t)) {
            Some(Self::Anat)
        } else {
            None
        }
    }
}

/// One subject-list entry, in the layout C-PAC reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpacSubject {
    pub anat: String,
    /// `rest_<n>_rest` → scan path.
    pub rest: BTreeMap<String, String>,
    pub subject_id: String,
    pub unique_id: String,
}

/// A subject's scans before unpacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectScans {
    pub subject_id: String,
    pub unique_id: String,
    pub anat: ImageScan,
    pub rest: Vec<ImageScan>,
}

/// Group scans by subject key, keeping subjects that have both an
/// anatomical and a resting-state scan.
///
/// The first anatomical scan by image03 id is used; its interview age
/// becomes the unique id.
pub fn group_scans(scans: &[ImageScan]) -> Vec<SubjectScans> {
    let mut by_subject: BTreeMap<&str, (Option<&ImageScan>, Vec<&ImageScan>)> = BTreeMap::new();
    let mut ordered: Vec<&ImageScan> = scans.iter().collect();
    ordered.sort_by_key(|s| s.image03_id);

    for scan in ordered {
        let entry = by_subject.entry(scan.subjectkey.as_str()).or_default();
        match ScanKind::classify(&scan.image_description) {
            Some(ScanKind::Anat) if entry.0.is_none() => entry.0 = Some(scan),
            Some(ScanKind::Anat) => {}
            Some(ScanKind::Rest) => entry.1.push(scan),
            None => warn!(
                image03_id = scan.image03_id,
                description = %scan.image_description,
                "Unknown scan type, skipping"
            ),
        }
    }

    by_subject
        .into_iter()
        .filter_map(|(subject, (anat, rest))| match anat {
            Some(anat) if !rest.is_empty() => Some(SubjectScans {
                subject_id: subject.to_string(),
                unique_id: anat
                    .interview_age
                    .map(|age| age.to_string())
                    .unwrap_or_else(|| UNKNOWN_AGE.to_string()),
                anat: anat.clone(),
                rest: rest.into_iter().cloned().collect(),
            }),
            _ => {
                info!(subject, "Subject lacks an anatomical or resting scan, skipping");
                None
            }
        })
        .collect()
}

/// Builds the subject list, unpacking scans with the configured tool.
pub struct SublistBuilder<'a> {
    runner: &'a dyn ToolRunner,
    unpack: &'a ToolCommand,
    credentials: Option<&'a AwsCredentials>,
    study_dir: PathBuf,
}

impl<'a> SublistBuilder<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        unpack: &'a ToolCommand,
        inputs_dir: &Path,
        study: &str,
    ) -> Self {
        Self {
            runner,
            unpack,
            credentials: None,
            study_dir: inputs_dir.join(study),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<&'a AwsCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Group `scans` and unpack every selected scan.
    ///
    /// A scan that fails to unpack keeps its remote path in the entry.
    pub async fn build(&self, scans: &[ImageScan]) -> Vec<CpacSubject> {
        let mut subjects = Vec::new();
        for group in group_scans(scans) {
            let session = self
                .study_dir
                .join(&group.subject_id)
                .join(&group.unique_id);

            let anat = self
                .fetch(&group.anat, &session.join("anat_1").join("anat.nii.gz"))
                .await;
            let mut rest = BTreeMap::new();
            for (n, scan) in group.rest.iter().enumerate() {
                let n = n + 1;
                let target = session.join(format!("rest_{}", n)).join("rest.nii.gz");
                rest.insert(format!("rest_{}_rest", n), self.fetch(scan, &target).await);
            }

            subjects.push(CpacSubject {
                anat,
                rest,
                subject_id: group.subject_id,
                unique_id: group.unique_id,
            });
        }
        info!(subjects = subjects.len(), "Subject list built");
        subjects
    }

    /// Local path of the unpacked scan, or its remote path on failure.
    async fn fetch(&self, scan: &ImageScan, target: &Path) -> String {
        if target.exists() {
            return target.display().to_string();
        }
        if let Some(parent) = target.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(dir = %parent.display(), error = %err, "Cannot create scan directory");
                return scan.image_file.clone();
            }
        }

        let (access_key_id, secret_access_key) = self
            .credentials
            .map(|c| (c.access_key_id.clone(), c.secret_access_key.clone()))
            .unwrap_or_default();
        let vars = ToolVars {
            access_key_id,
            secret_access_key,
            source: scan.image_file.clone(),
            input: target.display().to_string(),
            work_dir: target
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            ..Default::default()
        };

        let invocation = self.unpack.invocation(&vars);
        match self.runner.run(&invocation).await {
            Ok(_) if target.exists() => target.display().to_string(),
            Ok(_) => {
                warn!(image03_id = scan.image03_id, "Unpack produced no image, keeping remote path");
                scan.image_file.clone()
            }
            Err(err) => {
                warn!(image03_id = scan.image03_id, error = %err, "Unpack failed, keeping remote path");
                scan.image_file.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(id: i64, subject: &str, kind: &str, age: Option<i64>) -> ImageScan {
        ImageScan {
            image03_id: id,
            subjectkey: subject.to_string(),
            interview_age: age,
            image_description: kind.to_string(),
            image_file: format!("s3://NDAR_Central/submission/{}.zip", id),
        }
    }

    #[test]
    fn test_classify_scan_types() {
        assert_eq!(ScanKind::classify("fMRI"), Some(ScanKind::Rest));
        assert_eq!(ScanKind::classify("Resting state"), Some(ScanKind::Rest));
        assert_eq!(ScanKind::classify("EPI"), Some(ScanKind::Rest));
        assert_eq!(ScanKind::classify("MPRAGE"), Some(ScanKind::Anat));
        assert_eq!(ScanKind::classify("structural MRI"), Some(ScanKind::Anat));
        assert_eq!(ScanKind::classify("DTI"), None);
    }

    #[test]
    fn test_group_requires_anat_and_rest() {
        let scans = vec![
            scan(4, "NDAR_B", "MPRAGE", Some(200)),
            scan(3, "NDAR_A", "EPI", Some(120)),
            scan(1, "NDAR_A", "MPRAGE", Some(121)),
            scan(2, "NDAR_A", "fMRI", Some(121)),
            scan(5, "NDAR_A", "MPRAGE", Some(300)),
            scan(6, "NDAR_C", "EPI", None),
            scan(7, "NDAR_A", "DTI", None),
        ];

        let groups = group_scans(&scans);
        assert_eq!(groups.len(), 1);
        let a = &groups[0];
        assert_eq!(a.subject_id, "NDAR_A");
        assert_eq!(a.unique_id, "121");
        assert_eq!(a.anat.image03_id, 1);
        let rest: Vec<i64> = a.rest.iter().map(|s| s.image03_id).collect();
        assert_eq!(rest, vec![2, 3]);
    }

    #[test]
    fn test_missing_age_uses_placeholder() {
        let scans = vec![scan(1, "NDAR_A", "MPRAGE", None), scan(2, "NDAR_A", "EPI", None)];
        assert_eq!(group_scans(&scans)[0].unique_id, UNKNOWN_AGE);
    }

    #[test]
    fn test_entry_serializes_in_cpac_layout() {
        let entry = CpacSubject {
            anat: "/in/anat.nii.gz".to_string(),
            rest: BTreeMap::from([("rest_1_rest".to_string(), "/in/rest.nii.gz".to_string())]),
            subject_id: "NDAR_A".to_string(),
            unique_id: "121".to_string(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["rest"]["rest_1_rest"], "/in/rest.nii.gz");
        assert_eq!(json["unique_id"], "121");
    }
}
