//! Artifact locator: classify an object key with a pipeline's rules.

use crate::catalog::{ArtifactRule, PipelineSpec};
use crate::error::{IngestError, Result};
use mindar_db::Table;

/// A key classified by a catalog rule, with every descriptive field resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedArtifact<'c> {
    pub pipeline: &'c PipelineSpec,
    pub rule: &'c ArtifactRule,
    pub key: String,
    pub table: Table,
    pub derivative: String,
    pub template: String,
    pub strategy: String,
    pub atlas: String,
    pub roi: String,
    pub roi_description: String,
}

/// Classify `key` with the first matching rule of `spec`.
///
/// `Ok(None)` means no rule applies and the object is not a result of this
/// pipeline. An error means a rule matched but the key lacks something the
/// rule needs (hemisphere, atlas, path segments).
pub fn locate<'c>(spec: &'c PipelineSpec, key: &str) -> Result<Option<LocatedArtifact<'c>>> {
    let name = file_name(key);

    let path = if spec.path_fields {
        match PathFields::from_key(&spec.name, key) {
            Some(fields) => Some(fields),
            None => return Ok(None),
        }
    } else {
        None
    };

    let Some(rule) = spec.rules.iter().find(|rule| rule_matches(rule, key, name)) else {
        return Ok(None);
    };

    let unrecognized = |why: &str| IngestError::Unrecognized {
        pipeline: spec.name.clone(),
        key: format!("{} ({})", key, why),
    };

    let derivative_segment = path.as_ref().map(|p| p.derivative.as_str()).unwrap_or("");

    let atlas = if let Some(code) = atlas_code(derivative_segment).filter(|_| !spec.atlases.is_empty()) {
        Some(
            spec.atlases
                .get(code)
                .ok_or_else(|| unrecognized(&format!("unknown atlas '{}'", code)))?,
        )
    } else {
        None
    };

    let fill = |template: &str| -> String {
        template
            .replace("{derivative}", derivative_segment)
            .replace("{atlas}", atlas.map_or("", |a| a.name.as_str()))
            .replace(
                "{atlas_rois}",
                &atlas.map(|a| a.rois.to_string()).unwrap_or_default(),
            )
    };

    let mut derivative = fill(&rule.derivative);
    if rule.hemisphere {
        derivative.push_str(hemisphere_suffix(name).ok_or_else(|| unrecognized("no lh/rh hemisphere"))?);
    }
    if spec.blur_kernel {
        if let Some(fwhm) = blur_kernel_mm(name) {
            derivative.push_str(&format!(" using {} mm fwhm blurring kernel", fwhm));
        }
    }

    let template = match (&rule.template, &spec.native_template) {
        (Some(template), _) => template.clone(),
        (None, Some(native)) if key.contains("native") => native.clone(),
        _ => spec.template.clone(),
    };

    let strategy = path
        .as_ref()
        .map(|p| p.strategy.clone())
        .unwrap_or_else(|| spec.metadata.strategy.clone());

    let atlas_name = rule
        .file_atlases
        .iter()
        .find(|(pattern, _)| name.contains(pattern.as_str()))
        .map(|(_, atlas)| atlas.clone())
        .or_else(|| atlas.map(|a| a.name.clone()))
        .unwrap_or_else(|| spec.metadata.atlas.clone());

    Ok(Some(LocatedArtifact {
        pipeline: spec,
        rule,
        key: key.to_string(),
        table: spec.table_for(rule),
        derivative,
        template,
        strategy,
        atlas: atlas_name,
        roi: fill(&rule.roi),
        roi_description: fill(&rule.roi_description),
    }))
}

fn rule_matches(rule: &ArtifactRule, key: &str, name: &str) -> bool {
    rule.contains.iter().all(|needle| key.contains(needle.as_str()))
        && rule
            .suffix
            .as_deref()
            .map_or(true, |suffix| name.ends_with(suffix))
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// `<pipeline>/<strategy>/<derivative>/.../<file>` segments of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathFields {
    strategy: String,
    derivative: String,
}

impl PathFields {
    fn from_key(pipeline: &str, key: &str) -> Option<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        let idx = segments.iter().position(|seg| *seg == pipeline)?;
        // strategy, derivative and a file must follow the pipeline segment
        if segments.len() < idx + 4 {
            return None;
        }
        Some(Self {
            strategy: segments[idx + 1].to_string(),
            derivative: segments[idx + 2].to_string(),
        })
    }
}

/// `rois_cc200` → `cc200`.
fn atlas_code(derivative: &str) -> Option<&str> {
    derivative
        .strip_prefix("rois_")
        .map(|rest| rest.split('_').next().unwrap_or(rest))
}

fn hemisphere_suffix(name: &str) -> Option<&'static str> {
    if name.contains("lh") {
        Some(" of left hemisphere")
    } else if name.contains("rh") {
        Some(" of right hemisphere")
    } else {
        None
    }
}

/// Kernel width from a `_<N>mm` token (`..._20mm_left.txt` → `20`).
fn blur_kernel_mm(name: &str) -> Option<&str> {
    name.split(['_', '.']).find_map(|token| {
        token
            .strip_suffix("mm")
            .filter(|width| !width.is_empty() && width.chars().all(|c| c.is_ascii_digit()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    #[test]
    fn act_roi_stats_and_image() {
        let catalog = catalog();
        let act = catalog.get("act").unwrap();

        let stats = locate(act, "outputs/42/42_ROIstats.txt").unwrap().unwrap();
        assert_eq!(stats.table, Table::DerivativesUnormd);
        assert_eq!(stats.derivative, "cortical thickness");
        assert_eq!(stats.atlas, act.metadata.atlas);

        let image = locate(act, "outputs/42/42_corticalthickness_normd.nii.gz")
            .unwrap()
            .unwrap();
        assert_eq!(image.table, Table::ImgDerivativesUnormd);
        assert_eq!(image.roi, "Grey matter");
        assert_eq!(image.template, "OASIS-30_Atropos Template");

        assert!(locate(act, "outputs/42/42.log").unwrap().is_none());
    }

    #[test]
    fn civet_dat_rules_and_templates() {
        let catalog = catalog();
        let civet = catalog.get("civet").unwrap();

        let lobes = locate(civet, "civet/thickness/Pitt_0050003_lobe_areas_40mm_left.dat")
            .unwrap()
            .unwrap();
        assert_eq!(
            lobes.derivative,
            "vertex-based cortical elementary area using 40 mm fwhm blurring kernel"
        );
        assert_eq!(lobes.template, "MNI ICBM152");
        assert_eq!(lobes.strategy, "tricubic interpolation registration, t1only brain masking");

        let gi = locate(civet, "civet/surfaces/Pitt_0050003_gi_left.dat").unwrap().unwrap();
        assert_eq!(gi.template, "native");
        assert_eq!(gi.derivative, "gyrification index");

        let native = locate(civet, "civet/thickness/Pitt_0050003_native_rms_rsl_tlink_20mm_left.txt")
            .unwrap()
            .unwrap();
        assert_eq!(native.template, "native");
        assert_eq!(
            native.derivative,
            "cortical thickness using 20 mm fwhm blurring kernel"
        );
    }

    #[test]
    fn civet_asymmetry_rule_precedes_generic_thickness() {
        let catalog = catalog();
        let civet = catalog.get("civet").unwrap();
        let asym = locate(civet, "civet/x/Pitt_0050003_rms_rsl_tlink_30mm_asym_hemi.txt")
            .unwrap()
            .unwrap();
        assert!(asym.derivative.starts_with("asymmetry cortical thickness map"));
    }

    #[test]
    fn civet_unknown_dat_is_skipped() {
        let catalog = catalog();
        let civet = catalog.get("civet").unwrap();
        assert!(locate(civet, "civet/x/Pitt_0050003_unknown.dat").unwrap().is_none());
    }

    #[test]
    fn freesurfer_hemisphere_required() {
        let catalog = catalog();
        let fs = catalog.get("freesurfer").unwrap();

        let left = locate(fs, "freesurfer/5.1/Pitt_0050003_surf_lh.thickness")
            .unwrap()
            .unwrap();
        assert_eq!(left.derivative, "vertex-based cortical thickness of left hemisphere");
        assert_eq!(left.template, "native");

        let err = locate(fs, "freesurfer/5.1/Pitt_0050003_surf_both.area").unwrap_err();
        assert!(matches!(err, IngestError::Unrecognized { .. }));
    }

    #[test]
    fn freesurfer_stats_atlas_by_file_name() {
        let catalog = catalog();
        let fs = catalog.get("freesurfer").unwrap();

        let dkt = locate(fs, "freesurfer/5.1/Pitt_0050003_stats_lh.aparc.stats").unwrap().unwrap();
        assert_eq!(dkt.atlas, "Desikan-Killiany Atlas");
        let destrieux = locate(fs, "freesurfer/5.1/Pitt_0050003_stats_rh.aparc.a2009s.stats")
            .unwrap()
            .unwrap();
        assert_eq!(destrieux.atlas, "Destrieux Atlas");
        assert!(destrieux.rule.stats_table);
    }

    #[test]
    fn abide_roi_timeseries() {
        let catalog = catalog();
        let cpac = catalog.get("cpac").unwrap();

        let located = locate(
            cpac,
            "data/Projects/ABIDE_Initiative/Outputs/cpac/filt_global/rois_cc200/Caltech_0051456_rois_cc200.1D",
        )
        .unwrap()
        .unwrap();
        assert_eq!(located.strategy, "filt_global");
        assert_eq!(located.derivative, "rois_cc200");
        assert_eq!(located.atlas, "Craddock 200");
        assert_eq!(located.roi, "200");
        assert_eq!(located.roi_description, "Contains ROIs from the Craddock 200 atlas");
        assert_eq!(located.template, "MNI152");
    }

    #[test]
    fn abide_non_roi_derivative() {
        let catalog = catalog();
        let niak = catalog.get("niak").unwrap();

        let located = locate(
            niak,
            "data/Projects/ABIDE_Initiative/Outputs/niak/nofilt_noglobal/func_preproc/Pitt_0050003_func_preproc.nii.gz",
        )
        .unwrap()
        .unwrap();
        assert_eq!(located.derivative, "func_preproc");
        assert_eq!(located.roi, "Extracted brain");
        assert_eq!(located.roi_description, "Extracted brain registered to MNI space");
    }

    #[test]
    fn abide_unknown_atlas_and_short_paths() {
        let catalog = catalog();
        let ccs = catalog.get("ccs").unwrap();

        let err = locate(ccs, "Outputs/ccs/filt/rois_zz99/Pitt_0050003_rois_zz99.1D").unwrap_err();
        assert!(matches!(err, IngestError::Unrecognized { .. }));

        assert!(locate(ccs, "Outputs/ccs/Pitt_0050003.nii.gz").unwrap().is_none());
        assert!(locate(ccs, "Outputs/cpac/filt/func/Pitt_0050003.nii.gz").unwrap().is_none());
    }

    #[test]
    fn kernel_width_requires_digits() {
        assert_eq!(blur_kernel_mm("x_20mm_left.txt"), Some("20"));
        assert_eq!(blur_kernel_mm("x_mm_left.txt"), None);
        assert_eq!(blur_kernel_mm("x_left.txt"), None);
    }
}
