use crate::error::{IngestError, Result};

/// Subject id embedded in an artifact file name.
///
/// The name is split on `_` and `.`; the last all-digit token wins and its
/// leading zeros are dropped (`Caltech_0051456_rois_cc200.1D` → `51456`).
pub fn find_subid(filename: &str) -> Result<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let token = name
        .split(['_', '.'])
        .filter(|tok| !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()))
        .last()
        .ok_or_else(|| {
            IngestError::NotFound(format!("no numeric subject id in {}", filename))
        })?;

    let trimmed = token.trim_start_matches('0');
    Ok(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_zeros() {
        assert_eq!(find_subid("Caltech_0051456_rois_cc200.1D").unwrap(), "51456");
    }

    #[test]
    fn last_numeric_token_wins() {
        assert_eq!(find_subid("site_0050002_run_0050003_lh.area").unwrap(), "50003");
    }

    #[test]
    fn accepts_leading_token_and_extension_suffix() {
        assert_eq!(find_subid("0050002_native_rms_rsl_tlink_20mm_left.txt").unwrap(), "50002");
        assert_eq!(find_subid("Pitt_0050003.nii.gz").unwrap(), "50003");
    }

    #[test]
    fn uses_file_name_of_a_path() {
        assert_eq!(
            find_subid("data/Outputs/civet/123/thickness/Olin_0050102_lobe_areas.dat").unwrap(),
            "50102"
        );
    }

    #[test]
    fn all_zero_id() {
        assert_eq!(find_subid("sub_0000_x").unwrap(), "0");
    }

    #[test]
    fn missing_id_is_not_found() {
        let err = find_subid("no_digits_here.txt").unwrap_err();
        assert!(err.is_not_found());
    }
}
