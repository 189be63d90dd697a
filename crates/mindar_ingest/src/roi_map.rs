use crate::error::{IngestError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// ROI label → region description, loaded from a YAML mapping.
///
/// Keys may be full ROIstats labels (`Mean_1002`) or bare ROI numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiMap {
    entries: BTreeMap<String, String>,
}

impl RoiMap {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: serde_yaml::Mapping = serde_yaml::from_str(text)
            .map_err(|err| IngestError::RoiMap(err.to_string()))?;

        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            let key = scalar_text(&key)
                .ok_or_else(|| IngestError::RoiMap(format!("unsupported key {:?}", key)))?;
            let value = scalar_text(&value)
                .ok_or_else(|| IngestError::RoiMap(format!("unsupported value for {}", key)))?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| IngestError::RoiMap(format!("{}: {}", path.display(), err)))?;
        Self::from_yaml_str(&text)
    }

    /// Description for an ROI label. The full label is tried first, then
    /// its ROI number.
    pub fn describe(&self, label: &str) -> Option<&str> {
        self.entries
            .get(label)
            .or_else(|| self.entries.get(roi_number(label)))
            .or_else(|| self.entries.get(&format!("Mean_{}", label)))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `Mean_1002` → `1002`; other labels are returned unchanged.
pub fn roi_number(label: &str) -> &str {
    label.split_once("Mean_").map_or(label, |(_, rest)| rest)
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
