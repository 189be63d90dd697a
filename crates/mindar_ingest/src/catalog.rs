//! Declarative pipeline catalog.
//!
//! Every pipeline whose results are loaded is described by data: its
//! metadata constants, target tables and an ordered list of artifact rules.
//! One generic loader consumes the catalog, so adding a pipeline means
//! adding YAML, not code.

use crate::error::{IngestError, Result};
use crate::parser::Layout;
use mindar_db::Table;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Catalog shipped with the binary.
pub const DEFAULT_CATALOG: &str = include_str!("../catalog/pipelines.yaml");

/// Constant description of a pipeline, copied into every row it produces.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tools: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub cfg_file_location: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub atlas: String,
    #[serde(default)]
    pub atlas_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AtlasInfo {
    pub name: String,
    pub rois: u32,
}

/// How one kind of artifact is recognized and turned into rows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactRule {
    /// Substrings that must all occur in the object key.
    #[serde(default)]
    pub contains: Vec<String>,
    /// Required file name suffix.
    #[serde(default)]
    pub suffix: Option<String>,
    /// Overrides the pipeline's table.
    #[serde(default)]
    pub table: Option<Table>,
    pub derivative: String,
    pub measure: String,
    #[serde(default)]
    pub units: String,
    /// Overrides the pipeline's template.
    #[serde(default)]
    pub template: Option<String>,
    /// Overrides the pipeline description.
    #[serde(default)]
    pub description: Option<String>,
    /// Append ` of left/right hemisphere` from an `lh`/`rh` file name.
    #[serde(default)]
    pub hemisphere: bool,
    #[serde(default)]
    pub roi: String,
    #[serde(default)]
    pub roi_description: String,
    /// Metric text layout; rules without one produce a single row.
    #[serde(default)]
    pub layout: Option<Layout>,
    /// Content is a Freesurfer `.stats` table.
    #[serde(default)]
    pub stats_table: bool,
    /// (file name substring, atlas name), first match wins.
    #[serde(default)]
    pub file_atlases: Vec<(String, String)>,
}

impl ArtifactRule {
    /// Whether the rule needs the object's content.
    pub fn reads_content(&self) -> bool {
        self.layout.is_some() || self.stats_table
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineSpec {
    /// Catalog key, filled in on load.
    #[serde(skip)]
    pub name: String,
    pub metadata: PipelineMetadata,
    pub table: Table,
    #[serde(default)]
    pub template: String,
    /// Template used when the key mentions `native`.
    #[serde(default)]
    pub native_template: Option<String>,
    /// Append the blurring kernel width found in the file name.
    #[serde(default)]
    pub blur_kernel: bool,
    /// Key segments after the pipeline name are `<strategy>/<derivative>/.../<file>`.
    #[serde(default)]
    pub path_fields: bool,
    #[serde(default)]
    pub atlases: BTreeMap<String, AtlasInfo>,
    /// Mirror every loaded row into the id-keyed `derivatives` tables.
    #[serde(default)]
    pub normalized: bool,
    pub rules: Vec<ArtifactRule>,
}

impl PipelineSpec {
    /// Table a rule writes to.
    pub fn table_for(&self, rule: &ArtifactRule) -> Table {
        rule.table.unwrap_or(self.table)
    }

    fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(IngestError::catalog(format!(
                "pipeline {} has no artifact rules",
                self.name
            )));
        }
        for rule in &self.rules {
            let table = self.table_for(rule);
            if table.artifact_column().is_none() || table.is_normalized() {
                return Err(IngestError::catalog(format!(
                    "pipeline {} targets {}, which is not a derivative table",
                    self.name, table
                )));
            }
            if self.normalized && table.normalized().is_none() {
                return Err(IngestError::catalog(format!(
                    "pipeline {} is normalized but targets {}",
                    self.name, table
                )));
            }
            if rule.layout.is_some() && rule.stats_table {
                return Err(IngestError::catalog(format!(
                    "pipeline {}: a rule cannot have both a layout and a stats table",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    pipelines: BTreeMap<String, PipelineSpec>,
}

/// All known pipelines, by name.
#[derive(Debug, Clone)]
pub struct Catalog {
    pipelines: BTreeMap<String, PipelineSpec>,
}

impl Catalog {
    /// The embedded catalog.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(DEFAULT_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| IngestError::catalog(format!("{}: {}", path.display(), err)))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_yaml::from_str(text).map_err(|err| IngestError::catalog(err.to_string()))?;

        let mut pipelines = BTreeMap::new();
        for (name, mut spec) in file.pipelines {
            spec.name = name.to_ascii_lowercase();
            spec.validate()?;
            pipelines.insert(spec.name.clone(), spec);
        }
        Ok(Self { pipelines })
    }

    /// Pipeline by name (case-insensitive).
    pub fn get(&self, name: &str) -> Result<&PipelineSpec> {
        self.pipelines
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| IngestError::catalog(format!("unknown pipeline: {}", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}
