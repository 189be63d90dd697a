//! Turn a located artifact (and its parsed content) into table rows.
//!
//! Every row starts from the same superset of descriptive fields and is then
//! restricted to the columns of its target table, so the three derivative
//! schemas share one builder.

use crate::locator::LocatedArtifact;
use crate::parser::{Metric, StatsMeasure};
use crate::roi_map::{roi_number, RoiMap};
use mindar_db::RecordRow;
use serde::{Deserialize, Serialize};

/// Who an artifact belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    /// `image03_id` for NDAR subjects, `abide_subjects.id` for ABIDE.
    pub dataset_id: String,
    pub guid: String,
}

impl SubjectRef {
    pub fn new(dataset_id: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            guid: guid.into(),
        }
    }
}

/// Builds rows for one artifact.
pub struct RowBuilder<'a> {
    located: &'a LocatedArtifact<'a>,
    subject: &'a SubjectRef,
    url: &'a str,
    timestamp: &'a str,
}

impl<'a> RowBuilder<'a> {
    pub fn new(
        located: &'a LocatedArtifact<'a>,
        subject: &'a SubjectRef,
        url: &'a str,
        timestamp: &'a str,
    ) -> Self {
        Self {
            located,
            subject,
            url,
            timestamp,
        }
    }

    fn base(&self) -> RecordRow {
        let located = self.located;
        let metadata = &located.pipeline.metadata;
        let description = located
            .rule
            .description
            .as_deref()
            .unwrap_or(metadata.description.as_str());

        RecordRow::new()
            .with("atlasname", located.atlas.as_str())
            .with("atlas", located.atlas.as_str())
            .with("atlasversion", metadata.atlas_version.as_str())
            .with("roi", located.roi.as_str())
            .with("roidescription", located.roi_description.as_str())
            .with("pipelinename", metadata.name.as_str())
            .with("pipelinetype", metadata.kind.as_str())
            .with("pipelinetools", metadata.tools.as_str())
            .with("pipelineversion", metadata.version.as_str())
            .with("pipelinedescription", description)
            .with("cfgfilelocation", metadata.cfg_file_location.as_str())
            .with("derivativename", located.derivative.as_str())
            .with("name", located.derivative.as_str())
            .with("measurename", located.rule.measure.as_str())
            .with("units", located.rule.units.as_str())
            .with("datasetid", self.subject.dataset_id.as_str())
            .with("guid", self.subject.guid.as_str())
            .with("timestamp", self.timestamp)
            .with("s3_path", self.url)
            .with("template", located.template.as_str())
            .with("strategy", located.strategy.as_str())
    }

    /// One row describing the artifact itself (images, surfaces).
    pub fn single(&self) -> Vec<RecordRow> {
        vec![self.base().restricted_to(self.located.table)]
    }

    /// One row per parsed metric.
    ///
    /// ROI descriptions come from `roi_map` when it knows the label, then
    /// from the layout's static descriptions, then from the rule.
    pub fn metrics(&self, metrics: &[Metric], roi_map: Option<&RoiMap>) -> Vec<RecordRow> {
        metrics
            .iter()
            .map(|metric| {
                let description = roi_map
                    .and_then(|map| map.describe(&metric.label))
                    .or_else(|| Some(metric.description.as_str()).filter(|d| !d.is_empty()))
                    .unwrap_or(self.located.roi_description.as_str());

                let mut row = self.base();
                row.set("roi", roi_number(&metric.label));
                row.set("roidescription", description);
                row.set("value", metric.value);
                row.restricted_to(self.located.table)
            })
            .collect()
    }

    /// One row per structure and measurement of a `.stats` table.
    pub fn stats(&self, measures: &[StatsMeasure]) -> Vec<RecordRow> {
        measures
            .iter()
            .map(|measure| {
                let mut row = self.base();
                row.set("roi", measure.structure.as_str());
                row.set("roidescription", measure.structure.as_str());
                row.set("derivativename", measure.derivative.as_str());
                row.set("name", measure.derivative.as_str());
                row.set("measurename", measure.measure.as_str());
                row.set("units", measure.units.as_str());
                row.set("value", measure.value);
                row.restricted_to(self.located.table)
            })
            .collect()
    }
}
