//! Artifact ingestion for mindar.
//!
//! Pipeline outputs are described by a declarative [`Catalog`]. For each
//! object key the [`locator`] picks the matching rule, the [`parser`] reads
//! its metric text, [`rows`] builds the table rows and the
//! [`ArtifactLoader`] runs the idempotent upsert against the database.

pub mod catalog;
mod error;
pub mod loader;
pub mod locator;
pub mod parser;
pub mod roi_map;
pub mod rows;
mod subject_id;

pub use catalog::{ArtifactRule, AtlasInfo, Catalog, PipelineMetadata, PipelineSpec};
pub use error::{IngestError, Result};
pub use loader::{ArtifactLoader, ArtifactRef, LoadOutcome};
pub use locator::{locate, LocatedArtifact};
pub use parser::{
    parse_freesurfer_stats, parse_metrics, FormatError, Layout, Metric, Metrics, StatsMeasure,
};
pub use roi_map::RoiMap;
pub use rows::{RowBuilder, SubjectRef};
pub use subject_id::find_subid;
