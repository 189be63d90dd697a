//! Workflow driver for mindar.
//!
//! Processes one subject at a time: unpack the source image with an external
//! tool, run the image-processing pipeline on it, then upload and load its
//! outputs. Runs are recorded in the `results_stats` table so a subject that
//! passed once is never reprocessed.
//!
//! [`cpac`] builds C-PAC subject lists from the same image03 scans.

pub mod cpac;
pub mod driver;
mod error;
pub mod layout;
pub mod tool;

pub use cpac::{CpacSubject, ScanKind, SublistBuilder};
pub use driver::{
    Outcome, RunReport, SubjectJob, WorkflowConfig, WorkflowDriver, DEFAULT_SOURCE_BUCKET,
    STATUS_PERSIST_ERROR,
};
pub use error::{Result, WorkflowError};
pub use layout::WorkLayout;
pub use tool::{ProcessRunner, ToolCommand, ToolError, ToolInvocation, ToolOutput, ToolRunner, ToolVars};
