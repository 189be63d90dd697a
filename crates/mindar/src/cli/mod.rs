//! CLI module for mindar
//!
//! Every command builds its own current-thread runtime, opens the database
//! and bucket it needs from [`config::Settings`], and reports failures as
//! [`error::HelpfulError`]s.

pub mod batch;
pub mod error;
pub mod output;

pub mod config;

// Workflow
pub mod run;

// Loading
pub mod check;
pub mod import_images;
pub mod import_subjects;
pub mod upload;

// Inspection
pub mod cpac_sublist;
pub mod status;
pub mod sublist;
