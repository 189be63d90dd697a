//! Tallies for commands that load many artifacts.

use crate::cli::error::HelpfulError;
use mindar_ingest::LoadOutcome;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub inserted: usize,
    pub already_loaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &LoadOutcome) {
        match outcome {
            LoadOutcome::Inserted { .. } => self.inserted += 1,
            LoadOutcome::AlreadyLoaded { .. } => self.already_loaded += 1,
            LoadOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.already_loaded + self.skipped + self.failed
    }

    pub fn print(&self, what: &str) {
        println!(
            "{} {}: {} inserted, {} already loaded, {} skipped, {} failed",
            self.total(),
            what,
            self.inserted,
            self.already_loaded,
            self.skipped,
            self.failed
        );
    }

    /// Non-zero exit when any item failed.
    pub fn into_result(self, what: &str) -> anyhow::Result<()> {
        if self.failed > 0 {
            return Err(HelpfulError::batch_failed(what, self.failed, self.total()).into());
        }
        Ok(())
    }
}
