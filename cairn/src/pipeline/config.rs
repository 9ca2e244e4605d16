//! Per-run configuration.

use crate::stage::StageId;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;

/// Settings for one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// The subject this run is about (ticker, document id, ...).
    pub subject_key: String,
    /// Root directory for checkpoints and the run handle.
    pub output_location: PathBuf,
    /// Spend ceiling in USD; `None` keeps the tracker default.
    pub budget_ceiling_usd: Option<f64>,
    /// Stop after this stage completes and wait for an operator.
    pub pause_after: Option<StageId>,
    /// Reuse the latest persisted run under `output_location` if present.
    pub resume: bool,
    /// Stages whose checkpoints are superseded and re-executed.
    pub rerun: HashSet<StageId>,
    /// Advisory deadline threaded to stage bodies.
    pub deadline: Option<DateTime<Utc>>,
}

impl RunConfig {
    /// Creates a config with defaults: no ceiling override, no pause
    /// point, fresh run, nothing forced to re-run, no deadline.
    #[must_use]
    pub fn new(subject_key: impl Into<String>, output_location: impl Into<PathBuf>) -> Self {
        Self {
            subject_key: subject_key.into(),
            output_location: output_location.into(),
            budget_ceiling_usd: None,
            pause_after: None,
            resume: false,
            rerun: HashSet::new(),
            deadline: None,
        }
    }

    /// Sets the spend ceiling in USD.
    #[must_use]
    pub fn with_budget_ceiling(mut self, ceiling_usd: f64) -> Self {
        self.budget_ceiling_usd = Some(ceiling_usd);
        self
    }

    /// Pauses the run after the given stage completes.
    #[must_use]
    pub fn pause_after(mut self, stage: StageId) -> Self {
        self.pause_after = Some(stage);
        self
    }

    /// Resumes the latest persisted run under the output location.
    #[must_use]
    pub fn resume(mut self) -> Self {
        self.resume = true;
        self
    }

    /// Forces the given stage to re-execute, archiving its old checkpoint.
    #[must_use]
    pub fn rerun_stage(mut self, stage: StageId) -> Self {
        self.rerun.insert(stage);
        self
    }

    /// Sets the advisory deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new("AAPL", "/tmp/out");
        assert_eq!(config.subject_key, "AAPL");
        assert!(config.budget_ceiling_usd.is_none());
        assert!(config.pause_after.is_none());
        assert!(!config.resume);
        assert!(config.rerun.is_empty());
        assert!(config.deadline.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let config = RunConfig::new("AAPL", "/tmp/out")
            .with_budget_ceiling(50.0)
            .pause_after(StageId::integer(3))
            .resume()
            .rerun_stage(StageId::integer(2));
        assert_eq!(config.budget_ceiling_usd, Some(50.0));
        assert_eq!(config.pause_after, Some(StageId::integer(3)));
        assert!(config.resume);
        assert!(config.rerun.contains(&StageId::integer(2)));
    }
}
