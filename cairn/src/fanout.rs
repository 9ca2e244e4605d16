//! Fan-out groups: homogeneous sub-tasks run concurrently inside one stage.
//!
//! All sub-tasks are launched together and the group waits for every one of
//! them — a failing sibling never cancels the others, because partial
//! results from slower branches remain valuable. Per-branch outcomes are
//! tagged values the merge step matches over exhaustively; the merge is
//! deterministic in task order regardless of wall-clock completion order.

use crate::context::StageContext;
use crate::errors::PipelineError;
use crate::stage::{Artifact, MergedPart, Stage};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// One sub-task in a fan-out group.
#[derive(Debug, Clone)]
pub struct SubTask {
    /// Stable branch key, used for part checkpoint naming.
    pub key: String,
    /// Whether this branch's failure fails the whole group.
    pub primary: bool,
    /// The branch body.
    pub body: Arc<dyn Stage>,
}

/// The tagged outcome of one branch.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    /// The branch key.
    pub key: String,
    /// Whether the branch was primary.
    pub primary: bool,
    /// The branch's artifact, or its failure flattened to a message.
    pub outcome: Result<Artifact, String>,
}

/// The result of executing a group: every branch's tagged outcome plus the
/// deterministic merge of the survivors.
#[derive(Debug, Clone)]
pub struct FanOutRun {
    /// Per-branch outcomes in task order.
    pub outcomes: Vec<BranchOutcome>,
    /// The merged artifact persisted as the stage's checkpoint.
    pub merged: Artifact,
}

/// A named, bounded set of sub-tasks run concurrently inside one stage.
#[derive(Debug, Clone, Default)]
pub struct FanOutGroup {
    name: String,
    tasks: Vec<SubTask>,
    min_results: Option<usize>,
}

impl FanOutGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            min_results: None,
        }
    }

    /// Adds a non-primary sub-task; its failure is tolerated.
    #[must_use]
    pub fn task(mut self, key: impl Into<String>, body: Arc<dyn Stage>) -> Self {
        self.tasks.push(SubTask {
            key: key.into(),
            primary: false,
            body,
        });
        self
    }

    /// Adds a primary sub-task; its failure fails the group.
    #[must_use]
    pub fn primary(mut self, key: impl Into<String>, body: Arc<dyn Stage>) -> Self {
        self.tasks.push(SubTask {
            key: key.into(),
            primary: true,
            body,
        });
        self
    }

    /// Requires at least `n` surviving results for the merge to succeed.
    ///
    /// Without a minimum, the merge tolerates losing every non-primary
    /// branch.
    #[must_use]
    pub fn with_min_results(mut self, n: usize) -> Self {
        self.min_results = Some(n);
        self
    }

    /// The group's name, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sub-tasks in task order.
    #[must_use]
    pub fn tasks(&self) -> &[SubTask] {
        &self.tasks
    }

    /// The branch keys whose artifacts a resumed run must find.
    #[must_use]
    pub fn primary_keys(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.primary)
            .map(|t| t.key.as_str())
            .collect()
    }

    /// Checks the group is well-formed: non-empty, unique keys.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first problem found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.tasks.is_empty() {
            return Err(PipelineError::Validation(format!(
                "fan-out group '{}' has no sub-tasks",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.key.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "fan-out group '{}' has duplicate branch key '{}'",
                    self.name, task.key
                )));
            }
        }
        Ok(())
    }

    /// Launches every sub-task, waits for all of them, and merges the
    /// survivors.
    ///
    /// # Errors
    ///
    /// Fails with the primary branch's error if a primary branch failed,
    /// with [`PipelineError::Cancelled`] if the run was cancelled while the
    /// group executed, or with a descriptive error when fewer than
    /// `min_results` branches survived.
    pub async fn run(&self, ctx: &StageContext, stage: &str) -> Result<FanOutRun, PipelineError> {
        self.validate()?;

        let handles: Vec<_> = self
            .tasks
            .iter()
            .map(|task| {
                let body = task.body.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { body.execute(&ctx).await })
            })
            .collect();

        let joined = join_all(handles).await;

        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (task, joined) in self.tasks.iter().zip(joined) {
            let outcome = match joined {
                Ok(Ok(artifact)) => Ok(artifact),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join_err) => Err(format!("sub-task panicked: {join_err}")),
            };
            outcomes.push(BranchOutcome {
                key: task.key.clone(),
                primary: task.primary,
                outcome,
            });
        }

        // All siblings have finished; only now decide the group's fate.
        ctx.check_cancelled()?;

        for branch in &outcomes {
            match &branch.outcome {
                Ok(_) => {}
                Err(message) if branch.primary => {
                    return Err(PipelineError::stage_body(
                        stage,
                        format!("primary branch '{}' failed: {message}", branch.key),
                    ));
                }
                Err(message) => {
                    warn!(
                        group = %self.name,
                        branch = %branch.key,
                        "non-primary branch failed, proceeding without it: {message}"
                    );
                }
            }
        }

        let parts: Vec<MergedPart> = outcomes
            .iter()
            .filter_map(|branch| {
                branch.outcome.as_ref().ok().map(|artifact| MergedPart {
                    key: branch.key.clone(),
                    artifact: artifact.clone(),
                })
            })
            .collect();

        if let Some(min) = self.min_results {
            if parts.len() < min {
                return Err(PipelineError::stage_body(
                    stage,
                    format!(
                        "merge for group '{}' requires at least {min} results, only {} survived",
                        self.name,
                        parts.len()
                    ),
                ));
            }
        }

        debug!(
            group = %self.name,
            survivors = parts.len(),
            total = self.tasks.len(),
            "fan-out group merged"
        );

        Ok(FanOutRun {
            outcomes,
            merged: Artifact::merged(parts),
        })
    }
}
