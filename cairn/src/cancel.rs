//! Cooperative cancellation for in-flight runs.
//!
//! A run holds one shared [`CancelToken`]; every stage body and fan-out
//! sub-task receives a handle to it through the stage context. Cancellation
//! is a request, not a kill: bodies poll [`CancelToken::check`] at their
//! own suspension points and the orchestrator polls between stages, so the
//! run drains to the distinct `Cancelled` terminal status with every
//! already-persisted checkpoint intact. Resource teardown is not the
//! token's job; the [`crate::context::ResourceRegistry`] closes clients on
//! every exit path, cancelled or not.

use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// What was recorded when cancellation was requested.
#[derive(Debug, Clone)]
struct CancelRequest {
    reason: String,
    at: DateTime<Utc>,
}

/// A shared, idempotent cancellation request slot.
///
/// The slot is written at most once per run attempt; later requests are
/// ignored so the audit trail carries the original reason. [`reset`]
/// reopens the slot when an operator re-drives the same output location.
///
/// [`reset`]: CancelToken::reset
#[derive(Debug, Default)]
pub struct CancelToken {
    request: RwLock<Option<CancelRequest>>,
}

impl CancelToken {
    /// Creates an open token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns `true` if this call filled the slot, `false` if the run was
    /// already cancelled (the earlier reason is kept).
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut request = self.request.write();
        if request.is_some() {
            return false;
        }
        *request = Some(CancelRequest {
            reason: reason.into(),
            at: Utc::now(),
        });
        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.request.read().is_some()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.request.read().as_ref().map(|r| r.reason.clone())
    }

    /// Returns when cancellation was requested, if it was.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.request.read().as_ref().map(|r| r.at)
    }

    /// Bails out with the typed cancellation error if the slot is filled.
    ///
    /// This is the polling primitive stage bodies use between remote calls.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] carrying the recorded reason.
    pub fn check(&self) -> Result<(), PipelineError> {
        match self.request.read().as_ref() {
            Some(request) => Err(PipelineError::Cancelled {
                reason: request.reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Reopens the slot so the run can be re-attempted.
    pub fn reset(&self) {
        *self.request.write() = None;
    }
}
