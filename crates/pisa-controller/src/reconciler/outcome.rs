//! Result of one reconcile pass

use crate::error::ReconcileError;
use std::time::Duration;

/// When the key should be processed again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next change notification
    None,
    After(Duration),
    Immediate,
}

/// What the work queue should do with a key after a pass.
///
/// An error without an explicit requeue falls back to the queue's per-key
/// exponential backoff.
#[derive(Debug)]
pub struct Outcome {
    pub requeue: Requeue,
    pub error: Option<ReconcileError>,
}

impl Outcome {
    pub fn done() -> Self {
        Self {
            requeue: Requeue::None,
            error: None,
        }
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: Requeue::After(delay),
            error: None,
        }
    }

    /// Retry right away, skipping backoff, and report `error`
    pub fn requeue_immediately(error: ReconcileError) -> Self {
        Self {
            requeue: Requeue::Immediate,
            error: Some(error),
        }
    }

    /// Retry with backoff
    pub fn failed(error: ReconcileError) -> Self {
        Self {
            requeue: Requeue::None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Label for the `pisa_reconcile_total` counter
    pub fn result_label(&self) -> &'static str {
        match (&self.error, self.requeue) {
            (None, Requeue::None) => "done",
            (None, _) => "requeue",
            (Some(ReconcileError::Cancelled), _) => "cancelled",
            (Some(_), _) => "error",
        }
    }
}
