// transfer module: executors built on the bounded runner
pub mod checksum;
pub mod delete;
pub mod download;
pub mod enumeration;
mod helpers;
pub mod movecopy;
pub mod scheduler;
pub mod upload;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use indicatif::ProgressBar;

use crate::config::ServerDetails;
use crate::http::HttpClient;
use crate::{ExitStatus, TransferError};
pub use helpers::normalize_path;
use scheduler::TransferOutcome;

/// Everything an executor shares with its workers.
#[derive(Clone)]
pub struct TransferContext {
    pub client: Arc<dyn HttpClient>,
    pub details: ServerDetails,
    pub threads: usize,
    /// Advanced once per finished item when present.
    pub progress: Option<ProgressBar>,
}

impl TransferContext {
    pub fn new(client: Arc<dyn HttpClient>, details: ServerDetails, threads: usize) -> Self {
        Self { client, details, threads, progress: None }
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// Wrap a task so the progress bar advances once it finishes.
    pub(crate) fn tracked<F>(&self, task: F) -> impl FnOnce(usize) -> anyhow::Result<bool> + Send + 'static
    where
        F: FnOnce(usize) -> anyhow::Result<bool> + Send + 'static,
    {
        let progress = self.progress.clone();
        move |worker_id| {
            let res = task(worker_id);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            res
        }
    }

    pub(crate) fn grow(&self, n: u64) {
        if let Some(pb) = &self.progress {
            pb.inc_length(n);
        }
    }
}

/// Result of one upload, download, move or copy invocation.
#[derive(Debug, Default)]
pub struct TransferSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// First error that stopped the run early, if any.
    pub error: Option<anyhow::Error>,
    /// Per-item failures reported by workers, for the failure log.
    pub failures: Vec<TransferError>,
}

impl TransferSummary {
    pub(crate) fn from_outcome(outcome: TransferOutcome, failures: Vec<TransferError>) -> Self {
        Self {
            succeeded: outcome.success_count,
            failed: outcome.failure_count,
            error: outcome.first_error,
            failures,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.error.is_some() && self.succeeded == 0 {
            return ExitStatus::TotalFailure;
        }
        if self.error.is_some() && self.failed == 0 {
            return ExitStatus::PartialFailure;
        }
        ExitStatus::from_counts(self.succeeded, self.failed)
    }
}

/// Channel workers use to report per-item failures.
pub(crate) fn failure_channel() -> (Sender<TransferError>, Receiver<TransferError>) {
    unbounded::<TransferError>()
}

/// A fatal error raised before any item ran aborts the call instead of
/// being reported inside the summary.
pub(crate) fn finish(
    mut outcome: TransferOutcome,
    failure_rx: Receiver<TransferError>,
) -> anyhow::Result<TransferSummary> {
    let failures: Vec<TransferError> = failure_rx.try_iter().collect();
    let fatal = outcome
        .first_error
        .as_ref()
        .and_then(|e| e.downcast_ref::<TransferError>())
        .is_some_and(TransferError::is_fatal);
    if fatal
        && outcome.success_count + outcome.failure_count == 0
        && let Some(err) = outcome.first_error.take()
    {
        return Err(err);
    }
    Ok(TransferSummary::from_outcome(outcome, failures))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_exit_status() {
        let s = TransferSummary { succeeded: 3, failed: 1, ..Default::default() };
        assert_eq!(s.exit_status(), ExitStatus::PartialFailure);
        let s = TransferSummary { succeeded: 0, failed: 0, error: Some(anyhow::anyhow!("x")), ..Default::default() };
        assert_eq!(s.exit_status(), ExitStatus::TotalFailure);
        let s = TransferSummary { succeeded: 2, ..Default::default() };
        assert_eq!(s.exit_status(), ExitStatus::Success);
    }

    #[test]
    fn fatal_before_any_item_is_returned() {
        let (_tx, rx) = failure_channel();
        let outcome = TransferOutcome {
            first_error: Some(TransferError::PathNotFound("x".into()).into()),
            ..Default::default()
        };
        let err = finish(outcome, rx).unwrap_err();
        assert!(matches!(err.downcast_ref::<TransferError>(), Some(TransferError::PathNotFound(_))));

        let (_tx, rx) = failure_channel();
        let outcome = TransferOutcome { success_count: 1, first_error: Some(anyhow::anyhow!("io")), ..Default::default() };
        let s = finish(outcome, rx).unwrap();
        assert_eq!(s.succeeded, 1);
        assert!(s.error.is_some());
    }
}
