use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Sender;

use super::scheduler::BoundedRunner;
use super::{TransferContext, TransferSummary, failure_channel, finish};
use crate::TransferError;
use crate::config::ServerDetails;
use crate::http::{HttpClient, HttpRequest, Method, build_url};
use crate::query::PathPattern;
use crate::search::{ChainFilter, ResultItem, reduce_dir_results, search};

/// Asks the user whether the listed paths may be deleted.
pub trait Confirm {
    fn confirm(&mut self, paths: &[String]) -> bool;
}

/// Answers every prompt the same way.
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&mut self, _paths: &[String]) -> bool {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub pattern: PathPattern,
    /// Skip the confirmation prompt.
    pub quiet: bool,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct DeleteSummary {
    /// Paths left after collapsing nested matches.
    pub matched: Vec<String>,
    /// The prompt was shown and refused.
    pub declined: bool,
    pub transfer: TransferSummary,
}

impl DeleteSummary {
    pub fn nothing_to_delete(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Search with directories included and keep only the outermost matches,
/// so a matched folder (listed with a trailing `/`) stands for its subtree.
pub fn paths_to_delete(
    client: &dyn HttpClient,
    details: &ServerDetails,
    pattern: &PathPattern,
) -> Result<Vec<ResultItem>> {
    let items = search(client, details, &pattern.with_dirs())?;
    let reduced = reduce_dir_results(items, ChainFilter::Top);
    tracing::info!("[delete] {} paths matched {}", reduced.len(), pattern.as_str());
    Ok(reduced)
}

struct DeleteItem {
    client: Arc<dyn HttpClient>,
    details: ServerDetails,
    path: String,
    dry_run: bool,
    failure_tx: Sender<TransferError>,
}

impl DeleteItem {
    fn run(self, worker_id: usize) -> Result<bool> {
        if self.dry_run {
            tracing::info!("[Dry run] [delete] worker_id={} deleting: {}", worker_id, self.path);
            return Ok(true);
        }
        let url = build_url(&self.details, &self.path, &[])?;
        tracing::info!("[delete] worker_id={} deleting: {}", worker_id, self.path);
        let resp = self.client.send(&HttpRequest::new(Method::Delete, url))?;
        if resp.status == 204 || resp.status == 200 {
            return Ok(true);
        }
        tracing::error!("[delete] {} answered {}: {}", self.path, resp.status, resp.text());
        let _ = self
            .failure_tx
            .send(TransferError::PerItem(self.path, format!("status {}: {}", resp.status, resp.text())));
        Ok(false)
    }
}

/// Delete everything `opts.pattern` matches.
///
/// An empty match set returns at once without prompting. Otherwise the
/// paths go to `confirm` (unless `quiet`); a refusal deletes nothing.
pub fn delete_files(
    ctx: &TransferContext,
    opts: &DeleteOptions,
    confirm: &mut dyn Confirm,
) -> Result<DeleteSummary> {
    let items = paths_to_delete(ctx.client.as_ref(), &ctx.details, &opts.pattern)?;
    let matched: Vec<String> = items.iter().map(ResultItem::relative_path).collect();
    if matched.is_empty() {
        tracing::info!("[delete] nothing to delete");
        return Ok(DeleteSummary::default());
    }
    if !opts.quiet && !confirm.confirm(&matched) {
        return Ok(DeleteSummary { matched, declined: true, ..Default::default() });
    }

    ctx.grow(matched.len() as u64);
    let (failure_tx, failure_rx) = failure_channel();
    let runner = BoundedRunner::new(ctx.threads);
    let paths = matched.clone();
    let outcome = runner.run_with(|producer| {
        for path in paths {
            let item = DeleteItem {
                client: ctx.client.clone(),
                details: ctx.details.clone(),
                path,
                dry_run: opts.dry_run,
                failure_tx: failure_tx.clone(),
            };
            producer.add_task(ctx.tracked(move |worker_id| item.run(worker_id)))?;
        }
        Ok(())
    });
    drop(failure_tx);
    let transfer = finish(outcome, failure_rx)?;
    Ok(DeleteSummary { matched, declined: false, transfer })
}
